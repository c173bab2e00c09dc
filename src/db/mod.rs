use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};
use tracing::warn;

pub mod models;
use models::*;

/// Thread-safe SQLite handle (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// One finished game as seen from storage, date kept raw so callers can
/// degrade gracefully on malformed provider dates.
#[derive(Debug, Clone)]
pub struct FinishedGameRow {
    pub home_team_id: i64,
    pub visitor_team_id: i64,
    pub home_score: i32,
    pub visitor_score: i32,
    pub date: String,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Games ─────────────────────────────────────────────────────────────────

    /// Upsert a game record by provider ID
    pub fn upsert_game(&self, game: &Game) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO games (game_id, season, date, status, home_team_id,
                                visitor_team_id, home_score, visitor_score)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
             ON CONFLICT(game_id) DO UPDATE SET
                season=excluded.season,
                date=excluded.date,
                status=excluded.status,
                home_team_id=excluded.home_team_id,
                visitor_team_id=excluded.visitor_team_id,
                home_score=excluded.home_score,
                visitor_score=excluded.visitor_score",
            params![
                game.game_id,
                game.season,
                game.date.to_string(),
                game.status,
                game.home_team_id,
                game.visitor_team_id,
                game.home_score,
                game.visitor_score,
            ],
        )?;
        Ok(())
    }

    pub fn get_game(&self, game_id: i64) -> Result<Option<Game>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT game_id, season, date, status, home_team_id,
                    visitor_team_id, home_score, visitor_score
             FROM games WHERE game_id=?1",
        )?;
        let mut rows = stmt.query_map(params![game_id], map_game)?;
        Ok(rows.next().transpose()?)
    }

    /// All finished games ordered by date ascending (training-frame input)
    pub fn finished_games(&self) -> Result<Vec<Game>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT game_id, season, date, status, home_team_id,
                    visitor_team_id, home_score, visitor_score
             FROM games WHERE status LIKE 'Final%' ORDER BY date",
        )?;
        let games = stmt
            .query_map([], map_game)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(games)
    }

    pub fn games_on_date(&self, date: NaiveDate) -> Result<Vec<Game>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT game_id, season, date, status, home_team_id,
                    visitor_team_id, home_score, visitor_score
             FROM games WHERE date=?1 ORDER BY game_id",
        )?;
        let games = stmt
            .query_map(params![date.to_string()], map_game)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(games)
    }

    /// A team's most recent finished games strictly before `before`,
    /// newest first, capped at `limit`.
    pub fn team_games_before(
        &self,
        team_id: i64,
        before: NaiveDate,
        limit: usize,
    ) -> Result<Vec<FinishedGameRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT home_team_id, visitor_team_id, home_score, visitor_score, date
             FROM games
             WHERE date < ?1 AND status LIKE 'Final%'
               AND (home_team_id=?2 OR visitor_team_id=?2)
             ORDER BY date DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![before.to_string(), team_id, limit as i64], |row| {
                Ok(FinishedGameRow {
                    home_team_id: row.get(0)?,
                    visitor_team_id: row.get(1)?,
                    home_score: row.get::<_, Option<i32>>(2)?.unwrap_or(0),
                    visitor_score: row.get::<_, Option<i32>>(3)?.unwrap_or(0),
                    date: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Odds ──────────────────────────────────────────────────────────────────

    pub fn insert_odds(&self, snap: &OddsSnapshot) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO odds_history (game_id, captured_at, line_type,
                                       spread_home, total_line, bookmaker)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                snap.game_id,
                snap.captured_at,
                snap.line_type.as_str(),
                snap.spread_home,
                snap.total_line,
                snap.bookmaker,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent captured line of the given type for a game
    pub fn latest_line(&self, game_id: i64, line_type: LineType) -> Result<Option<OddsSnapshot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, game_id, captured_at, line_type, spread_home, total_line, bookmaker
             FROM odds_history WHERE game_id=?1 AND line_type=?2
             ORDER BY captured_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![game_id, line_type.as_str()], map_odds)?;
        Ok(rows.next().transpose()?)
    }

    // ── Predictions ───────────────────────────────────────────────────────────

    /// Insert a prediction, demoting any previous final record for the same
    /// game in the same transaction. Retries once on failure.
    pub fn insert_prediction(&self, rec: &PredictionRecord) -> Result<i64> {
        retry_once(|| self.insert_prediction_once(rec))
    }

    fn insert_prediction_once(&self, rec: &PredictionRecord) -> Result<i64> {
        let mut guard = self.conn.lock().unwrap();
        let tx = guard.transaction()?;
        tx.execute(
            "UPDATE predictions SET is_final=0 WHERE game_id=?1 AND is_final=1",
            params![rec.game_id],
        )?;
        tx.execute(
            "INSERT INTO predictions (
                game_id, predicted_at, spread_pick, spread_prob, total_pick, total_prob,
                spread_edge, total_edge, confidence_score, star_rating, recommendation_index,
                expected_home_score, expected_visitor_score, predicted_margin, predicted_total,
                simulation_variance, simulation_count,
                opening_spread, live_spread, opening_total, live_total,
                model_version, is_final
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,1)",
            params![
                rec.game_id,
                rec.predicted_at,
                rec.spread_pick.as_str(),
                rec.spread_prob,
                rec.total_pick.as_str(),
                rec.total_prob,
                rec.spread_edge,
                rec.total_edge,
                rec.confidence_score,
                rec.star_rating,
                rec.recommendation_index,
                rec.expected_home_score,
                rec.expected_visitor_score,
                rec.predicted_margin,
                rec.predicted_total,
                rec.simulation_variance,
                rec.simulation_count,
                rec.opening_spread,
                rec.live_spread,
                rec.opening_total,
                rec.live_total,
                rec.model_version,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// The current final prediction for a game, if any
    pub fn final_prediction(&self, game_id: i64) -> Result<Option<PredictionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions
             WHERE game_id=?1 AND is_final=1 LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(params![game_id], map_prediction)?;
        Ok(rows.next().transpose()?)
    }

    pub fn count_final_predictions(&self, game_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions WHERE game_id=?1 AND is_final=1",
            params![game_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// Final predictions for games played on a given date
    pub fn final_predictions_on_date(&self, date: NaiveDate) -> Result<Vec<PredictionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM predictions p
             JOIN games g ON p.game_id = g.game_id
             WHERE g.date=?1 AND p.is_final=1 ORDER BY p.game_id",
            PREDICTION_COLUMNS_QUALIFIED
        ))?;
        let rows = stmt
            .query_map(params![date.to_string()], map_prediction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Reviews ───────────────────────────────────────────────────────────────

    /// Upsert the review row for a game (idempotent re-review). Retries once.
    pub fn upsert_review(&self, rec: &ReviewRecord) -> Result<()> {
        retry_once(|| self.upsert_review_once(rec))
    }

    fn upsert_review_once(&self, rec: &ReviewRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO reviews (
                game_id, reviewed_at, spread_pick, total_pick, spread_correct, total_correct,
                final_home_score, final_visitor_score, closing_spread, closing_total,
                clv_open, clv_close
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(game_id) DO UPDATE SET
                reviewed_at=excluded.reviewed_at,
                spread_pick=excluded.spread_pick,
                total_pick=excluded.total_pick,
                spread_correct=excluded.spread_correct,
                total_correct=excluded.total_correct,
                final_home_score=excluded.final_home_score,
                final_visitor_score=excluded.final_visitor_score,
                closing_spread=excluded.closing_spread,
                closing_total=excluded.closing_total,
                clv_open=excluded.clv_open,
                clv_close=excluded.clv_close",
            params![
                rec.game_id,
                rec.reviewed_at,
                rec.spread_pick.as_str(),
                rec.total_pick.as_str(),
                rec.spread_correct,
                rec.total_correct,
                rec.final_home_score,
                rec.final_visitor_score,
                rec.closing_spread,
                rec.closing_total,
                rec.clv_open,
                rec.clv_close,
            ],
        )?;
        Ok(())
    }

    /// Most recently reviewed games, newest first (degradation window input)
    pub fn recent_reviews(&self, limit: usize) -> Result<Vec<ReviewRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT game_id, reviewed_at, spread_pick, total_pick, spread_correct,
                    total_correct, final_home_score, final_visitor_score,
                    closing_spread, closing_total, clv_open, clv_close
             FROM reviews ORDER BY reviewed_at DESC, game_id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], map_review)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Finished games that have not been reviewed yet (retrain staleness gate)
    pub fn count_unreviewed_finished(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM games g
             LEFT JOIN reviews r ON g.game_id = r.game_id
             WHERE g.status LIKE 'Final%' AND r.game_id IS NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    // ── Model history ─────────────────────────────────────────────────────────

    pub fn log_model(&self, row: &ModelHistoryRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO model_history (trained_at, model_type, algorithm,
                                        data_points, metrics_json, artifact_path)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                row.trained_at,
                row.model_type,
                row.algorithm,
                row.data_points,
                row.metrics_json,
                row.artifact_path,
            ],
        )?;
        Ok(())
    }

    pub fn latest_model_history(&self) -> Result<Option<ModelHistoryRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, trained_at, model_type, algorithm, data_points, metrics_json, artifact_path
             FROM model_history ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], |row| {
            Ok(ModelHistoryRow {
                id: row.get(0)?,
                trained_at: row.get(1)?,
                model_type: row.get(2)?,
                algorithm: row.get(3)?,
                data_points: row.get(4)?,
                metrics_json: row.get(5)?,
                artifact_path: row.get(6)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }
}

/// Record upserts get exactly one retry; anything still failing surfaces.
fn retry_once<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Ok(v) => Ok(v),
        Err(first) => {
            warn!("record upsert failed, retrying once: {first}");
            op()
        }
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_game(row: &rusqlite::Row) -> rusqlite::Result<Game> {
    let date_raw: String = row.get(2)?;
    let date = date_raw.parse::<NaiveDate>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Game {
        game_id: row.get(0)?,
        season: row.get(1)?,
        date,
        status: row.get(3)?,
        home_team_id: row.get(4)?,
        visitor_team_id: row.get(5)?,
        home_score: row.get(6)?,
        visitor_score: row.get(7)?,
    })
}

const PREDICTION_COLUMNS: &str = "id, game_id, predicted_at, spread_pick, spread_prob, \
    total_pick, total_prob, spread_edge, total_edge, confidence_score, star_rating, \
    recommendation_index, expected_home_score, expected_visitor_score, predicted_margin, \
    predicted_total, simulation_variance, simulation_count, opening_spread, live_spread, \
    opening_total, live_total, model_version, is_final";

const PREDICTION_COLUMNS_QUALIFIED: &str = "p.id, p.game_id, p.predicted_at, p.spread_pick, \
    p.spread_prob, p.total_pick, p.total_prob, p.spread_edge, p.total_edge, p.confidence_score, \
    p.star_rating, p.recommendation_index, p.expected_home_score, p.expected_visitor_score, \
    p.predicted_margin, p.predicted_total, p.simulation_variance, p.simulation_count, \
    p.opening_spread, p.live_spread, p.opening_total, p.live_total, p.model_version, p.is_final";

fn map_prediction(row: &rusqlite::Row) -> rusqlite::Result<PredictionRecord> {
    let spread_raw: String = row.get(3)?;
    let total_raw: String = row.get(5)?;
    Ok(PredictionRecord {
        id: row.get(0)?,
        game_id: row.get(1)?,
        predicted_at: row.get(2)?,
        spread_pick: SpreadPick::parse(&spread_raw).unwrap_or(SpreadPick::Home),
        spread_prob: row.get(4)?,
        total_pick: TotalPick::parse(&total_raw).unwrap_or(TotalPick::Over),
        total_prob: row.get(6)?,
        spread_edge: row.get(7)?,
        total_edge: row.get(8)?,
        confidence_score: row.get(9)?,
        star_rating: row.get(10)?,
        recommendation_index: row.get(11)?,
        expected_home_score: row.get(12)?,
        expected_visitor_score: row.get(13)?,
        predicted_margin: row.get(14)?,
        predicted_total: row.get(15)?,
        simulation_variance: row.get(16)?,
        simulation_count: row.get(17)?,
        opening_spread: row.get(18)?,
        live_spread: row.get(19)?,
        opening_total: row.get(20)?,
        live_total: row.get(21)?,
        model_version: row.get(22)?,
        is_final: row.get(23)?,
    })
}

fn map_review(row: &rusqlite::Row) -> rusqlite::Result<ReviewRecord> {
    let spread_raw: String = row.get(2)?;
    let total_raw: String = row.get(3)?;
    Ok(ReviewRecord {
        game_id: row.get(0)?,
        reviewed_at: row.get(1)?,
        spread_pick: SpreadPick::parse(&spread_raw).unwrap_or(SpreadPick::Home),
        total_pick: TotalPick::parse(&total_raw).unwrap_or(TotalPick::Over),
        spread_correct: row.get(4)?,
        total_correct: row.get(5)?,
        final_home_score: row.get(6)?,
        final_visitor_score: row.get(7)?,
        closing_spread: row.get(8)?,
        closing_total: row.get(9)?,
        clv_open: row.get(10)?,
        clv_close: row.get(11)?,
    })
}

fn map_odds(row: &rusqlite::Row) -> rusqlite::Result<OddsSnapshot> {
    let type_raw: String = row.get(3)?;
    Ok(OddsSnapshot {
        id: row.get(0)?,
        game_id: row.get(1)?,
        captured_at: row.get(2)?,
        line_type: LineType::parse(&type_raw).unwrap_or(LineType::Live),
        spread_home: row.get(4)?,
        total_line: row.get(5)?,
        bookmaker: row.get(6)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS games (
    game_id         INTEGER PRIMARY KEY,
    season          INTEGER,
    date            TEXT    NOT NULL,
    status          TEXT    NOT NULL,
    home_team_id    INTEGER NOT NULL,
    visitor_team_id INTEGER NOT NULL,
    home_score      INTEGER,
    visitor_score   INTEGER
);

CREATE TABLE IF NOT EXISTS odds_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id     INTEGER NOT NULL,
    captured_at TEXT    NOT NULL,
    line_type   TEXT    NOT NULL CHECK(line_type IN ('opening','live')),
    spread_home REAL,
    total_line  REAL,
    bookmaker   TEXT
);

CREATE TABLE IF NOT EXISTS predictions (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id                INTEGER NOT NULL,
    predicted_at           TEXT    NOT NULL,
    spread_pick            TEXT    NOT NULL,
    spread_prob            REAL    NOT NULL,
    total_pick             TEXT    NOT NULL,
    total_prob             REAL    NOT NULL,
    spread_edge            REAL    NOT NULL,
    total_edge             REAL    NOT NULL,
    confidence_score       REAL    NOT NULL,
    star_rating            INTEGER NOT NULL,
    recommendation_index   REAL    NOT NULL,
    expected_home_score    REAL    NOT NULL,
    expected_visitor_score REAL    NOT NULL,
    predicted_margin       REAL    NOT NULL,
    predicted_total        REAL    NOT NULL,
    simulation_variance    REAL    NOT NULL,
    simulation_count       INTEGER NOT NULL,
    opening_spread         REAL,
    live_spread            REAL,
    opening_total          REAL,
    live_total             REAL,
    model_version          TEXT    NOT NULL,
    is_final               INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS reviews (
    game_id             INTEGER PRIMARY KEY,
    reviewed_at         TEXT    NOT NULL,
    spread_pick         TEXT    NOT NULL,
    total_pick          TEXT    NOT NULL,
    spread_correct      INTEGER NOT NULL,
    total_correct       INTEGER NOT NULL,
    final_home_score    INTEGER NOT NULL,
    final_visitor_score INTEGER NOT NULL,
    closing_spread      REAL,
    closing_total       REAL,
    clv_open            REAL    NOT NULL,
    clv_close           REAL    NOT NULL
);

CREATE TABLE IF NOT EXISTS model_history (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    trained_at    TEXT    NOT NULL,
    model_type    TEXT    NOT NULL,
    algorithm     TEXT    NOT NULL,
    data_points   INTEGER NOT NULL,
    metrics_json  TEXT    NOT NULL,
    artifact_path TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_games_date ON games(date);
CREATE INDEX IF NOT EXISTS idx_games_status ON games(status);
CREATE INDEX IF NOT EXISTS idx_odds_game ON odds_history(game_id, line_type);
CREATE INDEX IF NOT EXISTS idx_predictions_game ON predictions(game_id, is_final);
"#;
