//! Rolling-window feature construction from stored game results.
//!
//! Every feature is derived from a team's last 20 finished games strictly
//! before the as-of date. The column schema is fixed and ordered; training
//! and inference must agree on it exactly.

use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::info;

use crate::db::{Database, FinishedGameRow};

/// Ordered feature schema shared by training and inference.
pub const FEATURE_COLUMNS: [&str; 40] = [
    // Team offensive/defensive ratings
    "home_off_rating",
    "home_def_rating",
    "home_net_rating",
    "away_off_rating",
    "away_def_rating",
    "away_net_rating",
    // Pace
    "home_pace",
    "away_pace",
    "pace_interaction",
    // Rolling last-5 stats
    "home_avg_score_last5",
    "home_avg_allowed_last5",
    "home_margin_last5",
    "away_avg_score_last5",
    "away_avg_allowed_last5",
    "away_margin_last5",
    // Rolling last-10 stats
    "home_avg_score_last10",
    "home_avg_allowed_last10",
    "home_margin_last10",
    "away_avg_score_last10",
    "away_avg_allowed_last10",
    "away_margin_last10",
    // Home/away indicator
    "home_indicator",
    // Rest days
    "home_rest_days",
    "away_rest_days",
    // Back-to-back flag
    "home_b2b",
    "away_b2b",
    // Recent scoring variance
    "home_scoring_variance",
    "away_scoring_variance",
    // Opponent efficiency
    "opp_home_def_eff",
    "opp_away_def_eff",
    "opp_home_off_eff",
    "opp_away_off_eff",
    // Consistency and volatility
    "home_consistency",
    "away_consistency",
    "home_off_volatility",
    "away_off_volatility",
    "home_def_volatility",
    "away_def_volatility",
    // Recent margin trend
    "home_margin_trend",
    "away_margin_trend",
];

/// Rolling-window depth per team.
const WINDOW: usize = 20;

/// One past game from a single team's perspective.
#[derive(Debug, Clone)]
struct TeamGameRecord {
    scored: f64,
    allowed: f64,
    margin: f64,
    total: f64,
    date: String,
}

impl TeamGameRecord {
    fn from_row(row: &FinishedGameRow, team_id: i64) -> Self {
        let is_home = row.home_team_id == team_id;
        let (scored, allowed) = if is_home {
            (f64::from(row.home_score), f64::from(row.visitor_score))
        } else {
            (f64::from(row.visitor_score), f64::from(row.home_score))
        };
        TeamGameRecord {
            scored,
            allowed,
            margin: scored - allowed,
            total: scored + allowed,
            date: row.date.clone(),
        }
    }
}

/// Named feature values for one game. `ordered` projects them onto the
/// fixed schema, zero-filling anything absent.
#[derive(Debug, Clone, Default)]
pub struct FeatureVector {
    pub values: HashMap<String, f64>,
}

impl FeatureVector {
    pub fn ordered(&self) -> Vec<f64> {
        FEATURE_COLUMNS
            .iter()
            .map(|col| {
                let v = self.values.get(*col).copied().unwrap_or(0.0);
                if v.is_finite() {
                    v
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// Training frame: one feature row per usable finished game, plus the
/// actual score targets.
#[derive(Debug, Clone, Default)]
pub struct TrainingFrame {
    pub game_ids: Vec<i64>,
    pub rows: Vec<Vec<f64>>,
    pub home_scores: Vec<f64>,
    pub away_scores: Vec<f64>,
}

impl TrainingFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds feature vectors from the stored game history.
pub struct FeatureBuilder {
    db: Database,
}

impl FeatureBuilder {
    pub fn new(db: Database) -> Self {
        FeatureBuilder { db }
    }

    /// Feature vector for one matchup as of `date`. Teams with no prior
    /// history contribute zero-filled features rather than failing.
    pub fn build_game_features(
        &self,
        home_team_id: i64,
        visitor_team_id: i64,
        date: NaiveDate,
    ) -> Result<FeatureVector> {
        let home_games = self.team_records(home_team_id, date)?;
        let away_games = self.team_records(visitor_team_id, date)?;

        let mut values = team_features(&home_games, &away_games, date, "home");
        values.extend(team_features(&away_games, &home_games, date, "away"));

        values.insert("home_indicator".into(), 1.0);
        // a zero-history side contributes zero pace, zeroing the interaction
        let home_pace = values.get("home_pace").copied().unwrap_or(0.0);
        let away_pace = values.get("away_pace").copied().unwrap_or(0.0);
        values.insert("pace_interaction".into(), home_pace * away_pace / 100.0);

        Ok(FeatureVector { values })
    }

    /// Feature rows plus score targets for every finished game with a
    /// non 0-0 scoreline, ordered by date.
    pub fn build_training_frame(&self) -> Result<TrainingFrame> {
        let games = self.db.finished_games()?;
        let mut frame = TrainingFrame::default();

        for game in &games {
            let home_score = game.home_score.unwrap_or(0);
            let visitor_score = game.visitor_score.unwrap_or(0);
            if home_score == 0 && visitor_score == 0 {
                continue;
            }

            let features =
                self.build_game_features(game.home_team_id, game.visitor_team_id, game.date)?;
            frame.game_ids.push(game.game_id);
            frame.rows.push(features.ordered());
            frame.home_scores.push(f64::from(home_score));
            frame.away_scores.push(f64::from(visitor_score));
        }

        info!(
            feature_count = FEATURE_COLUMNS.len(),
            samples = frame.len(),
            "training frame built"
        );
        Ok(frame)
    }

    fn team_records(&self, team_id: i64, before: NaiveDate) -> Result<Vec<TeamGameRecord>> {
        let rows = self.db.team_games_before(team_id, before, WINDOW)?;
        Ok(rows
            .iter()
            .map(|r| TeamGameRecord::from_row(r, team_id))
            .collect())
    }
}

/// Per-side feature block. `games` are newest first. Empty history
/// zero-fills every column of the side including opponent efficiency.
fn team_features(
    games: &[TeamGameRecord],
    opp_games: &[TeamGameRecord],
    as_of: NaiveDate,
    prefix: &str,
) -> HashMap<String, f64> {
    let mut feat = HashMap::new();

    if games.is_empty() {
        for col in FEATURE_COLUMNS {
            if col.starts_with(prefix) {
                feat.insert(col.to_string(), 0.0);
            }
        }
        feat.insert(format!("opp_{prefix}_def_eff"), 0.0);
        feat.insert(format!("opp_{prefix}_off_eff"), 0.0);
        return feat;
    }

    let scores: Vec<f64> = games.iter().map(|g| g.scored).collect();
    let allowed: Vec<f64> = games.iter().map(|g| g.allowed).collect();
    let totals: Vec<f64> = games.iter().map(|g| g.total).collect();

    let avg_score = mean(&scores);
    let avg_allowed = mean(&allowed);
    let avg_total = mean(&totals);
    // Possessions approximation from the scoring environment
    let pace = avg_total / 2.0;

    let off_rating = (avg_score / pace.max(80.0)) * 100.0;
    let def_rating = (avg_allowed / pace.max(80.0)) * 100.0;
    feat.insert(format!("{prefix}_off_rating"), off_rating);
    feat.insert(format!("{prefix}_def_rating"), def_rating);
    feat.insert(format!("{prefix}_net_rating"), off_rating - def_rating);
    feat.insert(format!("{prefix}_pace"), pace);

    let last5 = &games[..games.len().min(5)];
    feat.insert(
        format!("{prefix}_avg_score_last5"),
        mean_by(last5, |g| g.scored),
    );
    feat.insert(
        format!("{prefix}_avg_allowed_last5"),
        mean_by(last5, |g| g.allowed),
    );
    let margin5 = mean_by(last5, |g| g.margin);
    feat.insert(format!("{prefix}_margin_last5"), margin5);

    let last10 = &games[..games.len().min(10)];
    feat.insert(
        format!("{prefix}_avg_score_last10"),
        mean_by(last10, |g| g.scored),
    );
    feat.insert(
        format!("{prefix}_avg_allowed_last10"),
        mean_by(last10, |g| g.allowed),
    );
    let margin10 = mean_by(last10, |g| g.margin);
    feat.insert(format!("{prefix}_margin_last10"), margin10);

    // Rest days from the most recent game; thin history assumes a normal
    // break, unparseable dates assume a short one.
    let rest = if games.len() >= 2 {
        match games[0].date.parse::<NaiveDate>() {
            Ok(last) => (as_of - last).num_days().max(0) as f64,
            Err(_) => 2.0,
        }
    } else {
        3.0
    };
    feat.insert(format!("{prefix}_rest_days"), rest);
    feat.insert(
        format!("{prefix}_b2b"),
        if rest <= 1.0 { 1.0 } else { 0.0 },
    );

    let score_var = if scores.len() >= 2 {
        variance(&scores)
    } else {
        0.0
    };
    feat.insert(format!("{prefix}_scoring_variance"), score_var);

    let score_std = if scores.len() >= 2 {
        variance(&scores).sqrt()
    } else {
        1.0
    };
    feat.insert(
        format!("{prefix}_consistency"),
        avg_score / score_std.max(0.1),
    );

    feat.insert(
        format!("{prefix}_off_volatility"),
        if scores.len() >= 2 {
            variance(&scores).sqrt()
        } else {
            0.0
        },
    );
    feat.insert(
        format!("{prefix}_def_volatility"),
        if allowed.len() >= 2 {
            variance(&allowed).sqrt()
        } else {
            0.0
        },
    );

    feat.insert(format!("{prefix}_margin_trend"), margin5 - margin10);

    if opp_games.is_empty() {
        feat.insert(format!("opp_{prefix}_def_eff"), 0.0);
        feat.insert(format!("opp_{prefix}_off_eff"), 0.0);
    } else {
        let opp_scores: Vec<f64> = opp_games.iter().map(|g| g.scored).collect();
        let opp_allowed: Vec<f64> = opp_games.iter().map(|g| g.allowed).collect();
        let opp_totals: Vec<f64> = opp_games.iter().map(|g| g.total).collect();
        let opp_pace = mean(&opp_totals) / 2.0;
        feat.insert(
            format!("opp_{prefix}_def_eff"),
            (mean(&opp_allowed) / opp_pace.max(80.0)) * 100.0,
        );
        feat.insert(
            format!("opp_{prefix}_off_eff"),
            (mean(&opp_scores) / opp_pace.max(80.0)) * 100.0,
        );
    }

    feat
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn mean_by(games: &[TeamGameRecord], f: impl Fn(&TeamGameRecord) -> f64) -> f64 {
    if games.is_empty() {
        return 0.0;
    }
    games.iter().map(f).sum::<f64>() / games.len() as f64
}

/// Population variance.
fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Game;
    use approx::assert_relative_eq;

    fn temp_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        let db = Database::open(path.to_str().unwrap()).expect("open db");
        (db, dir)
    }

    fn finished(id: i64, date: &str, home: i64, away: i64, hs: i32, vs: i32) -> Game {
        Game {
            game_id: id,
            season: Some(2025),
            date: date.parse().unwrap(),
            status: "Final".into(),
            home_team_id: home,
            visitor_team_id: away,
            home_score: Some(hs),
            visitor_score: Some(vs),
        }
    }

    #[test]
    fn ordered_vector_is_complete_and_finite() {
        let (db, _dir) = temp_db();
        for i in 0..6 {
            db.upsert_game(&finished(
                i,
                &format!("2025-01-{:02}", i + 2),
                10,
                20,
                108 + i as i32,
                101,
            ))
            .unwrap();
        }
        let builder = FeatureBuilder::new(db);
        let features = builder
            .build_game_features(10, 20, "2025-01-15".parse().unwrap())
            .unwrap();
        let row = features.ordered();
        assert_eq!(row.len(), FEATURE_COLUMNS.len());
        assert!(row.iter().all(|v| v.is_finite()));
        assert_relative_eq!(features.values["home_indicator"], 1.0);
    }

    #[test]
    fn no_history_zero_fills() {
        let (db, _dir) = temp_db();
        let builder = FeatureBuilder::new(db);
        let features = builder
            .build_game_features(1, 2, "2025-01-15".parse().unwrap())
            .unwrap();
        assert_relative_eq!(features.values["home_off_rating"], 0.0);
        assert_relative_eq!(features.values["away_net_rating"], 0.0);
        assert_relative_eq!(features.values["opp_home_def_eff"], 0.0);
        // zero pace on both sides zeroes the interaction term
        assert_relative_eq!(features.values["pace_interaction"], 0.0);
    }

    #[test]
    fn rest_days_and_b2b() {
        let (db, _dir) = temp_db();
        db.upsert_game(&finished(1, "2025-01-10", 10, 20, 110, 100))
            .unwrap();
        db.upsert_game(&finished(2, "2025-01-14", 10, 30, 105, 99))
            .unwrap();
        let builder = FeatureBuilder::new(db);
        let features = builder
            .build_game_features(10, 40, "2025-01-15".parse().unwrap())
            .unwrap();
        assert_relative_eq!(features.values["home_rest_days"], 1.0);
        assert_relative_eq!(features.values["home_b2b"], 1.0);
        // no away history at all: zero-filled side
        assert_relative_eq!(features.values["away_rest_days"], 0.0);
    }

    #[test]
    fn thin_history_defaults_rest_to_three() {
        let (db, _dir) = temp_db();
        db.upsert_game(&finished(1, "2025-01-10", 10, 20, 110, 100))
            .unwrap();
        let builder = FeatureBuilder::new(db);
        let features = builder
            .build_game_features(10, 40, "2025-01-15".parse().unwrap())
            .unwrap();
        assert_relative_eq!(features.values["home_rest_days"], 3.0);
        assert_relative_eq!(features.values["home_b2b"], 0.0);
    }

    #[test]
    fn windows_average_recent_games() {
        let (db, _dir) = temp_db();
        // 10 games for team 10, scores 100..109 with constant 95 allowed
        for i in 0..10 {
            db.upsert_game(&finished(
                i,
                &format!("2025-01-{:02}", i + 1),
                10,
                20 + i,
                100 + i as i32,
                95,
            ))
            .unwrap();
        }
        let builder = FeatureBuilder::new(db);
        let features = builder
            .build_game_features(10, 50, "2025-01-20".parse().unwrap())
            .unwrap();
        // newest five are 105..109
        assert_relative_eq!(features.values["home_avg_score_last5"], 107.0);
        assert_relative_eq!(features.values["home_avg_score_last10"], 104.5);
        assert_relative_eq!(features.values["home_margin_trend"], 2.5);
    }

    #[test]
    fn training_frame_skips_zero_zero_games() {
        let (db, _dir) = temp_db();
        db.upsert_game(&finished(1, "2025-01-10", 10, 20, 110, 100))
            .unwrap();
        db.upsert_game(&finished(2, "2025-01-11", 10, 20, 0, 0))
            .unwrap();
        let builder = FeatureBuilder::new(db);
        let frame = builder.build_training_frame().unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.game_ids, vec![1]);
        assert_relative_eq!(frame.home_scores[0], 110.0);
        assert_eq!(frame.rows[0].len(), FEATURE_COLUMNS.len());
    }
}
