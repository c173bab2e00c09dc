//! Per-slate prediction orchestration: sync the day's games, resolve the
//! model bundle, then run every game through features, simulation,
//! blending, rating and persistence.

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::client::{MainMarket, ScheduleClient};
use crate::db::models::{
    Game, LineType, OddsSnapshot, PredictionRecord, SpreadPick, TotalPick,
};
use crate::db::Database;
use crate::engine::features::FeatureBuilder;
use crate::engine::market::analyze_line_behavior;
use crate::engine::models::{blend_probability, ModelBundle, ModelLifecycleManager};
use crate::engine::rating::{
    compute_combined_rating, compute_ev, compute_kelly_stake, compute_spread_rating,
    compute_total_rating, stars_display, DEFAULT_ODDS,
};
use crate::engine::simulator::simulate;
use crate::engine::EngineError;
use crate::notify::Notifier;

/// Fallback total line when no market is available.
const DEFAULT_TOTAL_LINE: f64 = 220.0;

/// Below this many stored finished games, recent seasons are pulled in
/// before predicting.
const MIN_HISTORY_GAMES: usize = 100;

/// Tunables carried from the CLI into each run.
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub n_sim: usize,
    pub min_sim: usize,
    pub bankroll: f64,
    pub kelly_fraction: f64,
}

pub struct PredictionOrchestrator {
    db: Database,
    client: ScheduleClient,
    builder: FeatureBuilder,
    lifecycle: ModelLifecycleManager,
    notifier: Box<dyn Notifier>,
    settings: RunSettings,
}

impl PredictionOrchestrator {
    pub fn new(
        db: Database,
        client: ScheduleClient,
        lifecycle: ModelLifecycleManager,
        notifier: Box<dyn Notifier>,
        settings: RunSettings,
    ) -> Self {
        let builder = FeatureBuilder::new(db.clone());
        PredictionOrchestrator {
            db,
            client,
            builder,
            lifecycle,
            notifier,
            settings,
        }
    }

    /// Predict every game on the slate. A failed game is logged and
    /// skipped; the rest of the slate still runs.
    pub async fn run_prediction(&self, date: NaiveDate) -> Result<()> {
        self.bootstrap_history(date).await?;

        let games = self.client.games_on_date(date).await?;
        for game in &games {
            self.db.upsert_game(game)?;
        }
        info!(%date, games = games.len(), "slate synced");

        let bundle = self.lifecycle.ensure_models(false).await?;
        info!(
            version = %bundle.version,
            source = bundle.source.as_str(),
            "model bundle ready"
        );

        let mut digest = vec![format!("🏀 Daily picks | {date}"), String::new()];
        let mut predicted = 0usize;

        for game in &games {
            match self.predict_game(game, &bundle).await {
                Ok(lines) => {
                    digest.extend(lines);
                    predicted += 1;
                }
                Err(e) => error!(game_id = game.game_id, "prediction failed: {e:#}"),
            }
        }

        info!(predicted, total = games.len(), "slate complete");
        if predicted > 0 {
            self.notifier.send_best_effort(&digest.join("\n")).await;
        }
        Ok(())
    }

    /// First run against a thin database pulls the last few seasons so
    /// the rolling windows and the training frame have history.
    async fn bootstrap_history(&self, date: NaiveDate) -> Result<()> {
        if self.db.finished_games()?.len() >= MIN_HISTORY_GAMES {
            return Ok(());
        }
        let season = if date.month() >= 8 {
            date.year()
        } else {
            date.year() - 1
        };
        for s in [season - 2, season - 1, season] {
            let games = self.client.games_for_season(s).await?;
            for game in &games {
                self.db.upsert_game(game)?;
            }
            info!(season = s, games = games.len(), "season history bootstrapped");
        }
        Ok(())
    }

    async fn predict_game(&self, game: &Game, bundle: &ModelBundle) -> Result<Vec<String>> {
        let (opening, live) = self.capture_lines(game.game_id).await?;
        let opening_spread = opening.spread_home.unwrap_or(0.0);
        let live_spread = live.spread_home.unwrap_or(opening_spread);
        let opening_total = opening.total_line.unwrap_or(DEFAULT_TOTAL_LINE);
        let live_total = live.total_line.unwrap_or(opening_total);

        let features =
            self.builder
                .build_game_features(game.home_team_id, game.visitor_team_id, game.date)?;
        let row = features.ordered();

        let predicted_home = bundle.home_model.predict(&row);
        let predicted_visitor = bundle.away_model.predict(&row);

        let sim = simulate(
            game.game_id,
            predicted_home,
            predicted_visitor,
            bundle.home_variance(),
            bundle.away_variance(),
            live_spread,
            live_total,
            self.settings.n_sim,
        );
        debug!(
            game_id = game.game_id,
            margin_std = sim.margin_std,
            total_std = sim.total_std,
            "simulation spread"
        );
        if sim.simulation_count < self.settings.min_sim {
            return Err(EngineError::SimulationUndersample {
                got: sim.simulation_count,
                min: self.settings.min_sim,
            }
            .into());
        }

        let spread_cls = bundle
            .spread_classifier
            .as_ref()
            .map(|c| c.predict_proba(&row));
        let total_cls = bundle
            .total_classifier
            .as_ref()
            .map(|c| c.predict_proba(&row));
        let spread_prob = blend_probability(sim.spread_cover_probability, spread_cls);
        let total_prob = blend_probability(sim.over_probability, total_cls);

        let spread_pick = if spread_prob >= 0.5 {
            SpreadPick::Home
        } else {
            SpreadPick::Away
        };
        let total_pick = if total_prob >= 0.5 {
            TotalPick::Over
        } else {
            TotalPick::Under
        };

        let spread_rating = compute_spread_rating(spread_prob);
        let total_rating = compute_total_rating(total_prob);
        let market = analyze_line_behavior(
            opening.spread_home,
            live.spread_home,
            spread_rating.edge_pct,
            opening.total_line,
            live.total_line,
            total_rating.edge_pct,
        );
        debug!(
            game_id = game.game_id,
            sharp = market.sharp_movement_score,
            rlm = market.reverse_line_movement,
            "market behavior"
        );
        let top_edge = if spread_rating.edge_pct.abs() >= total_rating.edge_pct.abs() {
            spread_rating.edge_pct
        } else {
            total_rating.edge_pct
        };
        let combined = compute_combined_rating(
            top_edge,
            sim.score_distribution_variance,
            market.market_confidence_indicator,
        );

        let pick_prob = spread_prob.max(1.0 - spread_prob).max(total_prob.max(1.0 - total_prob));
        let stake = compute_kelly_stake(
            pick_prob,
            DEFAULT_ODDS,
            self.settings.bankroll,
            self.settings.kelly_fraction,
        );
        debug!(
            game_id = game.game_id,
            stake = stake.recommended_stake,
            bankroll_after = stake.bankroll_after_bet,
            "stake sized"
        );

        let record = PredictionRecord {
            id: None,
            game_id: game.game_id,
            predicted_at: Utc::now(),
            spread_pick,
            spread_prob,
            total_pick,
            total_prob,
            spread_edge: spread_rating.edge_pct,
            total_edge: total_rating.edge_pct,
            confidence_score: combined.confidence_score,
            star_rating: i64::from(combined.star_rating),
            recommendation_index: combined.recommendation_index,
            expected_home_score: sim.expected_home_score,
            expected_visitor_score: sim.expected_visitor_score,
            predicted_margin: sim.predicted_margin,
            predicted_total: sim.predicted_total,
            simulation_variance: sim.score_distribution_variance,
            simulation_count: sim.simulation_count as i64,
            opening_spread: opening.spread_home,
            live_spread: live.spread_home,
            opening_total: opening.total_line,
            live_total: live.total_line,
            model_version: bundle.version.clone(),
            is_final: true,
        };
        self.db.insert_prediction(&record)?;

        Ok(vec![
            format!(
                "Game {} — {} @ {}",
                game.game_id, game.visitor_team_id, game.home_team_id
            ),
            format!(
                "  spread {:+.1} → {} {} {:.0}% idx {:.0}",
                live_spread,
                spread_pick.as_str(),
                stars_display(spread_rating.stars),
                spread_rating.confidence_pct,
                spread_rating.recommendation_index
            ),
            format!(
                "  total {:.1} → {} {} {:.0}% idx {:.0}",
                live_total,
                total_pick.as_str(),
                stars_display(total_rating.stars),
                total_rating.confidence_pct,
                total_rating.recommendation_index
            ),
            format!(
                "  conf {:.2}  ev {:+.2}  stake {:.0}",
                combined.confidence_score,
                compute_ev(pick_prob, DEFAULT_ODDS),
                stake.recommended_stake
            ),
            String::new(),
        ])
    }

    /// Fetch current lines and record them. The first capture for a game
    /// doubles as its opening line.
    async fn capture_lines(&self, game_id: i64) -> Result<(MainMarket, MainMarket)> {
        let fetched = match self.client.betting_odds(game_id).await {
            Ok(m) => m,
            Err(e) => {
                warn!(game_id, "odds fetch failed, using defaults: {e:#}");
                MainMarket::default()
            }
        };

        let opening = match self.db.latest_line(game_id, LineType::Opening)? {
            Some(snap) => {
                debug!(game_id, snapshot_id = ?snap.id, "using stored opening line");
                MainMarket {
                    spread_home: snap.spread_home,
                    total_line: snap.total_line,
                    bookmaker: snap.bookmaker,
                }
            }
            None => {
                self.db.insert_odds(&OddsSnapshot {
                    id: None,
                    game_id,
                    captured_at: Utc::now(),
                    line_type: LineType::Opening,
                    spread_home: fetched.spread_home,
                    total_line: fetched.total_line,
                    bookmaker: fetched.bookmaker.clone(),
                })?;
                fetched.clone()
            }
        };

        self.db.insert_odds(&OddsSnapshot {
            id: None,
            game_id,
            captured_at: Utc::now(),
            line_type: LineType::Live,
            spread_home: fetched.spread_home,
            total_line: fetched.total_line,
            bookmaker: fetched.bookmaker.clone(),
        })?;

        Ok((opening, fetched))
    }
}
