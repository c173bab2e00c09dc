//! Post-game review: ingest final scores, grade every final prediction,
//! compute hit-rate/ROI/CLV aggregates and hand control back to the model
//! lifecycle so degradation can trigger a retrain.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::client::ScheduleClient;
use crate::db::models::{LineType, PredictionRecord, ReviewRecord};
use crate::db::Database;
use crate::engine::models::ModelLifecycleManager;
use crate::engine::rating::{is_spread_correct, is_total_correct};
use crate::notify::Notifier;

/// Aggregates over one review run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewSummary {
    pub reviewed: usize,
    pub spread_hit_rate: f64,
    pub total_hit_rate: f64,
    /// Flat-stake ROI at even juice across both markets
    pub roi: f64,
    pub avg_clv_open: f64,
    pub avg_clv_close: f64,
}

pub struct ReviewEngine {
    db: Database,
    client: ScheduleClient,
    lifecycle: ModelLifecycleManager,
    notifier: Box<dyn Notifier>,
}

impl ReviewEngine {
    pub fn new(
        db: Database,
        client: ScheduleClient,
        lifecycle: ModelLifecycleManager,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        ReviewEngine {
            db,
            client,
            lifecycle,
            notifier,
        }
    }

    pub async fn run_review(&self, date: NaiveDate) -> Result<ReviewSummary> {
        // Pull final scores for the slate into storage first
        let games = self.client.games_on_date(date).await?;
        for game in games.iter().filter(|g| g.is_final()) {
            self.db.upsert_game(game)?;
        }

        let predictions = self.db.final_predictions_on_date(date)?;
        let mut records = Vec::new();

        for pred in &predictions {
            let Some(game) = self.db.get_game(pred.game_id)? else {
                continue;
            };
            if !game.is_final() {
                continue;
            }
            let (Some(home_score), Some(visitor_score)) = (game.home_score, game.visitor_score)
            else {
                warn!(game_id = game.game_id, "final game without scores, skipping review");
                continue;
            };

            let closing = self.db.latest_line(pred.game_id, LineType::Live)?;
            let record = grade_prediction(
                pred,
                home_score,
                visitor_score,
                closing.as_ref().and_then(|s| s.spread_home),
                closing.as_ref().and_then(|s| s.total_line),
            );
            self.db.upsert_review(&record)?;
            records.push(record);
        }

        let summary = summarize(&records);
        info!(
            reviewed = summary.reviewed,
            spread_hit_rate = summary.spread_hit_rate,
            total_hit_rate = summary.total_hit_rate,
            roi = summary.roi,
            "review complete"
        );

        if summary.reviewed > 0 {
            self.notifier.send_best_effort(&digest(date, &summary)).await;
        }

        // Review feeds the retrain gates; a degraded window retrains here
        self.lifecycle.ensure_models(false).await?;
        Ok(summary)
    }

    /// One-paragraph status: current model lineage plus the recent
    /// review window.
    pub fn model_status(&self) -> Result<String> {
        let mut out = Vec::new();
        match self.db.latest_model_history()? {
            Some(row) => out.push(format!(
                "model #{}: {} ({}) trained {} on {} samples",
                row.id.unwrap_or_default(),
                row.model_type,
                row.algorithm,
                row.trained_at.format("%Y-%m-%d %H:%M UTC"),
                row.data_points
            )),
            None => out.push("model: never trained".to_string()),
        }

        let reviews = self.db.recent_reviews(30)?;
        if reviews.is_empty() {
            out.push("reviews: none yet".to_string());
        } else {
            let hits: usize = reviews
                .iter()
                .map(|r| usize::from(r.spread_correct) + usize::from(r.total_correct))
                .sum();
            out.push(format!(
                "last {} reviews: combined hit rate {:.1}%",
                reviews.len(),
                100.0 * hits as f64 / (2 * reviews.len()) as f64
            ));
        }

        out.push(format!(
            "unreviewed finished games: {}",
            self.db.count_unreviewed_finished()?
        ));
        Ok(out.join("\n"))
    }
}

/// Grade one final prediction against the actual result and the closing
/// line.
fn grade_prediction(
    pred: &PredictionRecord,
    home_score: i32,
    visitor_score: i32,
    closing_spread: Option<f64>,
    closing_total: Option<f64>,
) -> ReviewRecord {
    let margin = f64::from(home_score - visitor_score);
    let clv_open = match (pred.opening_spread, pred.live_spread) {
        (Some(open), Some(live)) => (open - live).abs(),
        _ => 0.0,
    };
    let clv_close = pred.live_spread.map_or(0.0, |live| (live - margin).abs());

    ReviewRecord {
        game_id: pred.game_id,
        reviewed_at: Utc::now(),
        spread_pick: pred.spread_pick,
        total_pick: pred.total_pick,
        spread_correct: is_spread_correct(
            pred.spread_pick,
            home_score,
            visitor_score,
            pred.live_spread,
        ),
        total_correct: is_total_correct(pred.total_pick, home_score, visitor_score, pred.live_total),
        final_home_score: home_score,
        final_visitor_score: visitor_score,
        closing_spread,
        closing_total,
        clv_open,
        clv_close,
    }
}

fn summarize(records: &[ReviewRecord]) -> ReviewSummary {
    if records.is_empty() {
        return ReviewSummary::default();
    }
    let n = records.len() as f64;
    let spread_hits = records.iter().filter(|r| r.spread_correct).count() as f64;
    let total_hits = records.iter().filter(|r| r.total_correct).count() as f64;
    ReviewSummary {
        reviewed: records.len(),
        spread_hit_rate: spread_hits / n,
        total_hit_rate: total_hits / n,
        roi: ((spread_hits + total_hits) / (2.0 * n)) * 2.0 - 1.0,
        avg_clv_open: records.iter().map(|r| r.clv_open).sum::<f64>() / n,
        avg_clv_close: records.iter().map(|r| r.clv_close).sum::<f64>() / n,
    }
}

fn digest(date: NaiveDate, summary: &ReviewSummary) -> String {
    format!(
        "📘 Review | {date}\n\n\
         spread hit rate: {:.1}%\n\
         total hit rate: {:.1}%\n\
         ROI: {:.1}%\n\
         CLV (open): {:.2}\n\
         CLV (close): {:.2}",
        summary.spread_hit_rate * 100.0,
        summary.total_hit_rate * 100.0,
        summary.roi * 100.0,
        summary.avg_clv_open,
        summary.avg_clv_close
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{SpreadPick, TotalPick};
    use approx::assert_relative_eq;

    fn pred(spread_pick: SpreadPick, total_pick: TotalPick) -> PredictionRecord {
        PredictionRecord {
            id: None,
            game_id: 1,
            predicted_at: Utc::now(),
            spread_pick,
            spread_prob: 0.58,
            total_pick,
            total_prob: 0.53,
            spread_edge: 8.0,
            total_edge: 3.0,
            confidence_score: 0.6,
            star_rating: 2,
            recommendation_index: 60.0,
            expected_home_score: 112.0,
            expected_visitor_score: 106.0,
            predicted_margin: 6.0,
            predicted_total: 218.0,
            simulation_variance: 260.0,
            simulation_count: 10000,
            opening_spread: Some(-4.5),
            live_spread: Some(-6.0),
            opening_total: Some(219.0),
            live_total: Some(218.0),
            model_version: "v3".into(),
            is_final: true,
        }
    }

    #[test]
    fn grading_uses_live_line_and_clv_formulas() {
        // home wins by 8 against -6: home covers, 226 total goes over 218
        let r = grade_prediction(
            &pred(SpreadPick::Home, TotalPick::Over),
            117,
            109,
            Some(-6.5),
            Some(217.5),
        );
        assert!(r.spread_correct);
        assert!(r.total_correct);
        assert_eq!(r.closing_spread, Some(-6.5));
        assert_relative_eq!(r.clv_open, 1.5);
        assert_relative_eq!(r.clv_close, (-6.0f64 - 8.0).abs());
    }

    #[test]
    fn grading_without_lines_is_incorrect_but_recorded() {
        let mut p = pred(SpreadPick::Home, TotalPick::Under);
        p.opening_spread = None;
        p.live_spread = None;
        p.live_total = None;
        let r = grade_prediction(&p, 110, 100, None, None);
        assert!(!r.spread_correct);
        assert!(!r.total_correct);
        assert_relative_eq!(r.clv_open, 0.0);
        assert_relative_eq!(r.clv_close, 0.0);
    }

    #[test]
    fn summary_hit_rates_and_roi() {
        let mut a = grade_prediction(&pred(SpreadPick::Home, TotalPick::Over), 117, 109, None, None);
        let mut b = grade_prediction(&pred(SpreadPick::Home, TotalPick::Over), 100, 110, None, None);
        a.clv_open = 1.0;
        b.clv_open = 3.0;
        let s = summarize(&[a, b]);
        assert_eq!(s.reviewed, 2);
        assert_relative_eq!(s.spread_hit_rate, 0.5);
        assert_relative_eq!(s.total_hit_rate, 0.5);
        // half the combined picks hit: break-even at even juice
        assert_relative_eq!(s.roi, 0.0);
        assert_relative_eq!(s.avg_clv_open, 2.0);
    }

    #[test]
    fn empty_summary_is_zeroed() {
        let s = summarize(&[]);
        assert_eq!(s.reviewed, 0);
        assert_relative_eq!(s.roi, 0.0);
    }
}
