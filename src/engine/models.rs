//! Score models and the bundle lifecycle: train, persist, restore, blend.

use anyhow::{Context, Result};
use nalgebra::{DMatrix, DVector};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifacts::{LocalArtifactStore, RemoteStore};
use crate::db::models::ModelHistoryRow;
use crate::db::Database;
use crate::engine::features::{FeatureBuilder, TrainingFrame, FEATURE_COLUMNS};
use crate::engine::EngineError;

/// Minimum feature-schema width; training refuses narrower frames.
pub const MIN_FEATURE_COUNT: usize = 30;

/// Hybrid blend weights: simulation first, classifier second.
const MC_WEIGHT: f64 = 0.6;
const CLASSIFIER_WEIGHT: f64 = 0.4;

const RIDGE_LAMBDA: f64 = 1.0;
const LOGISTIC_ITERATIONS: usize = 300;
const LOGISTIC_LEARNING_RATE: f64 = 0.1;
const SPLIT_SEED: u64 = 42;
const TEST_FRACTION: f64 = 0.2;

/// Column-wise standardization fitted on training data and replayed at
/// inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standardizer {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Standardizer {
    fn fit(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let n = rows.len() as f64;
        let mut means = vec![0.0; cols];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }
        let mut stds = vec![0.0; cols];
        for row in rows {
            for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        for s in &mut stds {
            *s = (*s / n).sqrt();
            if *s < 1e-9 {
                *s = 1.0;
            }
        }
        Standardizer { means, stds }
    }

    fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(&self.means)
            .zip(&self.stds)
            .map(|((v, m), s)| (v - m) / s)
            .collect()
    }
}

/// Ridge regression fitted by normal equations on standardized features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegressor {
    standardizer: Standardizer,
    weights: Vec<f64>,
    intercept: f64,
}

impl RidgeRegressor {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], lambda: f64) -> Result<Self> {
        let n = rows.len();
        let k = rows.first().map_or(0, Vec::len);
        anyhow::ensure!(n > 0 && k > 0, "ridge fit requires a non-empty frame");

        let standardizer = Standardizer::fit(rows);
        let intercept = targets.iter().sum::<f64>() / n as f64;

        let mut flat = Vec::with_capacity(n * k);
        for row in rows {
            flat.extend(standardizer.transform(row));
        }
        let x = DMatrix::from_row_slice(n, k, &flat);
        let y = DVector::from_iterator(n, targets.iter().map(|t| t - intercept));

        let mut xtx = x.transpose() * &x;
        for i in 0..k {
            xtx[(i, i)] += lambda;
        }
        let xty = x.transpose() * y;
        let weights = xtx
            .cholesky()
            .map(|c| c.solve(&xty))
            .context("ridge normal equations not positive definite")?;

        Ok(RidgeRegressor {
            standardizer,
            weights: weights.iter().copied().collect(),
            intercept,
        })
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        let z = self.standardizer.transform(features);
        self.intercept
            + z.iter()
                .zip(&self.weights)
                .map(|(a, b)| a * b)
                .sum::<f64>()
    }
}

/// Binary classifier fitted by batch gradient descent on standardized
/// features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticClassifier {
    standardizer: Standardizer,
    weights: Vec<f64>,
    intercept: f64,
}

impl LogisticClassifier {
    pub fn fit(rows: &[Vec<f64>], labels: &[f64]) -> Result<Self> {
        let n = rows.len();
        let k = rows.first().map_or(0, Vec::len);
        anyhow::ensure!(n > 0 && k > 0, "logistic fit requires a non-empty frame");

        let standardizer = Standardizer::fit(rows);
        let z_rows: Vec<Vec<f64>> = rows.iter().map(|r| standardizer.transform(r)).collect();

        let mut weights = vec![0.0; k];
        let mut intercept = 0.0;
        for _ in 0..LOGISTIC_ITERATIONS {
            let mut grad_w = vec![0.0; k];
            let mut grad_b = 0.0;
            for (row, &label) in z_rows.iter().zip(labels) {
                let p = sigmoid(
                    intercept
                        + row
                            .iter()
                            .zip(&weights)
                            .map(|(a, b)| a * b)
                            .sum::<f64>(),
                );
                let err = p - label;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }
            let scale = LOGISTIC_LEARNING_RATE / n as f64;
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= scale * g;
            }
            intercept -= scale * grad_b;
        }

        Ok(LogisticClassifier {
            standardizer,
            weights,
            intercept,
        })
    }

    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        let z = self.standardizer.transform(features);
        sigmoid(
            self.intercept
                + z.iter()
                    .zip(&self.weights)
                    .map(|(a, b)| a * b)
                    .sum::<f64>(),
        )
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Held-out evaluation of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub home_mae: f64,
    pub home_rmse: f64,
    pub away_mae: f64,
    pub away_rmse: f64,
    pub spread_cover_accuracy: f64,
    pub total_over_accuracy: f64,
}

/// How the current bundle was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BundleSource {
    #[default]
    Cached,
    Restored,
    Trained,
}

impl BundleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleSource::Cached => "cached",
            BundleSource::Restored => "restored",
            BundleSource::Trained => "trained",
        }
    }
}

/// The four model artifacts plus training metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub home_model: RidgeRegressor,
    pub away_model: RidgeRegressor,
    pub spread_classifier: Option<LogisticClassifier>,
    pub total_classifier: Option<LogisticClassifier>,
    pub algorithm: String,
    pub version: String,
    pub metrics: Option<TrainingMetrics>,
    pub sample_count: usize,
    pub feature_count: usize,
    #[serde(skip)]
    pub source: BundleSource,
}

impl ModelBundle {
    /// Score variance fed to the simulator, from held-out RMSE. Bundles
    /// restored without metrics fall back to a league-typical spread.
    pub fn home_variance(&self) -> f64 {
        self.metrics
            .as_ref()
            .map_or(64.0, |m| m.home_rmse.powi(2))
    }

    pub fn away_variance(&self) -> f64 {
        self.metrics
            .as_ref()
            .map_or(64.0, |m| m.away_rmse.powi(2))
    }
}

/// Blend a simulation probability with a classifier probability.
/// Simulation alone when no classifier is available.
pub fn blend_probability(simulation_prob: f64, classifier_prob: Option<f64>) -> f64 {
    match classifier_prob {
        Some(cls) => MC_WEIGHT * simulation_prob + CLASSIFIER_WEIGHT * cls,
        None => simulation_prob,
    }
}

/// Owns the cached → restored → trained model lifecycle.
pub struct ModelLifecycleManager {
    db: Database,
    builder: FeatureBuilder,
    local: LocalArtifactStore,
    remote: Box<dyn RemoteStore>,
    retrain_batch_size: i64,
    degradation_threshold: f64,
    review_window: usize,
}

/// Degradation gate needs at least this many reviews before it can fire.
const MIN_REVIEWS_FOR_DEGRADATION: usize = 10;

impl ModelLifecycleManager {
    pub fn new(
        db: Database,
        local: LocalArtifactStore,
        remote: Box<dyn RemoteStore>,
        retrain_batch_size: i64,
        degradation_threshold: f64,
        review_window: usize,
    ) -> Self {
        let builder = FeatureBuilder::new(db.clone());
        ModelLifecycleManager {
            db,
            builder,
            local,
            remote,
            retrain_batch_size,
            degradation_threshold,
            review_window,
        }
    }

    /// Whether the current bundle should be rebuilt: an explicit request,
    /// a backlog of unreviewed finished games, or degraded recent
    /// hit-rate. A missing bundle is handled by `ensure_models` itself.
    pub fn should_retrain(&self, force: bool) -> Result<bool> {
        if force {
            return Ok(true);
        }

        let pending = self.db.count_unreviewed_finished()?;
        if pending >= self.retrain_batch_size {
            info!(pending, "retrain triggered by unreviewed backlog");
            return Ok(true);
        }

        let reviews = self.db.recent_reviews(self.review_window)?;
        if reviews.len() >= MIN_REVIEWS_FOR_DEGRADATION {
            let hits: usize = reviews
                .iter()
                .map(|r| usize::from(r.spread_correct) + usize::from(r.total_correct))
                .sum();
            let hit_rate = hits as f64 / (2 * reviews.len()) as f64;
            if hit_rate < self.degradation_threshold {
                warn!(hit_rate, "retrain triggered by performance degradation");
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Resolve the current model bundle: local cache, then remote
    /// restore, then training. An explicit or policy-driven retrain
    /// skips straight to training.
    pub async fn ensure_models(&self, force: bool) -> Result<ModelBundle> {
        if !self.should_retrain(force)? {
            if let Some(mut bundle) = self.local.load_bundle()? {
                bundle.source = BundleSource::Cached;
                info!(version = %bundle.version, "using cached model bundle");
                return Ok(bundle);
            }
            match self.remote.download().await {
                Ok(Some(mut bundle)) => {
                    self.local.save_bundle(&bundle)?;
                    bundle.source = BundleSource::Restored;
                    info!(version = %bundle.version, "restored model bundle from remote store");
                    return Ok(bundle);
                }
                Ok(None) => {}
                Err(e) => warn!("remote restore failed, falling back to training: {e:#}"),
            }
        }
        self.train_models().await
    }

    /// Full training run: frame, fit, evaluate, persist locally and
    /// remotely. A failed remote upload fails the whole call.
    pub async fn train_models(&self) -> Result<ModelBundle> {
        let feature_count = FEATURE_COLUMNS.len();
        if feature_count < MIN_FEATURE_COUNT {
            return Err(EngineError::SchemaViolation {
                got: feature_count,
                min: MIN_FEATURE_COUNT,
            }
            .into());
        }

        let frame = self.builder.build_training_frame()?;
        if frame.is_empty() {
            return Err(EngineError::EmptyTrainingFrame.into());
        }
        let sample_count = frame.len();
        info!(
            samples = sample_count,
            features = feature_count,
            first_game = frame.game_ids.first().copied().unwrap_or_default(),
            "training model bundle"
        );

        let version = self.local.bump_version()?;
        let (train_idx, test_idx) = split_indices(sample_count);
        let train_rows = select(&frame.rows, &train_idx);
        let yh_train = select(&frame.home_scores, &train_idx);
        let ya_train = select(&frame.away_scores, &train_idx);

        let home_model = RidgeRegressor::fit(&train_rows, &yh_train, RIDGE_LAMBDA)?;
        let away_model = RidgeRegressor::fit(&train_rows, &ya_train, RIDGE_LAMBDA)?;

        let (spread_labels, total_labels) = derive_labels(&frame);
        let spread_classifier =
            LogisticClassifier::fit(&train_rows, &select(&spread_labels, &train_idx))?;
        let total_classifier =
            LogisticClassifier::fit(&train_rows, &select(&total_labels, &train_idx))?;

        // Evaluate on the held-out split; tiny frames fall back to train
        let eval_idx = if test_idx.is_empty() { &train_idx } else { &test_idx };
        let metrics = evaluate(
            &frame,
            eval_idx,
            &home_model,
            &away_model,
            &spread_classifier,
            &total_classifier,
            &spread_labels,
            &total_labels,
        );
        info!(
            home_mae = metrics.home_mae,
            home_rmse = metrics.home_rmse,
            away_mae = metrics.away_mae,
            away_rmse = metrics.away_rmse,
            spread_acc = metrics.spread_cover_accuracy,
            total_acc = metrics.total_over_accuracy,
            version = %version,
            "model bundle trained"
        );

        let bundle = ModelBundle {
            home_model,
            away_model,
            spread_classifier: Some(spread_classifier),
            total_classifier: Some(total_classifier),
            algorithm: "ridge+logistic".into(),
            version: version.clone(),
            metrics: Some(metrics.clone()),
            sample_count,
            feature_count,
            source: BundleSource::Trained,
        };

        self.local.save_bundle(&bundle)?;
        self.remote.upload(&bundle).await.map_err(|e| {
            EngineError::ArtifactUnavailable(format!("remote upload failed: {e:#}"))
        })?;

        self.db.log_model(&ModelHistoryRow {
            id: None,
            trained_at: chrono::Utc::now(),
            model_type: "score_and_cover".into(),
            algorithm: bundle.algorithm.clone(),
            data_points: sample_count as i64,
            metrics_json: serde_json::to_string(&metrics)?,
            artifact_path: self.local.dir_display(),
        })?;

        Ok(bundle)
    }
}

/// Deterministic shuffled 80/20 split.
fn split_indices(n: usize) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(SPLIT_SEED);
    idx.shuffle(&mut rng);
    let test_len = ((n as f64) * TEST_FRACTION).floor() as usize;
    let test = idx[..test_len].to_vec();
    let train = idx[test_len..].to_vec();
    (train, test)
}

fn select<T: Clone>(values: &[T], idx: &[usize]) -> Vec<T> {
    idx.iter().map(|&i| values[i].clone()).collect()
}

/// Spread label is a home-win proxy; historical closing lines are too
/// sparse to grade against. Total label is over the sample median.
fn derive_labels(frame: &TrainingFrame) -> (Vec<f64>, Vec<f64>) {
    let spread: Vec<f64> = frame
        .home_scores
        .iter()
        .zip(&frame.away_scores)
        .map(|(h, a)| if h - a > 0.0 { 1.0 } else { 0.0 })
        .collect();
    let totals: Vec<f64> = frame
        .home_scores
        .iter()
        .zip(&frame.away_scores)
        .map(|(h, a)| h + a)
        .collect();
    let med = median(&totals);
    let total = totals
        .iter()
        .map(|t| if *t > med { 1.0 } else { 0.0 })
        .collect();
    (spread, total)
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[allow(clippy::too_many_arguments)]
fn evaluate(
    frame: &TrainingFrame,
    idx: &[usize],
    home_model: &RidgeRegressor,
    away_model: &RidgeRegressor,
    spread_classifier: &LogisticClassifier,
    total_classifier: &LogisticClassifier,
    spread_labels: &[f64],
    total_labels: &[f64],
) -> TrainingMetrics {
    let n = idx.len() as f64;
    let mut home_abs = 0.0;
    let mut home_sq = 0.0;
    let mut away_abs = 0.0;
    let mut away_sq = 0.0;
    let mut spread_hits = 0usize;
    let mut total_hits = 0usize;

    for &i in idx {
        let row = &frame.rows[i];
        let he = home_model.predict(row) - frame.home_scores[i];
        let ae = away_model.predict(row) - frame.away_scores[i];
        home_abs += he.abs();
        home_sq += he * he;
        away_abs += ae.abs();
        away_sq += ae * ae;

        let sp = if spread_classifier.predict_proba(row) > 0.5 { 1.0 } else { 0.0 };
        let tp = if total_classifier.predict_proba(row) > 0.5 { 1.0 } else { 0.0 };
        if sp == spread_labels[i] {
            spread_hits += 1;
        }
        if tp == total_labels[i] {
            total_hits += 1;
        }
    }

    TrainingMetrics {
        home_mae: home_abs / n,
        home_rmse: (home_sq / n).sqrt(),
        away_mae: away_abs / n,
        away_rmse: (away_sq / n).sqrt(),
        spread_cover_accuracy: spread_hits as f64 / n,
        total_over_accuracy: total_hits as f64 / n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{LocalArtifactStore, NoopRemoteStore};
    use crate::db::models::Game;
    use approx::assert_relative_eq;

    fn seeded_db(dir: &tempfile::TempDir) -> Database {
        let path = dir.path().join("test.db");
        let db = Database::open(path.to_str().unwrap()).expect("open db");
        for i in 0..12i64 {
            db.upsert_game(&Game {
                game_id: i,
                season: Some(2025),
                date: format!("2025-01-{:02}", i + 1).parse().unwrap(),
                status: "Final".into(),
                home_team_id: 1 + (i % 4),
                visitor_team_id: 5 + (i % 4),
                home_score: Some(100 + (i as i32 * 3) % 20),
                visitor_score: Some(98 + (i as i32 * 5) % 18),
            })
            .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn ensure_models_is_idempotent_without_new_data() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(&dir);
        let local = LocalArtifactStore::new(dir.path().join("models"));
        let manager = ModelLifecycleManager::new(
            db.clone(),
            local,
            Box::new(NoopRemoteStore),
            1000,
            0.45,
            30,
        );

        let trained = manager.ensure_models(false).await.unwrap();
        assert_eq!(trained.source, BundleSource::Trained);
        let logged = db.latest_model_history().unwrap().unwrap();

        // repeated calls with no new data stay on the cached bundle
        let second = manager.ensure_models(false).await.unwrap();
        let third = manager.ensure_models(false).await.unwrap();
        assert_eq!(second.source, BundleSource::Cached);
        assert_eq!(third.source, BundleSource::Cached);
        assert_eq!(second.version, trained.version);
        assert_eq!(third.version, trained.version);

        // and no further training runs were logged
        let latest = db.latest_model_history().unwrap().unwrap();
        assert_eq!(latest.id, logged.id);
    }

    #[test]
    fn blend_uses_fixed_weights() {
        assert_relative_eq!(blend_probability(0.6, Some(0.5)), 0.6 * 0.6 + 0.4 * 0.5);
        assert_relative_eq!(blend_probability(0.6, None), 0.6);
    }

    #[test]
    fn ridge_recovers_a_linear_signal() {
        // y = 3x0 - 2x1 + 100 with a little structure in the inputs
        let rows: Vec<Vec<f64>> = (0..60)
            .map(|i| vec![i as f64, (i % 7) as f64, 1.5])
            .collect();
        let targets: Vec<f64> = rows.iter().map(|r| 3.0 * r[0] - 2.0 * r[1] + 100.0).collect();
        let model = RidgeRegressor::fit(&rows, &targets, 0.01).unwrap();
        for (row, target) in rows.iter().zip(&targets).step_by(9) {
            assert_relative_eq!(model.predict(row), *target, epsilon = 1.0);
        }
    }

    #[test]
    fn ridge_handles_constant_columns() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 5.0]).collect();
        let targets: Vec<f64> = (0..20).map(|i| 2.0 * i as f64).collect();
        let model = RidgeRegressor::fit(&rows, &targets, 1.0).unwrap();
        assert!(model.predict(&[10.0, 5.0]).is_finite());
    }

    #[test]
    fn logistic_separates_an_easy_problem() {
        let rows: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64 - 50.0]).collect();
        let labels: Vec<f64> = rows.iter().map(|r| if r[0] > 0.0 { 1.0 } else { 0.0 }).collect();
        let model = LogisticClassifier::fit(&rows, &labels).unwrap();
        assert!(model.predict_proba(&[40.0]) > 0.8);
        assert!(model.predict_proba(&[-40.0]) < 0.2);
    }

    #[test]
    fn split_is_deterministic_and_disjoint() {
        let (train_a, test_a) = split_indices(100);
        let (train_b, test_b) = split_indices(100);
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(test_a.len(), 20);
        assert_eq!(train_a.len(), 80);
        for i in &test_a {
            assert!(!train_a.contains(i));
        }
    }

    #[test]
    fn median_even_and_odd() {
        assert_relative_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_relative_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
