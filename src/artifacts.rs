//! Model artifact persistence: a local JSON directory plus an optional
//! HTTP remote store that survives redeploys.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::engine::features::FEATURE_COLUMNS;
use crate::engine::models::{LogisticClassifier, ModelBundle, RidgeRegressor};

const HOME_MODEL_FILE: &str = "home_model.json";
const AWAY_MODEL_FILE: &str = "away_model.json";
const SPREAD_MODEL_FILE: &str = "spread_model.json";
const TOTAL_MODEL_FILE: &str = "total_model.json";
const VERSION_FILE: &str = "model_version.json";

#[derive(Serialize, Deserialize)]
struct VersionMeta {
    version: String,
}

/// Model directory on local disk.
pub struct LocalArtifactStore {
    dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LocalArtifactStore { dir: dir.into() }
    }

    pub fn dir_display(&self) -> String {
        self.dir.display().to_string()
    }

    /// Persisted version tag, if any.
    pub fn current_version(&self) -> Option<String> {
        let raw = fs::read_to_string(self.dir.join(VERSION_FILE)).ok()?;
        serde_json::from_str::<VersionMeta>(&raw)
            .ok()
            .map(|m| m.version)
    }

    /// Increment and persist the version tag, `v2` when starting fresh.
    pub fn bump_version(&self) -> Result<String> {
        let next = match self
            .current_version()
            .and_then(|v| v.trim_start_matches('v').parse::<u64>().ok())
        {
            Some(n) => n + 1,
            None => 2,
        };
        let version = format!("v{next}");
        fs::create_dir_all(&self.dir)?;
        fs::write(
            self.dir.join(VERSION_FILE),
            serde_json::to_string(&VersionMeta {
                version: version.clone(),
            })?,
        )?;
        Ok(version)
    }

    /// Write all artifacts of a bundle. The version file follows the
    /// bundle's own tag so a restored bundle keeps its identity.
    pub fn save_bundle(&self, bundle: &ModelBundle) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        write_json(&self.dir.join(HOME_MODEL_FILE), &bundle.home_model)?;
        write_json(&self.dir.join(AWAY_MODEL_FILE), &bundle.away_model)?;
        if let Some(cls) = &bundle.spread_classifier {
            write_json(&self.dir.join(SPREAD_MODEL_FILE), cls)?;
        }
        if let Some(cls) = &bundle.total_classifier {
            write_json(&self.dir.join(TOTAL_MODEL_FILE), cls)?;
        }
        fs::write(
            self.dir.join(VERSION_FILE),
            serde_json::to_string(&VersionMeta {
                version: bundle.version.clone(),
            })?,
        )?;
        debug!(dir = %self.dir.display(), version = %bundle.version, "bundle saved locally");
        Ok(())
    }

    /// Load the bundle from disk. Both score models must be present;
    /// classifiers are optional.
    pub fn load_bundle(&self) -> Result<Option<ModelBundle>> {
        let home_path = self.dir.join(HOME_MODEL_FILE);
        let away_path = self.dir.join(AWAY_MODEL_FILE);
        if !home_path.exists() || !away_path.exists() {
            return Ok(None);
        }
        let home_model: RidgeRegressor = read_json(&home_path)?;
        let away_model: RidgeRegressor = read_json(&away_path)?;
        let spread_classifier: Option<LogisticClassifier> =
            read_optional(&self.dir.join(SPREAD_MODEL_FILE))?;
        let total_classifier: Option<LogisticClassifier> =
            read_optional(&self.dir.join(TOTAL_MODEL_FILE))?;

        Ok(Some(ModelBundle {
            home_model,
            away_model,
            spread_classifier,
            total_classifier,
            algorithm: "loaded".into(),
            version: self.current_version().unwrap_or_else(|| "unknown".into()),
            metrics: None,
            sample_count: 0,
            feature_count: FEATURE_COLUMNS.len(),
            source: Default::default(),
        }))
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_vec(value)?)
        .with_context(|| format!("writing artifact {}", path.display()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = fs::read(path).with_context(|| format!("reading artifact {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("decoding artifact {}", path.display()))
}

fn read_optional<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Remote bundle storage.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upload(&self, bundle: &ModelBundle) -> Result<()>;
    async fn download(&self) -> Result<Option<ModelBundle>>;
}

/// HTTP remote store keeping the whole bundle as one JSON object.
pub struct HttpArtifactStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpArtifactStore {
    pub fn new(client: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        HttpArtifactStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn bundle_url(&self) -> String {
        format!("{}/model-bundle", self.base_url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpArtifactStore {
    async fn upload(&self, bundle: &ModelBundle) -> Result<()> {
        let resp = self
            .authorize(self.client.put(self.bundle_url()))
            .json(bundle)
            .send()
            .await
            .context("remote store unreachable")?;
        resp.error_for_status()
            .context("remote store rejected bundle upload")?;
        debug!(version = %bundle.version, "bundle uploaded to remote store");
        Ok(())
    }

    async fn download(&self) -> Result<Option<ModelBundle>> {
        let resp = self
            .authorize(self.client.get(self.bundle_url()))
            .send()
            .await
            .context("remote store unreachable")?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bundle = resp
            .error_for_status()
            .context("remote store bundle fetch failed")?
            .json::<ModelBundle>()
            .await
            .context("decoding remote bundle")?;
        Ok(Some(bundle))
    }
}

/// Disabled remote store for local-only runs.
pub struct NoopRemoteStore;

#[async_trait]
impl RemoteStore for NoopRemoteStore {
    async fn upload(&self, _bundle: &ModelBundle) -> Result<()> {
        Ok(())
    }

    async fn download(&self) -> Result<Option<ModelBundle>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::{LogisticClassifier, RidgeRegressor};

    fn tiny_bundle(version: &str) -> ModelBundle {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, 2.0 * i as f64]).collect();
        let targets: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let labels: Vec<f64> = (0..10).map(|i| if i >= 5 { 1.0 } else { 0.0 }).collect();
        ModelBundle {
            home_model: RidgeRegressor::fit(&rows, &targets, 1.0).unwrap(),
            away_model: RidgeRegressor::fit(&rows, &targets, 1.0).unwrap(),
            spread_classifier: Some(LogisticClassifier::fit(&rows, &labels).unwrap()),
            total_classifier: None,
            algorithm: "ridge+logistic".into(),
            version: version.into(),
            metrics: None,
            sample_count: 10,
            feature_count: 2,
            source: Default::default(),
        }
    }

    #[test]
    fn version_bumps_from_fresh_and_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        assert_eq!(store.current_version(), None);
        assert_eq!(store.bump_version().unwrap(), "v2");
        assert_eq!(store.bump_version().unwrap(), "v3");
        assert_eq!(store.current_version().as_deref(), Some("v3"));
    }

    #[test]
    fn bundle_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        assert!(store.load_bundle().unwrap().is_none());

        let bundle = tiny_bundle("v5");
        store.save_bundle(&bundle).unwrap();
        let loaded = store.load_bundle().unwrap().unwrap();
        assert_eq!(loaded.version, "v5");
        assert!(loaded.spread_classifier.is_some());
        assert!(loaded.total_classifier.is_none());
        // identical predictions after the round trip
        let probe = vec![4.0, 8.0];
        assert_eq!(
            loaded.home_model.predict(&probe),
            bundle.home_model.predict(&probe)
        );
    }
}
