use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::time::Duration;
use tracing::info;

mod artifacts;
mod client;
mod config;
mod db;
mod engine;
mod notify;

use artifacts::{HttpArtifactStore, LocalArtifactStore, NoopRemoteStore, RemoteStore};
use client::ScheduleClient;
use config::{Config, Task};
use db::Database;
use engine::models::ModelLifecycleManager;
use engine::predictor::{PredictionOrchestrator, RunSettings};
use engine::review::ReviewEngine;
use notify::{Notifier, NoopNotifier, TelegramNotifier};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let schedule = ScheduleClient::new(
        http.clone(),
        config.api_key.clone(),
        config.api_base_url.clone(),
    );

    let local = LocalArtifactStore::new(&config.model_dir);
    let remote: Box<dyn RemoteStore> = match &config.remote_store_url {
        Some(url) => Box::new(HttpArtifactStore::new(
            http.clone(),
            url.clone(),
            config.remote_store_key.clone(),
        )),
        None => Box::new(NoopRemoteStore),
    };
    let lifecycle = ModelLifecycleManager::new(
        db.clone(),
        local,
        remote,
        config.retrain_batch_size,
        config.degradation_threshold,
        config.review_window,
    );

    let notifier: Box<dyn Notifier> = match (&config.telegram_bot_token, &config.telegram_chat_id)
    {
        (Some(token), Some(chat)) => Box::new(TelegramNotifier::new(
            http.clone(),
            token.clone(),
            chat.clone(),
        )),
        _ => Box::new(NoopNotifier),
    };

    match config.task {
        Task::Predict { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let settings = RunSettings {
                n_sim: config.n_sim,
                min_sim: config.min_sim,
                bankroll: config.bankroll,
                kelly_fraction: config.kelly_fraction,
            };
            let orchestrator =
                PredictionOrchestrator::new(db, schedule, lifecycle, notifier, settings);
            orchestrator.run_prediction(date).await?;
        }
        Task::Review { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let engine = ReviewEngine::new(db, schedule, lifecycle, notifier);
            engine.run_review(date).await?;
        }
        Task::Train { force } => {
            let bundle = lifecycle.ensure_models(force).await?;
            info!(
                version = %bundle.version,
                source = bundle.source.as_str(),
                samples = bundle.sample_count,
                "model bundle ready"
            );
        }
        Task::Status => {
            let engine = ReviewEngine::new(db, schedule, lifecycle, notifier);
            println!("{}", engine.model_status()?);
        }
    }

    Ok(())
}
