use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// NBA spread/total prediction engine
#[derive(Parser, Debug, Clone)]
#[command(name = "courtside", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub task: Task,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "courtside.db")]
    pub database_path: String,

    /// Directory holding serialized model artifacts
    #[arg(long, env = "MODEL_DIR", default_value = "models")]
    pub model_dir: String,

    /// Schedule/odds API base URL
    #[arg(long, env = "API_BASE_URL", default_value = "https://api.balldontlie.io/v1")]
    pub api_base_url: String,

    /// Schedule/odds API key
    #[arg(long, env = "API_KEY")]
    pub api_key: String,

    /// Remote artifact store base URL (omit for local-only runs)
    #[arg(long, env = "REMOTE_STORE_URL")]
    pub remote_store_url: Option<String>,

    /// Remote artifact store API key
    #[arg(long, env = "REMOTE_STORE_KEY")]
    pub remote_store_key: Option<String>,

    /// Telegram bot token (omit to disable notifications)
    #[arg(long, env = "TELEGRAM_BOT_TOKEN")]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat to notify
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// Bankroll used for stake sizing (USD)
    #[arg(long, env = "BANKROLL", default_value = "10000.0")]
    pub bankroll: f64,

    /// Kelly multiplier (0.0–1.0)
    #[arg(long, env = "KELLY_FRACTION", default_value = "0.5")]
    pub kelly_fraction: f64,

    /// Monte Carlo draws per game
    #[arg(long, env = "N_SIM", default_value = "10000")]
    pub n_sim: usize,

    /// Minimum acceptable draws per game
    #[arg(long, env = "MIN_SIM", default_value = "10000")]
    pub min_sim: usize,

    /// Unreviewed finished games that trigger a retrain
    #[arg(long, env = "RETRAIN_BATCH_SIZE", default_value = "50")]
    pub retrain_batch_size: i64,

    /// Combined hit-rate below which the model is considered degraded
    #[arg(long, env = "DEGRADATION_THRESHOLD", default_value = "0.45")]
    pub degradation_threshold: f64,

    /// Recent reviews inspected by the degradation gate
    #[arg(long, env = "REVIEW_WINDOW", default_value = "30")]
    pub review_window: usize,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Task {
    /// Predict the slate for a date (default: today, UTC)
    Predict {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Review finished games for a date (default: today, UTC)
    Review {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Train a fresh model bundle
    Train {
        /// Retrain even when the current bundle looks healthy
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// Print model lineage and recent performance
    Status,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            anyhow::bail!("API_KEY is required");
        }
        if !(0.0..=1.0).contains(&self.kelly_fraction) {
            anyhow::bail!("kelly_fraction must be between 0.0 and 1.0");
        }
        if self.bankroll <= 0.0 {
            anyhow::bail!("bankroll must be positive");
        }
        if self.n_sim < self.min_sim {
            anyhow::bail!("n_sim must be at least min_sim");
        }
        if !(0.0..=1.0).contains(&self.degradation_threshold) {
            anyhow::bail!("degradation_threshold must be between 0.0 and 1.0");
        }
        if self.remote_store_key.is_some() && self.remote_store_url.is_none() {
            anyhow::bail!("REMOTE_STORE_KEY is set but REMOTE_STORE_URL is missing");
        }
        Ok(())
    }
}
