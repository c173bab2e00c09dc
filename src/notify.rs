//! Outbound notifications. Delivery is fire-and-forget: a failed send is
//! logged and never fails the run that produced the digest.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::warn;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;

    /// Send and swallow failures with a warning.
    async fn send_best_effort(&self, text: &str) {
        if let Err(e) = self.send(text).await {
            warn!("notification delivery failed: {e:#}");
        }
    }
}

/// Telegram bot channel.
pub struct TelegramNotifier {
    http: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(http: Client, bot_token: String, chat_id: String) -> Self {
        TelegramNotifier {
            http,
            bot_token,
            chat_id,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let resp = self
            .http
            .post(&url)
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await
            .context("Telegram request failed")?;
        resp.error_for_status()
            .context("Telegram rejected message")?;
        Ok(())
    }
}

/// No-op channel for runs without notification credentials.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}
