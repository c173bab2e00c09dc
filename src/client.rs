//! Schedule and odds API client (balldontlie-style JSON API with cursor
//! pagination).

use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::db::models::Game;

/// Spread/total pulled from one odds payload.
#[derive(Debug, Clone, Default)]
pub struct MainMarket {
    pub spread_home: Option<f64>,
    pub total_line: Option<f64>,
    pub bookmaker: Option<String>,
}

pub struct ScheduleClient {
    http: Client,
    api_key: String,
    /// Base URL for overriding in tests
    base_url: String,
}

impl ScheduleClient {
    pub fn new(http: Client, api_key: String, base_url: String) -> Self {
        ScheduleClient {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// All games scheduled on a date.
    pub async fn games_on_date(&self, date: NaiveDate) -> Result<Vec<Game>> {
        let pages = self
            .fetch_all_pages("/games", &[("dates[]", date.to_string())])
            .await?;
        Ok(pages.iter().filter_map(parse_game).collect())
    }

    /// All games of a season (historical bootstrap).
    pub async fn games_for_season(&self, season: i32) -> Result<Vec<Game>> {
        let pages = self
            .fetch_all_pages("/games", &[("seasons[]", season.to_string())])
            .await?;
        Ok(pages.iter().filter_map(parse_game).collect())
    }

    /// Current main-market lines for one game.
    pub async fn betting_odds(&self, game_id: i64) -> Result<MainMarket> {
        let pages = self
            .fetch_all_pages("/betting_odds", &[("game_ids[]", game_id.to_string())])
            .await?;
        Ok(parse_main_market(&pages))
    }

    async fn fetch_all_pages(&self, path: &str, params: &[(&str, String)]) -> Result<Vec<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        // hard page cap keeps a bad cursor from looping forever
        for _ in 0..100 {
            let mut req = self
                .http
                .get(&url)
                .header("Authorization", &self.api_key)
                .query(params)
                .query(&[("per_page", "100")]);
            if let Some(c) = &cursor {
                req = req.query(&[("cursor", c.as_str())]);
            }
            debug!(%url, ?cursor, "fetching page");
            let payload: Value = req
                .send()
                .await
                .context("schedule API request failed")?
                .error_for_status()
                .context("schedule API returned an error")?
                .json()
                .await
                .context("schedule API returned invalid JSON")?;

            if let Some(data) = payload["data"].as_array() {
                out.extend(data.iter().cloned());
            }
            cursor = payload["meta"]["next_cursor"]
                .as_str()
                .map(str::to_string)
                .or_else(|| payload["meta"]["next_cursor"].as_i64().map(|v| v.to_string()));
            if cursor.is_none() {
                break;
            }
        }
        Ok(out)
    }
}

fn parse_game(raw: &Value) -> Option<Game> {
    Some(Game {
        game_id: raw["id"].as_i64()?,
        season: raw["season"].as_i64().map(|s| s as i32),
        date: raw["date"].as_str()?.get(..10)?.parse().ok()?,
        status: raw["status"].as_str().unwrap_or("Scheduled").to_string(),
        home_team_id: raw["home_team"]["id"].as_i64()?,
        visitor_team_id: raw["visitor_team"]["id"].as_i64()?,
        home_score: raw["home_team_score"].as_i64().map(|v| v as i32),
        visitor_score: raw["visitor_team_score"].as_i64().map(|v| v as i32),
    })
}

/// Extract the first market's home spread and total line. Non-numeric
/// line values degrade to missing rather than failing the game.
pub fn parse_main_market(markets: &[Value]) -> MainMarket {
    let Some(first) = markets.first() else {
        return MainMarket::default();
    };
    let spread_home = as_f64(&first["spread_home"]).or_else(|| as_f64(&first["home_spread"]));
    let total_line = as_f64(&first["total"]).or_else(|| as_f64(&first["total_line"]));
    let bookmaker = first["bookmaker"].as_str().map(str::to_string);
    MainMarket {
        spread_home,
        total_line,
        bookmaker,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_game_payload() {
        let raw = json!({
            "id": 1234,
            "season": 2025,
            "date": "2026-01-15T00:00:00.000Z",
            "status": "Final",
            "home_team": {"id": 14, "full_name": "Los Angeles Lakers"},
            "visitor_team": {"id": 2, "full_name": "Boston Celtics"},
            "home_team_score": 112,
            "visitor_team_score": 106
        });
        let game = parse_game(&raw).unwrap();
        assert_eq!(game.game_id, 1234);
        assert_eq!(game.date.to_string(), "2026-01-15");
        assert!(game.is_final());
        assert_eq!(game.home_score, Some(112));
    }

    #[test]
    fn skips_malformed_game_payload() {
        let raw = json!({"id": "not-a-number"});
        assert!(parse_game(&raw).is_none());
    }

    #[test]
    fn main_market_reads_first_entry_with_fallback_keys() {
        let markets = vec![json!({
            "home_spread": "-4.5",
            "total_line": 219.5,
            "bookmaker": "book-a"
        })];
        let m = parse_main_market(&markets);
        assert_eq!(m.spread_home, Some(-4.5));
        assert_eq!(m.total_line, Some(219.5));
        assert_eq!(m.bookmaker.as_deref(), Some("book-a"));
    }

    #[test]
    fn main_market_tolerates_garbage_values() {
        let markets = vec![json!({"spread_home": "n/a", "total": null})];
        let m = parse_main_market(&markets);
        assert_eq!(m.spread_home, None);
        assert_eq!(m.total_line, None);

        assert!(parse_main_market(&[]).spread_home.is_none());
    }
}
