use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One scheduled or finished game between a home and a visiting team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    /// Upstream provider game ID
    pub game_id: i64,
    pub season: Option<i32>,
    pub date: NaiveDate,
    /// Raw provider status string; "Final…" marks a finished game
    pub status: String,
    pub home_team_id: i64,
    pub visitor_team_id: i64,
    pub home_score: Option<i32>,
    pub visitor_score: Option<i32>,
}

impl Game {
    /// Finished games carry a "Final" status prefix (e.g. "Final", "Final/OT").
    pub fn is_final(&self) -> bool {
        self.status.starts_with("Final")
    }
}

/// Which side of the spread a prediction backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpreadPick {
    /// Home team covers the spread (lays the points)
    Home,
    /// Visitor covers (takes the points)
    Away,
}

impl SpreadPick {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpreadPick::Home => "home",
            SpreadPick::Away => "away",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "home" => Some(SpreadPick::Home),
            "away" => Some(SpreadPick::Away),
            _ => None,
        }
    }
}

/// Over/under side of the total-points line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TotalPick {
    Over,
    Under,
}

impl TotalPick {
    pub fn as_str(&self) -> &'static str {
        match self {
            TotalPick::Over => "over",
            TotalPick::Under => "under",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "over" => Some(TotalPick::Over),
            "under" => Some(TotalPick::Under),
            _ => None,
        }
    }
}

/// One prediction run for one game. At most one row per game carries
/// `is_final = true`; inserting a newer prediction demotes the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: Option<i64>,
    pub game_id: i64,
    pub predicted_at: DateTime<Utc>,
    pub spread_pick: SpreadPick,
    pub spread_prob: f64,
    pub total_pick: TotalPick,
    pub total_prob: f64,
    /// Blended-probability edge vs the 50% implied line, in percent
    pub spread_edge: f64,
    pub total_edge: f64,
    pub confidence_score: f64,
    pub star_rating: i64,
    pub recommendation_index: f64,
    pub expected_home_score: f64,
    pub expected_visitor_score: f64,
    pub predicted_margin: f64,
    pub predicted_total: f64,
    pub simulation_variance: f64,
    pub simulation_count: i64,
    pub opening_spread: Option<f64>,
    pub live_spread: Option<f64>,
    pub opening_total: Option<f64>,
    pub live_total: Option<f64>,
    pub model_version: String,
    /// Whether this is the most recent prediction for the game
    pub is_final: bool,
}

/// Post-game review of one predicted game. Written once the game is final;
/// re-reviewing the same game upserts rather than duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub game_id: i64,
    pub reviewed_at: DateTime<Utc>,
    pub spread_pick: SpreadPick,
    pub total_pick: TotalPick,
    pub spread_correct: bool,
    pub total_correct: bool,
    pub final_home_score: i32,
    pub final_visitor_score: i32,
    pub closing_spread: Option<f64>,
    pub closing_total: Option<f64>,
    /// |opening spread − closing spread|: how far the market moved
    pub clv_open: f64,
    /// |closing spread − realized margin|: closing-line efficiency
    pub clv_close: f64,
}

/// Which point in the odds timeline a snapshot was captured at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    Opening,
    Live,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::Opening => "opening",
            LineType::Live => "live",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "opening" => Some(LineType::Opening),
            "live" => Some(LineType::Live),
            _ => None,
        }
    }
}

/// A captured market line for one game.
#[derive(Debug, Clone)]
pub struct OddsSnapshot {
    pub id: Option<i64>,
    pub game_id: i64,
    pub captured_at: DateTime<Utc>,
    pub line_type: LineType,
    /// Home spread (negative = home favored)
    pub spread_home: Option<f64>,
    pub total_line: Option<f64>,
    pub bookmaker: Option<String>,
}

/// Training-log row for one persisted model artifact.
#[derive(Debug, Clone)]
pub struct ModelHistoryRow {
    pub id: Option<i64>,
    pub trained_at: DateTime<Utc>,
    pub model_type: String,
    pub algorithm: String,
    pub data_points: i64,
    pub metrics_json: String,
    pub artifact_path: String,
}
