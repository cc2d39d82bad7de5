//! Wire types for `GET /api/status`

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Top-level status document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub plan: String,
    pub server_time: String,
    pub data_age_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly: Option<WeeklySection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burn_rate: Option<BurnRateSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionSection>,
}

/// Weekly utilization by model family
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeeklySection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_models: Option<WeeklyAllSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonnet: Option<WeeklyModelSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus: Option<WeeklyModelSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyAllSection {
    pub utilisation_pct: f64,
    pub resets_at: String,
    pub resets_in_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyModelSection {
    pub utilisation_pct: f64,
    pub used_hours: f64,
    pub limit_hours: f64,
    pub resets_at: String,
    pub resets_in_seconds: i64,
}

/// The current five-hour window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSection {
    pub utilisation_pct: f64,
    pub resets_at: String,
    pub resets_in_seconds: i64,
    pub elapsed_seconds: i64,
    pub total_seconds: i64,
    pub remaining_seconds: i64,
    pub remaining_pct: f64,
    pub cost_usd: f64,
    pub message_count: u32,
    /// Sorted by share, largest first; empty when the window has no cost
    pub model_distribution: Vec<ModelDistEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDistEntry {
    pub model: String,
    pub cost_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurnRateSection {
    pub tokens_per_min: f64,
    pub cost_per_hour_usd: f64,
    pub cost_per_min_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictionSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_limit_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_limit_in_seconds: Option<i64>,
    pub session_will_hit_limit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_limit_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_limit_in_seconds: Option<i64>,
    pub weekly_will_hit_limit: bool,
}
