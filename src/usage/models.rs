//! Data models for Claude Code usage monitoring

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Usage data from a single JSONL event
#[derive(Debug, Clone, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub message: Option<Message>,
    pub timestamp: Option<String>,
    #[serde(alias = "costUSD", alias = "cost_usd")]
    pub cost: Option<f64>,
    #[serde(alias = "requestId")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: Option<String>,
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Usage {
    #[serde(default, alias = "inputTokens")]
    pub input_tokens: Option<u64>,
    #[serde(default, alias = "outputTokens")]
    pub output_tokens: Option<u64>,
    #[serde(default, alias = "cache_creation_input_tokens", alias = "cacheCreationInputTokens")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(default, alias = "cache_read_input_tokens", alias = "cacheReadInputTokens")]
    pub cache_read_tokens: Option<u64>,
}

/// A single ingested API call. Immutable once it reaches the windower.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
    pub model: String,
    pub message_id: String,
    pub request_id: String,
}

impl UsageEntry {
    /// All four token categories, cache included
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    /// Input + output only
    pub fn display_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// SHA-256 of `message_id:request_id`, hex encoded.
    ///
    /// Returns `None` when either id is missing; such entries are never deduplicated.
    pub fn dedup_key(&self) -> Option<String> {
        if self.message_id.is_empty() || self.request_id.is_empty() {
            return None;
        }
        let digest = Sha256::digest(format!("{}:{}", self.message_id, self.request_id).as_bytes());
        Some(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }
}

/// Per-model sums within one window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelBreakdown {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
    pub message_count: u32,
}

impl ModelBreakdown {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    pub fn display_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub(crate) fn absorb(&mut self, entry: &UsageEntry) {
        self.input_tokens += entry.input_tokens;
        self.output_tokens += entry.output_tokens;
        self.cache_creation_tokens += entry.cache_creation_tokens;
        self.cache_read_tokens += entry.cache_read_tokens;
        self.cost_usd += entry.cost_usd;
        self.message_count += 1;
    }

    pub(crate) fn add(&mut self, other: &ModelBreakdown) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cost_usd += other.cost_usd;
        self.message_count += other.message_count;
    }
}

/// A fixed-duration usage window ("session"), or a gap marker between two of them
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionWindow {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Timestamp of the last entry, frozen once the window closes
    pub actual_end: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub entries: Vec<UsageEntry>,
    pub display_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub message_count: u32,
    pub per_model: BTreeMap<String, ModelBreakdown>,
    pub is_active: bool,
    pub is_gap: bool,
}

impl SessionWindow {
    /// Effective length: up to `actual_end` once closed, otherwise the nominal span
    pub fn duration(&self) -> Duration {
        match self.actual_end {
            Some(actual_end) => actual_end - self.start,
            None => self.end - self.start,
        }
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        if now > self.end {
            return self.duration();
        }
        if now < self.start {
            return Duration::zero();
        }
        now - self.start
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        if now > self.end {
            return Duration::zero();
        }
        if now < self.start {
            return self.duration();
        }
        self.end - now
    }

    /// Progress through the window as a percentage in `[0, 100]`
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        let total = self.duration().num_seconds() as f64;
        if total <= 0.0 {
            return 0.0;
        }
        let elapsed = self.elapsed(now).num_seconds() as f64;
        (elapsed / total * 100.0).clamp(0.0, 100.0)
    }

    pub fn last_entry(&self) -> Option<&UsageEntry> {
        self.entries.last()
    }
}

/// Named plan limits for one window. A zero ceiling means unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub plan_name: String,
    pub token_limit: u64,
    pub cost_limit_usd: f64,
    pub message_limit: u32,
}

/// Trailing consumption rate computed for a specific `now`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VelocityEstimate {
    pub tokens_per_minute: f64,
    pub cost_per_minute: f64,
}

/// Projected budget exhaustion. `depletes_at == None` is the undefined sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepletionForecast {
    pub depletes_at: Option<DateTime<Utc>>,
    pub will_exceed_before_reset: bool,
}

impl DepletionForecast {
    pub fn undefined() -> Self {
        Self::default()
    }

    pub fn at(eta: DateTime<Utc>, reset: DateTime<Utc>) -> Self {
        Self {
            depletes_at: Some(eta),
            will_exceed_before_reset: eta < reset,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.depletes_at.is_some()
    }

    /// Seconds until depletion, never negative
    pub fn seconds_until(&self, now: DateTime<Utc>) -> Option<i64> {
        self.depletes_at.map(|eta| (eta - now).num_seconds().max(0))
    }
}

/// Externally reported percentage of a budget consumed
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalUtilization {
    pub percent_used: f64,
    pub resets_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// Everything one usage-API poll yields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalUsage {
    pub five_hour: ExternalUtilization,
    pub seven_day: ExternalUtilization,
    pub seven_day_sonnet: Option<ExternalUtilization>,
    /// Only present while a reset time is being reported for it
    pub seven_day_opus: Option<ExternalUtilization>,
}

/// Estimated weekly usage derived from the last seven days of windows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyUsage {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub total_tokens: u64,
    pub sonnet_tokens: u64,
    pub opus_tokens: u64,
    pub sonnet_hours: f64,
    pub opus_hours: f64,
    pub sonnet_limit_hours: f64,
    pub opus_limit_hours: f64,
    pub sonnet_percent: f64,
    pub opus_percent: f64,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_path")]
    pub data_path: Option<String>,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u32,
    #[serde(default = "default_plan_type")]
    pub plan_type: String,
    #[serde(default)]
    pub custom_token_limit: u64,
    #[serde(default)]
    pub custom_cost_limit: f64,
    #[serde(default)]
    pub custom_message_limit: u32,
    #[serde(default = "default_hours_back")]
    pub hours_back: u32,
    #[serde(default = "default_use_oauth")]
    pub use_oauth: bool,
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_data_path() -> Option<String> {
    None
}

fn default_refresh_interval() -> u32 {
    30
}

fn default_plan_type() -> String {
    "max5".to_string()
}

fn default_hours_back() -> u32 {
    24
}

fn default_use_oauth() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            refresh_interval_seconds: default_refresh_interval(),
            plan_type: default_plan_type(),
            custom_token_limit: 0,
            custom_cost_limit: 0.0,
            custom_message_limit: 0,
            hours_back: default_hours_back(),
            use_oauth: default_use_oauth(),
            api: ApiConfig::default(),
        }
    }
}

/// Embedded status endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_bind")]
    pub bind_addr: String,
    /// Shared bearer secret; empty disables auth
    #[serde(default)]
    pub token: String,
    /// CIDR ranges allowed to connect; empty allows everyone
    #[serde(default)]
    pub allowed_cidrs: Vec<String>,
}

fn default_api_port() -> u16 {
    19840
}

fn default_api_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_api_port(),
            bind_addr: default_api_bind(),
            token: String::new(),
            allowed_cidrs: Vec::new(),
        }
    }
}
