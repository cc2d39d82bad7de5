//! Client for the Anthropic OAuth usage endpoint
//!
//! Reports the server-side utilization of the five-hour and seven-day budgets.
//! Credentials are the ones Claude Code stores after `claude login`.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;

use crate::usage::config::get_claude_data_dir;
use crate::usage::models::{ExternalUsage, ExternalUtilization};

pub const USAGE_ENDPOINT: &str = "https://api.anthropic.com/api/oauth/usage";
const BETA_HEADER: &str = "oauth-2025-04-20";
const USER_AGENT: &str = concat!("claude-code-usage-monitor/", env!("CARGO_PKG_VERSION"));
const REQUIRED_SCOPE: &str = "user:profile";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const CREDENTIALS_FILE: &str = ".credentials.json";
const KEYCHAIN_SERVICE: &str = "Claude Code-credentials";

/// Error type for usage API operations
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("OAuth credentials not found: {0}")]
    CredentialsNotFound(String),
    #[error("Failed to parse credentials: {0}")]
    CredentialsParse(#[from] serde_json::Error),
    #[error("OAuth token lacks required 'user:profile' scope. Try re-authenticating: claude logout && claude login")]
    MissingScope,
    #[error("OAuth token expired - run 'claude logout && claude login' to re-authenticate")]
    TokenExpired,
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// How the refresh loop should react to a failed poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Needs the user to log in again; polling stops for good
    TokenExpired,
    /// Retry on a later cycle
    Transient,
    /// Polling is suspended and retried after a back-off
    Permanent,
}

impl OAuthError {
    /// Network-level failures and server-side overload are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            OAuthError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || mentions_network(&e.to_string()),
            OAuthError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            OAuthError::TokenExpired => FailureKind::TokenExpired,
            e if e.is_transient() => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }
}

fn mentions_network(message: &str) -> bool {
    let message = message.to_lowercase();
    ["network", "timeout", "connection", "dial", "eof", "reset by peer"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// OAuth section of Claude Code's stored credentials
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCredentials {
    pub access_token: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub subscription_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(rename = "claudeAiOauth")]
    claude_ai_oauth: OAuthCredentials,
}

/// Parse a credentials document and check it can read usage
pub fn parse_credentials(json: &str) -> Result<OAuthCredentials, OAuthError> {
    let file: CredentialsFile = serde_json::from_str(json)?;
    let credentials = file.claude_ai_oauth;
    if credentials.access_token.is_empty() {
        return Err(OAuthError::CredentialsNotFound("empty access token".to_string()));
    }
    if !credentials.scopes.iter().any(|s| s == REQUIRED_SCOPE) {
        return Err(OAuthError::MissingScope);
    }
    Ok(credentials)
}

/// Load credentials from `<claude dir>/.credentials.json`, falling back to the
/// macOS keychain
pub fn load_credentials(claude_dir: Option<&str>) -> Result<OAuthCredentials, OAuthError> {
    let path = get_claude_data_dir(claude_dir).join(CREDENTIALS_FILE);
    match read_credentials_file(&path) {
        Ok(credentials) => Ok(credentials),
        Err(OAuthError::CredentialsNotFound(reason)) if cfg!(target_os = "macos") => {
            debug!("{}; trying keychain", reason);
            read_keychain()
        }
        Err(e) => Err(e),
    }
}

fn read_credentials_file(path: &Path) -> Result<OAuthCredentials, OAuthError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| OAuthError::CredentialsNotFound(format!("{}: {}", path.display(), e)))?;
    parse_credentials(&contents)
}

fn read_keychain() -> Result<OAuthCredentials, OAuthError> {
    let output = std::process::Command::new("security")
        .args(["find-generic-password", "-s", KEYCHAIN_SERVICE, "-w"])
        .output()
        .map_err(|e| OAuthError::CredentialsNotFound(format!("keychain access failed: {}", e)))?;
    if !output.status.success() {
        return Err(OAuthError::CredentialsNotFound("keychain entry not found".to_string()));
    }
    parse_credentials(&String::from_utf8_lossy(&output.stdout))
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    five_hour: Option<UsageWindow>,
    seven_day: Option<UsageWindow>,
    seven_day_sonnet: Option<UsageWindow>,
    seven_day_opus: Option<UsageWindow>,
}

#[derive(Debug, Deserialize)]
struct UsageWindow {
    #[serde(default)]
    utilization: Option<f64>,
    #[serde(default)]
    resets_at: Option<String>,
}

impl UsageWindow {
    fn to_utilization(&self, fetched_at: DateTime<Utc>) -> Option<ExternalUtilization> {
        let resets_at = DateTime::parse_from_rfc3339(self.resets_at.as_deref()?)
            .ok()?
            .with_timezone(&Utc);
        Some(ExternalUtilization {
            percent_used: self.utilization.unwrap_or(0.0),
            resets_at,
            fetched_at,
        })
    }
}

/// Decode a usage response body.
///
/// Both the five-hour and seven-day windows must carry a reset time. The Opus
/// window is only reported while it has one.
pub fn parse_usage_response(body: &str, fetched_at: DateTime<Utc>) -> Result<ExternalUsage, OAuthError> {
    let response: UsageResponse = serde_json::from_str(body).map_err(|e| OAuthError::Decode(e.to_string()))?;

    let required = |window: &Option<UsageWindow>, name: &str| {
        window
            .as_ref()
            .and_then(|w| w.to_utilization(fetched_at))
            .ok_or_else(|| OAuthError::Decode(format!("missing or invalid {} window", name)))
    };

    Ok(ExternalUsage {
        five_hour: required(&response.five_hour, "five_hour")?,
        seven_day: required(&response.seven_day, "seven_day")?,
        seven_day_sonnet: response.seven_day_sonnet.as_ref().and_then(|w| w.to_utilization(fetched_at)),
        seven_day_opus: response.seven_day_opus.as_ref().and_then(|w| w.to_utilization(fetched_at)),
    })
}

/// True for a 401 body whose `error.details.error_code` is `token_expired`
fn is_token_expired_body(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/details/error_code")
                .and_then(|c| c.as_str())
                .map(|c| c == "token_expired")
        })
        .unwrap_or(false)
}

/// Usage API client bound to one set of credentials
pub struct UsageClient {
    http: reqwest::Client,
    credentials: OAuthCredentials,
}

impl UsageClient {
    pub fn new(credentials: OAuthCredentials) -> Result<Self, OAuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { http, credentials })
    }

    /// Client using the credentials Claude Code stored locally
    pub fn from_stored_credentials(claude_dir: Option<&str>) -> Result<Self, OAuthError> {
        Self::new(load_credentials(claude_dir)?)
    }

    pub fn subscription_type(&self) -> Option<&str> {
        self.credentials.subscription_type.as_deref()
    }

    /// Poll current utilization
    pub async fn fetch_usage(&self) -> Result<ExternalUsage, OAuthError> {
        let resp = self
            .http
            .get(USAGE_ENDPOINT)
            .bearer_auth(&self.credentials.access_token)
            .header("anthropic-beta", BETA_HEADER)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED && is_token_expired_body(&body) {
                return Err(OAuthError::TokenExpired);
            }
            return Err(OAuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_usage_response(&body, Utc::now())
    }
}
