//! Configuration and data directory discovery

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::usage::models::{AppConfig, Budget};
use crate::usage::pricing::{get_plan_limits, PLAN_TYPES};

const CONFIG_DIR_NAME: &str = ".ccu";
const CONFIG_FILE_NAME: &str = "config.toml";
const TOKEN_FILE_NAME: &str = ".api_token";

/// Lookback used by the weekly figures, in hours
pub const WEEKLY_LOOKBACK_HOURS: u32 = 168;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Get the Claude data directory path
/// Priority: 1. Custom path from config, 2. CLAUDE_CONFIG_DIR env var, 3. Default ~/.claude
pub fn get_claude_data_dir(custom_path: Option<&str>) -> PathBuf {
    if let Some(path) = custom_path {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = env::var("CLAUDE_CONFIG_DIR") {
        return PathBuf::from(env_path);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".claude");
    }

    PathBuf::from(".claude")
}

/// Get the projects directory within the Claude data directory.
///
/// A custom path may point at either the Claude directory or its `projects` folder.
pub fn get_projects_dir(custom_path: Option<&str>) -> PathBuf {
    let base = get_claude_data_dir(custom_path);
    let projects = base.join("projects");
    if custom_path.is_some() && !projects.is_dir() {
        return base;
    }
    projects
}

/// Directory holding the monitor's own files (`~/.ccu`)
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME))
}

pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Parse a TOML config file; missing keys take their defaults
pub fn load_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

/// Load the config file if one exists.
///
/// An explicit path must exist; the default location is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    if let Some(path) = explicit {
        return load_config_file(path);
    }
    match default_config_path() {
        Some(path) if path.is_file() => {
            debug!("Loading config from {}", path.display());
            load_config_file(&path)
        }
        _ => Ok(AppConfig::default()),
    }
}

/// Apply `CCU_*` environment overrides via `lookup`
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let truthy = |v: &str| v == "true" || v == "1";

    if let Some(plan) = lookup("CCU_PLAN") {
        config.plan_type = plan;
    }
    if let Some(data) = lookup("CCU_DATA") {
        config.data_path = Some(data);
    }
    if lookup("CCU_API").as_deref().is_some_and(truthy)
        || lookup("CCU_ENABLE_API").as_deref().is_some_and(truthy)
    {
        config.api.enabled = true;
    }
    if let Some(port) = lookup("CCU_API_PORT").and_then(|v| v.parse().ok()) {
        config.api.port = port;
    }
    if let Some(bind) = lookup("CCU_API_BIND").filter(|v| !v.is_empty()) {
        config.api.bind_addr = bind;
    }
    if let Some(token) = lookup("CCU_API_TOKEN").filter(|v| !v.is_empty()) {
        config.api.token = token;
    }
    if let Some(allow) = lookup("CCU_API_ALLOW").filter(|v| !v.is_empty()) {
        config.api.allowed_cidrs = parse_cidr_list(&allow);
    }
}

/// Apply overrides from the process environment
pub fn apply_process_env(config: &mut AppConfig) {
    apply_env_overrides(config, |key| env::var(key).ok());
}

/// Bearer token from `~/.ccu/.api_token`, if present and non-empty
pub fn read_token_file() -> Option<String> {
    let path = get_config_dir()?.join(TOKEN_FILE_NAME);
    let token = fs::read_to_string(path).ok()?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Split a comma-separated CIDR list, dropping blanks
pub fn parse_cidr_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Reject values the monitor cannot run with
pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    let plan = config.plan_type.to_lowercase();
    if !PLAN_TYPES.contains(&plan.as_str()) {
        return Err(ConfigError::Invalid(format!(
            "invalid plan: {} (must be pro, max5, max20, or custom)",
            config.plan_type
        )));
    }
    if !(1..=60).contains(&config.refresh_interval_seconds) {
        return Err(ConfigError::Invalid(
            "refresh rate must be between 1 and 60 seconds".to_string(),
        ));
    }
    if config.hours_back < 1 {
        return Err(ConfigError::Invalid("hours must be at least 1".to_string()));
    }
    if config.api.enabled && config.api.port == 0 {
        return Err(ConfigError::Invalid("api port must be non-zero".to_string()));
    }
    Ok(())
}

/// Budget for the configured plan; `custom` uses the configured ceilings
pub fn budget_for(config: &AppConfig) -> Budget {
    if config.plan_type.eq_ignore_ascii_case("custom") {
        return Budget {
            plan_name: "Custom".to_string(),
            token_limit: config.custom_token_limit,
            cost_limit_usd: config.custom_cost_limit,
            message_limit: config.custom_message_limit,
        };
    }
    get_plan_limits(&config.plan_type)
}

/// Hours of history the live loop loads: never less than a week so weekly figures are complete
pub fn live_lookback_hours(config: &AppConfig) -> u32 {
    config.hours_back.max(WEEKLY_LOOKBACK_HOURS)
}
