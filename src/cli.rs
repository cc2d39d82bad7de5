//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::usage::config::parse_cidr_list;
use crate::usage::models::AppConfig;
use crate::usage::stats::ReportPeriod;

#[derive(Parser, Debug)]
#[command(
    name = "ccu-monitor",
    version,
    about = "Session windows, burn rate and limit forecasts for Claude Code usage"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Plan whose limits apply
    #[arg(long, global = true, value_parser = ["pro", "max5", "max20", "custom"])]
    pub plan: Option<String>,

    /// Token ceiling per window for the custom plan
    #[arg(long, global = true)]
    pub custom_tokens: Option<u64>,

    /// Cost ceiling per window (USD) for the custom plan
    #[arg(long, global = true)]
    pub custom_cost: Option<f64>,

    /// Message ceiling per window for the custom plan
    #[arg(long, global = true)]
    pub custom_messages: Option<u32>,

    /// Claude data directory, or its projects folder
    #[arg(long, global = true)]
    pub data: Option<String>,

    /// Hours of history to load
    #[arg(long, global = true)]
    pub hours: Option<u32>,

    /// Refresh interval in seconds (1-60)
    #[arg(long, global = true)]
    pub refresh: Option<u32>,

    /// Serve the status API
    #[arg(long, global = true)]
    pub api: bool,

    #[arg(long, global = true)]
    pub api_port: Option<u16>,

    #[arg(long, global = true)]
    pub api_bind: Option<String>,

    /// Bearer token required by the status API
    #[arg(long, global = true)]
    pub api_token: Option<String>,

    /// Comma-separated CIDR ranges allowed to reach the status API
    #[arg(long, global = true)]
    pub api_allow: Option<String>,

    /// TOML config file (default: ~/.ccu/config.toml)
    #[arg(long, global = true, env = "CCU_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use local data only, never the usage API
    #[arg(long, global = true)]
    pub no_oauth: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Refresh continuously and log each snapshot (default)
    Watch,
    /// Print one status document as JSON
    Status,
    /// Print a usage report
    Report {
        #[arg(value_enum)]
        period: PeriodArg,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum PeriodArg {
    Daily,
    Weekly,
    Monthly,
}

impl From<PeriodArg> for ReportPeriod {
    fn from(period: PeriodArg) -> Self {
        match period {
            PeriodArg::Daily => ReportPeriod::Daily,
            PeriodArg::Weekly => ReportPeriod::Weekly,
            PeriodArg::Monthly => ReportPeriod::Monthly,
        }
    }
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Watch)
    }

    /// Apply flags on top of file and environment settings
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(plan) = &self.plan {
            config.plan_type = plan.clone();
        }
        if let Some(tokens) = self.custom_tokens {
            config.custom_token_limit = tokens;
        }
        if let Some(cost) = self.custom_cost {
            config.custom_cost_limit = cost;
        }
        if let Some(messages) = self.custom_messages {
            config.custom_message_limit = messages;
        }
        if let Some(data) = &self.data {
            config.data_path = Some(data.clone());
        }
        if let Some(hours) = self.hours {
            config.hours_back = hours;
        }
        if let Some(refresh) = self.refresh {
            config.refresh_interval_seconds = refresh;
        }
        if self.api {
            config.api.enabled = true;
        }
        if let Some(port) = self.api_port {
            config.api.port = port;
        }
        if let Some(bind) = &self.api_bind {
            config.api.bind_addr = bind.clone();
        }
        if let Some(token) = &self.api_token {
            config.api.token = token.clone();
        }
        if let Some(allow) = &self.api_allow {
            config.api.allowed_cidrs = parse_cidr_list(allow);
        }
        if self.no_oauth {
            config.use_oauth = false;
        }
    }
}
