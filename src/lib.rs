//! Claude Code Usage Monitor - session windows, burn rate and limit forecasts

pub mod api;
pub mod cli;
pub mod commands;
pub mod usage;

use clap::Parser;
use log::debug;

use cli::{Cli, Command};
use usage::config::{apply_process_env, load_config, read_token_file, validate};

/// Parse the command line, resolve configuration and run the selected command.
///
/// Settings resolve as config file, then `CCU_*` environment, then flags; the
/// API token falls back to `~/.ccu/.api_token`.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    apply_process_env(&mut config);
    cli.apply_to(&mut config);
    if config.api.token.is_empty() {
        if let Some(token) = read_token_file() {
            config.api.token = token;
        }
    }
    validate(&config)?;
    debug!("Resolved config: plan={} refresh={}s hours={}", config.plan_type, config.refresh_interval_seconds, config.hours_back);

    match cli.command() {
        Command::Report { period } => {
            print!("{}", commands::run_report(&config, period.into())?);
        }
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            match command {
                Command::Status => runtime.block_on(commands::run_status(config))?,
                _ => runtime.block_on(commands::run_watch(config))?,
            }
        }
    }
    Ok(())
}
