//! Sub-command bodies for the usage monitor CLI

use std::sync::Arc;

use chrono::{Local, Utc};
use log::{info, warn};
use tokio::sync::oneshot;

use crate::api::{build_status_response, ServerError, StatusServer};
use crate::usage::background::{effective_refresh_interval, start_background_refresh, Refresher, SnapshotListener};
use crate::usage::config::{get_projects_dir, ConfigError};
use crate::usage::models::AppConfig;
use crate::usage::pricing::PricingCalculator;
use crate::usage::reader::{load_usage_entries, ReaderError};
use crate::usage::snapshot::{SnapshotStore, UsageSnapshot};
use crate::usage::stats::{generate_report, report_hours, ReportPeriod};
use crate::usage::weekly::{estimate_hours_remaining, is_weekly_limit_approaching, is_weekly_limit_exceeded};

/// Error type for CLI commands
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One-line summary of a snapshot for the log
pub fn describe_snapshot(snapshot: &UsageSnapshot) -> String {
    let Some(window) = snapshot.current_window() else {
        return "no usage in the loaded history".to_string();
    };

    let mut line = format!(
        "session {:.1}% (${:.2}, {} msgs), {:.0} tok/min, ${:.2}/h",
        snapshot.session_utilization(),
        window.cost_usd,
        window.message_count,
        snapshot.velocity.tokens_per_minute,
        snapshot.session_cost_per_minute * 60.0,
    );
    if let Some(eta) = snapshot.session_forecast.depletes_at {
        line.push_str(&format!(", limit at {}", eta.with_timezone(&Local).format("%H:%M")));
    }
    if let Some(external) = &snapshot.external {
        line.push_str(&format!(", weekly {:.1}%", external.seven_day.percent_used));
    }
    if is_weekly_limit_exceeded(&snapshot.weekly) {
        line.push_str(", estimated weekly allowance exceeded");
    } else if is_weekly_limit_approaching(&snapshot.weekly) {
        let (sonnet_left, _) = estimate_hours_remaining(&snapshot.weekly);
        line.push_str(&format!(", {:.1}h of weekly Sonnet allowance left", sonnet_left));
    }
    if let Some((model, totals)) = snapshot
        .model_totals
        .iter()
        .max_by(|a, b| a.1.cost_usd.total_cmp(&b.1.cost_usd))
    {
        line.push_str(&format!(", mostly {} (${:.2} loaded)", model, totals.cost_usd));
    }
    if snapshot.tier.should_switch_to_custom {
        line.push_str(&format!(", usage suggests the {} tier", snapshot.tier.detected_plan));
    }
    line
}

fn log_listener() -> SnapshotListener {
    Box::new(|snapshot: &UsageSnapshot| info!("{}", describe_snapshot(snapshot)))
}

/// Run the refresh loop, and the status API when enabled, until ctrl-c
pub async fn run_watch(config: AppConfig) -> Result<(), CommandError> {
    let mut refresher = Refresher::new(config.clone());
    let oauth_available = refresher.oauth_available();
    if config.use_oauth && !oauth_available {
        warn!("Usage API unavailable, falling back to local usage data only");
    }
    let interval = effective_refresh_interval(&config, oauth_available);

    let store = Arc::new(SnapshotStore::new());
    let mut server = if config.api.enabled {
        let mut server = StatusServer::new(config.api.clone(), Arc::clone(&store));
        server.start().await?;
        Some(server)
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = start_background_refresh(refresher, store, interval, Some(log_listener()), shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    if let Err(e) = handle.await {
        warn!("Refresh task ended abnormally: {}", e);
    }
    if let Some(server) = server.as_mut() {
        server.stop();
    }
    Ok(())
}

/// Compute one snapshot and render its status document
pub async fn status_json(config: AppConfig) -> Result<String, CommandError> {
    let mut refresher = Refresher::new(config);
    let now = Utc::now();
    let snapshot = refresher.refresh(now, true).await;
    Ok(serde_json::to_string_pretty(&build_status_response(&snapshot, now))?)
}

/// Print one status document to stdout
pub async fn run_status(config: AppConfig) -> Result<(), CommandError> {
    println!("{}", status_json(config).await?);
    Ok(())
}

/// Render a usage report over the configured history
pub fn run_report(config: &AppConfig, period: ReportPeriod) -> Result<String, CommandError> {
    let hours = report_hours(period, config.hours_back);
    let projects_dir = get_projects_dir(config.data_path.as_deref());
    let now = Utc::now();

    let entries = load_usage_entries(&projects_dir, hours, now, &PricingCalculator::new())?;
    info!("Loaded {} entries from the last {} hours", entries.len(), hours);

    let local_now = now.with_timezone(&Local);
    let tz_name = format!("UTC{}", local_now.format("%:z"));
    Ok(generate_report(&entries, period, &Local, &tz_name, local_now.date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::reader::tests::{assistant_line, write_file};
    use chrono::{Duration, SecondsFormat};

    fn config_for(dir: &std::path::Path) -> AppConfig {
        AppConfig {
            data_path: Some(dir.to_string_lossy().to_string()),
            use_oauth: false,
            ..Default::default()
        }
    }

    fn recent(minutes_ago: i64) -> String {
        (Utc::now() - Duration::minutes(minutes_ago)).to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    #[test]
    fn test_report_over_local_data() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "projects/demo/session.jsonl",
            &[
                assistant_line(&recent(90), "msg_1", "req_1", 1_000, 500),
                assistant_line(&recent(30), "msg_2", "req_2", 2_000, 500),
            ],
        );

        let report = run_report(&config_for(dir.path()), ReportPeriod::Daily).unwrap();
        assert!(report.contains("Daily"));
        assert!(report.contains("claude-sonnet-4-5-20250929"));
        assert!(report.contains("TOTAL"));
    }

    #[test]
    fn test_report_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir.path().join("absent"));
        assert!(matches!(
            run_report(&config, ReportPeriod::Monthly),
            Err(CommandError::Reader(ReaderError::DirNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_status_json_reports_active_session() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "demo/session.jsonl",
            &[assistant_line(&recent(10), "msg_1", "req_1", 1_000, 500)],
        );

        let json: serde_json::Value = serde_json::from_str(&status_json(config_for(dir.path())).await.unwrap()).unwrap();
        assert_eq!(json["plan"], "max5");
        assert_eq!(json["session"]["message_count"], 1);
        assert!(json.get("weekly").is_none());
        assert!(json["burn_rate"]["tokens_per_min"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_describe_names_dominant_model() {
        let now = Utc::now();
        let mut entries = vec![
            crate::usage::windower::tests::entry_at(now - Duration::minutes(20), 100, 100),
            crate::usage::windower::tests::entry_at(now - Duration::minutes(10), 100, 100),
        ];
        entries[1].model = "claude-opus-4-5-20251101".to_string();
        entries[1].cost_usd = 0.40;
        let snapshot = UsageSnapshot::reduce(
            None,
            crate::usage::snapshot::SnapshotInputs {
                entries: &entries,
                external: None,
                plan_type: "max5",
                budget: crate::usage::pricing::get_plan_limits("max5"),
                now,
                data_loaded_at: now,
            },
        );
        let line = describe_snapshot(&snapshot);
        assert!(line.starts_with("session "));
        assert!(line.contains("mostly claude-opus-4-5 ($0.40 loaded)"));
    }

    #[test]
    fn test_describe_empty_snapshot() {
        let snapshot = UsageSnapshot::reduce(
            None,
            crate::usage::snapshot::SnapshotInputs {
                entries: &[],
                external: None,
                plan_type: "pro",
                budget: crate::usage::pricing::get_plan_limits("pro"),
                now: Utc::now(),
                data_loaded_at: Utc::now(),
            },
        );
        assert_eq!(describe_snapshot(&snapshot), "no usage in the loaded history");
    }
}
