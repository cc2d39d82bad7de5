//! Status document assembly from a published snapshot

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::api::types::{
    BurnRateSection, ModelDistEntry, PredictionSection, SessionSection, StatusResponse, WeeklyAllSection,
    WeeklyModelSection, WeeklySection,
};
use crate::usage::models::{ExternalUsage, ExternalUtilization, SessionWindow};
use crate::usage::pricing::{get_weekly_limits, normalize_model_name};
use crate::usage::snapshot::UsageSnapshot;

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn seconds_until(ts: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (ts - now).num_seconds().max(0)
}

/// Build the status document for `snapshot` as seen at `now`
pub fn build_status_response(snapshot: &UsageSnapshot, now: DateTime<Utc>) -> StatusResponse {
    let session_window = snapshot.current_window().filter(|w| !w.is_gap);

    StatusResponse {
        plan: snapshot.budget.plan_name.to_lowercase(),
        server_time: rfc3339(now),
        data_age_seconds: snapshot.data_age_seconds(now),
        weekly: snapshot
            .external
            .as_ref()
            .map(|usage| build_weekly_section(usage, &snapshot.plan_type, now)),
        session: session_window.map(|w| build_session_section(snapshot, w, now)),
        burn_rate: Some(build_burn_rate_section(snapshot, session_window.is_some())),
        prediction: Some(build_prediction_section(snapshot, now)),
    }
}

/// Serialize the status document for `snapshot`
pub fn render_status(snapshot: &UsageSnapshot, now: DateTime<Utc>) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&build_status_response(snapshot, now))
}

fn build_weekly_section(usage: &ExternalUsage, plan_type: &str, now: DateTime<Utc>) -> WeeklySection {
    let limits = get_weekly_limits(plan_type);

    let model_section = |u: &ExternalUtilization, limit_hours: f64| WeeklyModelSection {
        utilisation_pct: u.percent_used,
        used_hours: if limit_hours > 0.0 {
            u.percent_used / 100.0 * limit_hours
        } else {
            0.0
        },
        limit_hours,
        resets_at: rfc3339(u.resets_at),
        resets_in_seconds: seconds_until(u.resets_at, now),
    };

    WeeklySection {
        all_models: Some(WeeklyAllSection {
            utilisation_pct: usage.seven_day.percent_used,
            resets_at: rfc3339(usage.seven_day.resets_at),
            resets_in_seconds: seconds_until(usage.seven_day.resets_at, now),
        }),
        sonnet: usage
            .seven_day_sonnet
            .as_ref()
            .filter(|_| limits.sonnet_hours > 0.0)
            .map(|u| model_section(u, limits.sonnet_hours)),
        opus: usage
            .seven_day_opus
            .as_ref()
            .map(|u| model_section(u, limits.opus_hours)),
    }
}

fn build_session_section(snapshot: &UsageSnapshot, window: &SessionWindow, now: DateTime<Utc>) -> SessionSection {
    let total_seconds = window.duration().num_seconds();
    let remaining_seconds = window.remaining(now).num_seconds().max(0);
    let remaining_pct = if total_seconds > 0 {
        (100.0 - window.progress(now)).max(0.0)
    } else {
        0.0
    };

    SessionSection {
        utilisation_pct: snapshot.session_utilization(),
        resets_at: rfc3339(window.end),
        resets_in_seconds: remaining_seconds,
        elapsed_seconds: window.elapsed(now).num_seconds(),
        total_seconds,
        remaining_seconds,
        remaining_pct,
        cost_usd: window.cost_usd,
        message_count: window.message_count,
        model_distribution: if snapshot.five_hour_stale {
            Vec::new()
        } else {
            model_distribution(window)
        },
    }
}

/// Each model family's share of the window's cost, largest first
pub fn model_distribution(window: &SessionWindow) -> Vec<ModelDistEntry> {
    if window.per_model.is_empty() || window.cost_usd == 0.0 {
        return Vec::new();
    }

    let mut by_family: BTreeMap<String, f64> = BTreeMap::new();
    for (model, stats) in &window.per_model {
        *by_family.entry(normalize_model_name(model)).or_default() += stats.cost_usd;
    }

    let mut entries: Vec<ModelDistEntry> = by_family
        .into_iter()
        .map(|(model, cost)| ModelDistEntry {
            model,
            cost_pct: cost / window.cost_usd * 100.0,
        })
        .collect();
    entries.sort_by(|a, b| b.cost_pct.total_cmp(&a.cost_pct));
    entries
}

fn build_burn_rate_section(snapshot: &UsageSnapshot, has_session: bool) -> BurnRateSection {
    let cost_per_min = if has_session {
        snapshot.session_cost_per_minute
    } else {
        0.0
    };

    BurnRateSection {
        tokens_per_min: snapshot.velocity.tokens_per_minute,
        cost_per_hour_usd: cost_per_min * 60.0,
        cost_per_min_usd: cost_per_min,
    }
}

fn build_prediction_section(snapshot: &UsageSnapshot, now: DateTime<Utc>) -> PredictionSection {
    let session = snapshot.session_forecast;
    let weekly = snapshot.weekly_forecast;

    PredictionSection {
        session_limit_at: session.depletes_at,
        session_limit_in_seconds: session.seconds_until(now),
        session_will_hit_limit: session.will_exceed_before_reset,
        weekly_limit_at: weekly.depletes_at,
        weekly_limit_in_seconds: weekly.seconds_until(now),
        weekly_will_hit_limit: snapshot.external.is_some() && weekly.will_exceed_before_reset,
    }
}
