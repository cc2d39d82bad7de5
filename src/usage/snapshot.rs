//! Per-cycle usage snapshot and its handoff to readers

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;

use crate::usage::activity::{classify_windows, current_window_index};
use crate::usage::burn_rate::{calculate_burn_rate, calculate_cost_burn_rate, calculate_token_burn_rate};
use crate::usage::depletion::{predict_cost_depletion, predict_token_depletion, predict_weekly_depletion};
use crate::usage::models::{
    Budget, DepletionForecast, ExternalUsage, ModelBreakdown, SessionWindow, UsageEntry, VelocityEstimate,
    WeeklyUsage,
};
use crate::usage::quota::{limit_status, model_totals, LimitStatus, TierInference};
use crate::usage::staleness::sanitize;
use crate::usage::weekly::calculate_weekly_usage;
use crate::usage::windower::fold_windows;

/// Everything one refresh cycle feeds into the reducer
#[derive(Debug, Clone)]
pub struct SnapshotInputs<'a> {
    /// Sorted, deduplicated entries
    pub entries: &'a [UsageEntry],
    pub external: Option<ExternalUsage>,
    pub plan_type: &'a str,
    pub budget: Budget,
    pub now: DateTime<Utc>,
    /// When `entries` were last read successfully
    pub data_loaded_at: DateTime<Utc>,
}

/// Immutable result of one refresh cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub computed_at: DateTime<Utc>,
    pub data_loaded_at: DateTime<Utc>,
    pub plan_type: String,
    pub budget: Budget,
    pub windows: Vec<SessionWindow>,
    /// Active window, or the most recent one when none is active
    pub current_index: Option<usize>,
    pub velocity: VelocityEstimate,
    /// Average cost per minute of the current window
    pub session_cost_per_minute: f64,
    pub session_tokens_per_minute: f64,
    /// Cost-budget exhaustion for the active window
    pub session_forecast: DepletionForecast,
    /// Token-budget exhaustion, only meaningful with a token ceiling
    pub token_forecast: DepletionForecast,
    pub weekly_forecast: DepletionForecast,
    pub limit_status: Option<LimitStatus>,
    pub tier: TierInference,
    pub weekly: WeeklyUsage,
    /// Per-model sums over the loaded history
    pub model_totals: BTreeMap<String, ModelBreakdown>,
    /// Usage API data with the staleness guard applied
    pub external: Option<ExternalUsage>,
    /// The five-hour figure was clamped as left over from the previous window
    pub five_hour_stale: bool,
}

impl UsageSnapshot {
    /// Build the snapshot for `inputs.now`.
    ///
    /// Windows are rebuilt from the full entry set. A window that was already closed
    /// in `previous` keeps its frozen `actual_end`.
    pub fn reduce(previous: Option<&UsageSnapshot>, inputs: SnapshotInputs<'_>) -> UsageSnapshot {
        let now = inputs.now;
        let mut windows = fold_windows(inputs.entries);

        if let Some(previous) = previous {
            let frozen: HashMap<&str, DateTime<Utc>> = previous
                .windows
                .iter()
                .filter_map(|w| w.actual_end.map(|end| (w.id.as_str(), end)))
                .collect();
            for window in windows.iter_mut() {
                if let Some(&end) = frozen.get(window.id.as_str()) {
                    window.actual_end = Some(end);
                }
            }
        }

        let windows = classify_windows(windows, now);
        let current_index = current_window_index(&windows);
        let current = current_index.and_then(|i| windows.get(i));

        let velocity = calculate_burn_rate(&windows, now);
        let session_cost_per_minute = current.map_or(0.0, |w| calculate_cost_burn_rate(w, now));
        let session_tokens_per_minute = current.map_or(0.0, |w| calculate_token_burn_rate(w, now));

        let budget = inputs.budget;
        let active = current.filter(|w| w.is_active);
        let session_forecast = match active {
            Some(w) if budget.cost_limit_usd > 0.0 => predict_cost_depletion(
                session_cost_per_minute,
                budget.cost_limit_usd - w.cost_usd,
                now,
                w.end,
            ),
            _ => DepletionForecast::undefined(),
        };
        let token_forecast = match active {
            Some(w) if budget.token_limit > 0 => predict_token_depletion(
                session_tokens_per_minute,
                budget.token_limit as f64 - w.display_tokens as f64,
                now,
                w.end,
            ),
            _ => DepletionForecast::undefined(),
        };

        let (external, five_hour_stale) = match inputs.external {
            Some(usage) => {
                let (usage, stale) = sanitize(usage, now);
                (Some(usage), stale)
            }
            None => (None, false),
        };
        let weekly_forecast = match &external {
            Some(usage) => predict_weekly_depletion(usage.seven_day.percent_used, usage.seven_day.resets_at, now),
            None => DepletionForecast::undefined(),
        };

        UsageSnapshot {
            computed_at: now,
            data_loaded_at: inputs.data_loaded_at,
            plan_type: inputs.plan_type.to_lowercase(),
            limit_status: current.map(|w| limit_status(w, &budget)),
            tier: TierInference::infer(&windows, inputs.plan_type),
            weekly: calculate_weekly_usage(&windows, inputs.plan_type, now),
            model_totals: model_totals(&windows),
            budget,
            current_index,
            velocity,
            session_cost_per_minute,
            session_tokens_per_minute,
            session_forecast,
            token_forecast,
            weekly_forecast,
            external,
            five_hour_stale,
            windows,
        }
    }

    /// Seconds since the entries behind this snapshot were read
    pub fn data_age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.data_loaded_at).num_seconds().max(0)
    }

    pub fn current_window(&self) -> Option<&SessionWindow> {
        self.current_index.and_then(|i| self.windows.get(i))
    }

    /// Five-hour utilization: the usage API figure when present, otherwise the
    /// current window's cost against the budget
    pub fn session_utilization(&self) -> f64 {
        if let Some(external) = &self.external {
            return external.five_hour.percent_used;
        }
        match self.current_window() {
            Some(w) if self.budget.cost_limit_usd > 0.0 => w.cost_usd / self.budget.cost_limit_usd * 100.0,
            _ => 0.0,
        }
    }
}

/// Latest published snapshot. One writer, any number of readers.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    latest: RwLock<Option<Arc<UsageSnapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current snapshot
    pub fn publish(&self, snapshot: UsageSnapshot) -> Arc<UsageSnapshot> {
        let snapshot = Arc::new(snapshot);
        match self.latest.write() {
            Ok(mut latest) => *latest = Some(Arc::clone(&snapshot)),
            Err(e) => warn!("Failed to acquire snapshot lock: {}", e),
        }
        snapshot
    }

    pub fn latest(&self) -> Option<Arc<UsageSnapshot>> {
        self.latest.read().ok().and_then(|latest| latest.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::models::ExternalUtilization;
    use crate::usage::pricing::get_plan_limits;
    use crate::usage::windower::tests::{at, entry_at};
    use chrono::Duration;

    fn inputs(entries: &[UsageEntry], now: DateTime<Utc>) -> SnapshotInputs<'_> {
        SnapshotInputs {
            entries,
            external: None,
            plan_type: "pro",
            budget: get_plan_limits("pro"),
            now,
            data_loaded_at: now,
        }
    }

    #[test]
    fn test_reduce_empty_input() {
        let snapshot = UsageSnapshot::reduce(None, inputs(&[], at(12, 0)));
        assert!(snapshot.windows.is_empty());
        assert!(snapshot.current_window().is_none());
        assert_eq!(snapshot.velocity, VelocityEstimate::default());
        assert!(!snapshot.session_forecast.is_defined());
        assert_eq!(snapshot.tier.p90_limit, 19_000);
        assert_eq!(snapshot.session_utilization(), 0.0);
    }

    #[test]
    fn test_reduce_active_window() {
        let mut entries: Vec<_> = (0..10).map(|i| entry_at(at(12, i * 3), 100, 100)).collect();
        entries[9].cost_usd = 4.55;
        let snapshot = UsageSnapshot::reduce(None, inputs(&entries, at(12, 30)));

        let current = snapshot.current_window().unwrap();
        assert!(current.is_active);
        assert!((current.cost_usd - 5.0).abs() < 1e-9);
        assert_eq!(snapshot.model_totals["claude-sonnet-4-5"].message_count, 10);
        // $5 over 30 minutes, $13 left at that rate -> 78 minutes
        assert!((snapshot.session_cost_per_minute - 5.0 / 30.0).abs() < 1e-9);
        assert_eq!(snapshot.session_forecast.depletes_at, Some(at(13, 48)));
        assert!(snapshot.session_forecast.will_exceed_before_reset);
        assert!(!snapshot.token_forecast.is_defined());
        assert!((snapshot.session_utilization() - 5.0 / 18.0 * 100.0).abs() < 1e-9);
        assert_eq!(snapshot.limit_status.map(|s| s.kind), Some(Some(crate::usage::quota::LimitKind::Cost)));
    }

    #[test]
    fn test_reduce_is_idempotent() {
        let entries = vec![entry_at(at(1, 0), 10, 10), entry_at(at(9, 0), 10, 10)];
        let first = UsageSnapshot::reduce(None, inputs(&entries, at(10, 0)));
        let second = UsageSnapshot::reduce(Some(&first), inputs(&entries, at(10, 0)));
        assert_eq!(first, second);
    }

    #[test]
    fn test_reduce_applies_staleness_guard() {
        let now = at(12, 0);
        let utilization = |percent_used, resets_at| ExternalUtilization {
            percent_used,
            resets_at,
            fetched_at: now,
        };
        let external = ExternalUsage {
            five_hour: utilization(100.0, now - Duration::minutes(30)),
            seven_day: utilization(50.0, now + Duration::days(5)),
            seven_day_sonnet: None,
            seven_day_opus: None,
        };
        let snapshot = UsageSnapshot::reduce(
            None,
            SnapshotInputs {
                external: Some(external),
                ..inputs(&[], now)
            },
        );
        assert_eq!(snapshot.session_utilization(), 0.0);
        assert!(snapshot.five_hour_stale);
        assert_eq!(snapshot.weekly_forecast.depletes_at, Some(now + Duration::hours(48)));
    }

    #[test]
    fn test_store_publishes_latest() {
        let store = SnapshotStore::new();
        assert!(store.latest().is_none());
        let published = store.publish(UsageSnapshot::reduce(None, inputs(&[], at(12, 0))));
        let latest = store.latest().unwrap();
        assert!(Arc::ptr_eq(&published, &latest));
    }
}
