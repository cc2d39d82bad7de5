//! Percentile-based tier inference and per-window limit status

use std::collections::BTreeMap;

use serde::Serialize;

use crate::usage::models::{Budget, ModelBreakdown, SessionWindow};
use crate::usage::pricing::{tier_token_limit, TIER_TOKEN_LIMITS};

/// Tuning for the P90 limit inference
#[derive(Debug, Clone, PartialEq)]
pub struct P90Config {
    /// Known tier ceilings, ascending
    pub common_limits: Vec<u64>,
    /// Fraction of a ceiling at which a window counts as having hit it
    pub limit_threshold: f64,
    pub default_min_limit: u64,
}

impl Default for P90Config {
    fn default() -> Self {
        Self {
            common_limits: TIER_TOKEN_LIMITS.to_vec(),
            limit_threshold: 0.95,
            default_min_limit: TIER_TOKEN_LIMITS[0],
        }
    }
}

/// Result of running tier inference over the current windows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierInference {
    pub p90_limit: u64,
    pub tier_limit: u64,
    pub detected_plan: String,
    /// Completed windows regularly exceed the configured plan's ceiling
    pub should_switch_to_custom: bool,
}

impl TierInference {
    pub fn infer(windows: &[SessionWindow], plan_type: &str) -> Self {
        let p90_limit = calculate_p90_limit(windows, &P90Config::default());
        Self {
            p90_limit,
            tier_limit: nearest_tier_limit(p90_limit),
            detected_plan: detect_plan(p90_limit).to_string(),
            should_switch_to_custom: should_switch_tier(windows, plan_type),
        }
    }
}

/// Total tokens of windows that are neither active nor gaps
fn completed_totals(windows: &[SessionWindow]) -> impl Iterator<Item = u64> + '_ {
    windows
        .iter()
        .filter(|w| !w.is_gap && !w.is_active)
        .map(|w| w.total_tokens)
}

/// 90th percentile of completed windows' total tokens.
///
/// Prefers windows that came within the threshold of a known tier ceiling; with
/// none of those every completed window with usage counts. The result never drops
/// below `default_min_limit`.
pub fn calculate_p90_limit(windows: &[SessionWindow], config: &P90Config) -> u64 {
    let near_limit = |tokens: u64| {
        config
            .common_limits
            .iter()
            .any(|&limit| tokens as f64 >= limit as f64 * config.limit_threshold)
    };

    let mut samples: Vec<u64> = completed_totals(windows).filter(|&t| near_limit(t)).collect();
    if samples.is_empty() {
        samples = completed_totals(windows).filter(|&t| t > 0).collect();
    }

    match quantile(&mut samples, 0.90) {
        Some(p90) => p90.max(config.default_min_limit),
        None => config.default_min_limit,
    }
}

/// Nearest-rank quantile: `sorted[floor((n - 1) * q)]`
fn quantile(data: &mut [u64], q: f64) -> Option<u64> {
    if data.is_empty() {
        return None;
    }
    data.sort_unstable();
    let index = ((data.len() - 1) as f64 * q) as usize;
    data.get(index.min(data.len() - 1)).copied()
}

/// Plan whose scale matches a P90 limit
pub fn detect_plan(p90_limit: u64) -> &'static str {
    match p90_limit {
        l if l >= 200_000 => "max20",
        l if l >= 80_000 => "max5",
        l if l >= 15_000 => "pro",
        _ => "custom",
    }
}

/// Highest known tier ceiling the P90 limit reaches within the hit threshold
pub fn nearest_tier_limit(p90_limit: u64) -> u64 {
    let config = P90Config::default();
    config
        .common_limits
        .iter()
        .rev()
        .find(|&&limit| p90_limit as f64 >= limit as f64 * config.limit_threshold)
        .copied()
        .unwrap_or(config.default_min_limit)
}

/// True when more than 30% of completed windows exceed the plan's tier ceiling.
/// Never for `custom`.
pub fn should_switch_tier(windows: &[SessionWindow], plan_type: &str) -> bool {
    if plan_type.eq_ignore_ascii_case("custom") {
        return false;
    }

    let limit = tier_token_limit(plan_type);
    let (total, exceeded) = completed_totals(windows).fold((0usize, 0usize), |(total, exceeded), t| {
        (total + 1, exceeded + usize::from(t > limit))
    });

    total > 0 && exceeded as f64 / total as f64 > 0.3
}

/// Per-model sums across all non-gap windows
pub fn model_totals(windows: &[SessionWindow]) -> BTreeMap<String, ModelBreakdown> {
    let mut totals: BTreeMap<String, ModelBreakdown> = BTreeMap::new();
    for (model, stats) in windows.iter().filter(|w| !w.is_gap).flat_map(|w| w.per_model.iter()) {
        totals.entry(model.clone()).or_default().add(stats);
    }
    totals
}

/// Which budget dimension is closest to its ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    Tokens,
    Cost,
    Messages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitLevel {
    Normal,
    /// Above 80% and at most 95%
    Approaching,
    /// Above 95%
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitStatus {
    pub percent: f64,
    pub kind: Option<LimitKind>,
    pub level: LimitLevel,
}

/// Highest utilization among the budget's configured ceilings for one window.
///
/// Ceilings of zero are ignored. Tokens are measured in display tokens.
pub fn limit_status(window: &SessionWindow, budget: &Budget) -> LimitStatus {
    let candidates = [
        (
            LimitKind::Tokens,
            budget.token_limit > 0,
            window.display_tokens as f64 / budget.token_limit as f64 * 100.0,
        ),
        (
            LimitKind::Cost,
            budget.cost_limit_usd > 0.0,
            window.cost_usd / budget.cost_limit_usd * 100.0,
        ),
        (
            LimitKind::Messages,
            budget.message_limit > 0,
            window.message_count as f64 / budget.message_limit as f64 * 100.0,
        ),
    ];

    let (percent, kind) = candidates
        .iter()
        .filter(|(_, configured, _)| *configured)
        .fold((0.0, None), |(best, kind), &(k, _, pct)| {
            if pct > best {
                (pct, Some(k))
            } else {
                (best, kind)
            }
        });

    let level = if percent > 95.0 {
        LimitLevel::Critical
    } else if percent > 80.0 {
        LimitLevel::Approaching
    } else {
        LimitLevel::Normal
    };

    LimitStatus { percent, kind, level }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::activity::classify_windows;
    use crate::usage::windower::fold_windows;
    use crate::usage::windower::tests::{at, entry_at};
    use chrono::Duration;

    /// One closed window per total, back to back. Each test entry carries 50 cache tokens.
    fn closed_windows(totals: &[u64]) -> Vec<SessionWindow> {
        let entries: Vec<_> = totals
            .iter()
            .enumerate()
            .map(|(i, &total)| entry_at(at(0, 0) + Duration::hours(5 * i as i64), total - 50, 0))
            .collect();
        let now = at(0, 0) + Duration::days(30);
        classify_windows(fold_windows(&entries), now)
    }

    #[test]
    fn test_p90_around_max5_tier() {
        let windows = closed_windows(&[86_000, 87_500, 88_000, 88_200, 89_000, 10_000]);
        let p90 = calculate_p90_limit(&windows, &P90Config::default());
        assert!((86_000..=89_000).contains(&p90));
        assert_eq!(nearest_tier_limit(p90), 88_000);
        assert_eq!(detect_plan(p90), "max5");
    }

    #[test]
    fn test_p90_falls_back_to_all_completed_windows() {
        let windows = closed_windows(&[5_000, 8_000, 12_000, 15_000]);
        let config = P90Config {
            default_min_limit: 1_000,
            ..P90Config::default()
        };
        // No window near a tier; index floor(3 * 0.9) = 2
        assert_eq!(calculate_p90_limit(&windows, &config), 12_000);
    }

    #[test]
    fn test_p90_floors_at_minimum() {
        assert_eq!(calculate_p90_limit(&[], &P90Config::default()), 19_000);
        let windows = closed_windows(&[1_000, 2_000]);
        assert_eq!(calculate_p90_limit(&windows, &P90Config::default()), 19_000);
        assert_eq!(detect_plan(10_000), "custom");
    }

    #[test]
    fn test_active_windows_are_excluded() {
        let windows = fold_windows(&[entry_at(at(10, 0), 300_000, 0)]);
        let windows = classify_windows(windows, at(11, 0));
        assert_eq!(calculate_p90_limit(&windows, &P90Config::default()), 19_000);
    }

    #[test]
    fn test_should_switch_tier() {
        let windows = closed_windows(&[30_000, 25_000, 10_000]);
        assert!(should_switch_tier(&windows, "pro"));
        assert!(!should_switch_tier(&windows, "max5"));
        assert!(!should_switch_tier(&windows, "custom"));
        assert!(!should_switch_tier(&[], "pro"));
    }

    #[test]
    fn test_limit_status_levels() {
        let mut window = closed_windows(&[1_050]).remove(0);
        let budget = Budget {
            plan_name: "Custom".to_string(),
            token_limit: 0,
            cost_limit_usd: 10.0,
            message_limit: 100,
        };

        window.cost_usd = 5.0;
        window.message_count = 90;
        let status = limit_status(&window, &budget);
        assert_eq!(status.kind, Some(LimitKind::Messages));
        assert_eq!(status.level, LimitLevel::Approaching);

        window.cost_usd = 9.6;
        let status = limit_status(&window, &budget);
        assert_eq!(status.kind, Some(LimitKind::Cost));
        assert_eq!(status.level, LimitLevel::Critical);

        window.cost_usd = 0.0;
        window.message_count = 0;
        let status = limit_status(&window, &budget);
        assert_eq!(status.kind, None);
        assert_eq!(status.level, LimitLevel::Normal);
    }

    #[test]
    fn test_model_totals_sum_across_windows() {
        let windows = closed_windows(&[1_050, 2_050]);
        let totals = model_totals(&windows);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals["claude-sonnet-4-5"].total_tokens(), 3_100);
        assert_eq!(totals["claude-sonnet-4-5"].message_count, 2);
    }
}
