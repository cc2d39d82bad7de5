//! Local estimate of weekly usage, for when the usage API is unavailable

use chrono::{DateTime, Duration, Utc};

use crate::usage::models::{SessionWindow, WeeklyUsage};
use crate::usage::pricing::{get_weekly_limits, is_opus_model, is_sonnet_model, tokens_per_hour};

/// Sum display tokens of windows started within the last seven days and convert
/// them to estimated hours against the plan's weekly allowances
pub fn calculate_weekly_usage(windows: &[SessionWindow], plan_type: &str, now: DateTime<Utc>) -> WeeklyUsage {
    let week_ago = now - Duration::days(7);
    let mut usage = WeeklyUsage {
        start: Some(week_ago),
        end: Some(now),
        ..Default::default()
    };

    for window in windows.iter().filter(|w| !w.is_gap && w.start >= week_ago) {
        usage.total_tokens += window.display_tokens;
        for (model, stats) in &window.per_model {
            if is_sonnet_model(model) {
                usage.sonnet_tokens += stats.display_tokens();
            } else if is_opus_model(model) {
                usage.opus_tokens += stats.display_tokens();
            }
        }
    }

    let (sonnet_rate, opus_rate) = tokens_per_hour(plan_type);
    usage.sonnet_hours = usage.sonnet_tokens as f64 / sonnet_rate;
    usage.opus_hours = usage.opus_tokens as f64 / opus_rate;

    let limits = get_weekly_limits(plan_type);
    usage.sonnet_limit_hours = limits.sonnet_hours;
    usage.opus_limit_hours = limits.opus_hours;
    if usage.sonnet_limit_hours > 0.0 {
        usage.sonnet_percent = usage.sonnet_hours / usage.sonnet_limit_hours * 100.0;
    }
    if usage.opus_limit_hours > 0.0 {
        usage.opus_percent = usage.opus_hours / usage.opus_limit_hours * 100.0;
    }

    usage
}

pub fn is_weekly_limit_approaching(usage: &WeeklyUsage) -> bool {
    usage.sonnet_percent > 80.0 || usage.opus_percent > 80.0
}

pub fn is_weekly_limit_exceeded(usage: &WeeklyUsage) -> bool {
    usage.sonnet_percent > 100.0 || usage.opus_percent > 100.0
}

/// Hours left in the weekly allowance, (sonnet, opus), never negative
pub fn estimate_hours_remaining(usage: &WeeklyUsage) -> (f64, f64) {
    (
        (usage.sonnet_limit_hours - usage.sonnet_hours).max(0.0),
        (usage.opus_limit_hours - usage.opus_hours).max(0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::windower::fold_windows;
    use crate::usage::windower::tests::{at, entry_at};

    #[test]
    fn test_weekly_usage_splits_models() {
        let mut opus = entry_at(at(6, 0), 25_000, 25_000);
        opus.model = "claude-opus-4-5-20251101".to_string();
        let entries = vec![entry_at(at(0, 0), 60_000, 40_000), opus];
        let windows = fold_windows(&entries);

        let usage = calculate_weekly_usage(&windows, "max5", at(12, 0));
        assert_eq!(usage.total_tokens, 150_000);
        assert_eq!(usage.sonnet_tokens, 100_000);
        assert_eq!(usage.opus_tokens, 50_000);
        assert!((usage.sonnet_hours - 1.0).abs() < 1e-9);
        assert!((usage.opus_hours - 1.0).abs() < 1e-9);
        assert_eq!(usage.sonnet_limit_hours, 210.0);
        assert!((usage.sonnet_percent - 100.0 / 210.0).abs() < 1e-9);
        // Opus weekly hours are not enforced
        assert_eq!(usage.opus_percent, 0.0);
        assert!(!is_weekly_limit_approaching(&usage));
    }

    #[test]
    fn test_windows_older_than_a_week_are_ignored() {
        let windows = fold_windows(&[entry_at(at(0, 0), 1_000, 1_000)]);
        let usage = calculate_weekly_usage(&windows, "pro", at(0, 0) + Duration::days(8));
        assert_eq!(usage.total_tokens, 0);
        assert_eq!(estimate_hours_remaining(&usage), (60.0, 0.0));
    }

    #[test]
    fn test_limit_thresholds() {
        let usage = WeeklyUsage {
            sonnet_percent: 101.0,
            ..Default::default()
        };
        assert!(is_weekly_limit_approaching(&usage));
        assert!(is_weekly_limit_exceeded(&usage));
    }
}
