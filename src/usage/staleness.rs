//! Detection of implausible externally-reported utilization after a window rollover
//!
//! The usage API can keep reporting the previous window's percentage for a while
//! after the five-hour window resets. A value far above what could have been
//! consumed since the reset is treated as stale and read as zero.

use chrono::{DateTime, Duration, Utc};

use crate::usage::models::{ExternalUsage, ExternalUtilization};
use crate::usage::windower::session_duration;

/// Cached data older than this is refetched regardless of other signals
pub const MAX_REFRESH_AGE_SECONDS: i64 = 120;

/// True when `reported` is more than twice what is plausible since `resets_at`.
///
/// Only applies once the reset has passed; before that any value is accepted.
pub fn is_stale(reported_pct: f64, resets_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    if resets_at > now {
        return false;
    }
    let elapsed = (now - resets_at).num_milliseconds() as f64;
    let window = session_duration().num_milliseconds() as f64;
    let max_plausible = (elapsed / window * 100.0).max(1.0);
    reported_pct > 2.0 * max_plausible
}

/// Apply the guard to the five-hour figure of one poll.
///
/// The flag is true when the figure was clamped; anything derived from the
/// five-hour window should then be treated as empty too.
pub fn sanitize(mut usage: ExternalUsage, now: DateTime<Utc>) -> (ExternalUsage, bool) {
    let five_hour = usage.five_hour;
    let stale = is_stale(five_hour.percent_used, five_hour.resets_at, now);
    if stale {
        usage.five_hour = ExternalUtilization {
            percent_used: 0.0,
            ..five_hour
        };
    }
    (usage, stale)
}

/// Whether cached usage data should be polled again before it is trusted.
///
/// True when the last refresh is more than two minutes old (a wake from sleep),
/// when the five-hour window following `resets_at` has fully ended, or when the
/// cached percentage is stale.
pub fn needs_refetch(
    cached: Option<&ExternalUsage>,
    last_refresh: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(cached) = cached else {
        return false;
    };

    if let Some(last_refresh) = last_refresh {
        if now - last_refresh > Duration::seconds(MAX_REFRESH_AGE_SECONDS) {
            return true;
        }
    }

    let five_hour = &cached.five_hour;
    if five_hour.resets_at + session_duration() <= now {
        return true;
    }

    is_stale(five_hour.percent_used, five_hour.resets_at, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 1, 15, 0, 0).unwrap()
    }

    fn usage(pct: f64, resets_at: DateTime<Utc>) -> ExternalUsage {
        let utilization = |percent_used| ExternalUtilization {
            percent_used,
            resets_at,
            fetched_at: now(),
        };
        ExternalUsage {
            five_hour: utilization(pct),
            seven_day: utilization(40.0),
            seven_day_sonnet: None,
            seven_day_opus: None,
        }
    }

    #[test]
    fn test_full_utilization_right_after_reset_is_stale() {
        let resets_at = now() - Duration::minutes(30);
        assert!(is_stale(100.0, resets_at, now()));
    }

    #[test]
    fn test_plausible_utilization_is_kept() {
        let resets_at = now() - Duration::minutes(30);
        assert!(!is_stale(5.0, resets_at, now()));
    }

    #[test]
    fn test_floor_of_one_percent_right_at_reset() {
        // max_plausible floors at 1%, so up to 2% is accepted immediately
        assert!(!is_stale(2.0, now(), now()));
        assert!(is_stale(2.5, now(), now()));
    }

    #[test]
    fn test_future_reset_is_never_stale() {
        assert!(!is_stale(99.0, now() + Duration::hours(2), now()));
    }

    #[test]
    fn test_sanitize_clamps_only_five_hour() {
        let (sanitized, stale) = sanitize(usage(100.0, now() - Duration::minutes(30)), now());
        assert!(stale);
        assert_eq!(sanitized.five_hour.percent_used, 0.0);
        assert_eq!(sanitized.seven_day.percent_used, 40.0);

        let (kept, stale) = sanitize(usage(5.0, now() - Duration::minutes(30)), now());
        assert!(!stale);
        assert_eq!(kept.five_hour.percent_used, 5.0);
    }

    #[test]
    fn test_needs_refetch_triggers() {
        let fresh = usage(10.0, now() + Duration::hours(2));
        assert!(!needs_refetch(None, None, now()));
        assert!(!needs_refetch(Some(&fresh), Some(now() - Duration::seconds(30)), now()));
        // Asleep for more than two minutes
        assert!(needs_refetch(Some(&fresh), Some(now() - Duration::minutes(3)), now()));
        // Window after the reset has fully ended
        let ended = usage(10.0, now() - Duration::hours(5));
        assert!(needs_refetch(Some(&ended), None, now()));
        // Stale percentage
        let stale = usage(90.0, now() - Duration::minutes(10));
        assert!(needs_refetch(Some(&stale), None, now()));
    }
}
