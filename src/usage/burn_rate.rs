//! Burn rate estimation over overlapping session windows

use chrono::{DateTime, Duration, Utc};

use crate::usage::models::{SessionWindow, VelocityEstimate};

/// Trailing lookback for the burn rate, in minutes
pub const BURN_RATE_LOOKBACK_MINUTES: i64 = 60;

/// Trailing-hour token and cost velocity at `now`.
///
/// Each window contributes the share of its tokens and cost proportional to how much
/// of its effective span overlaps `[now - 1h, now]`, assuming uniform consumption
/// within the window. Windows whose span is zero contribute nothing.
pub fn calculate_burn_rate(windows: &[SessionWindow], now: DateTime<Utc>) -> VelocityEstimate {
    let lookback_start = now - Duration::minutes(BURN_RATE_LOOKBACK_MINUTES);
    let mut tokens = 0.0;
    let mut cost = 0.0;

    for window in windows.iter().filter(|w| !w.is_gap) {
        let effective_end = effective_end(window, now);

        // Ended before the lookback, or not yet begun
        if effective_end < lookback_start || window.start > now {
            continue;
        }

        let overlap_start = window.start.max(lookback_start);
        let overlap_end = effective_end.min(now);
        if overlap_end < overlap_start {
            continue;
        }

        let total_minutes = minutes(effective_end - window.start);
        if total_minutes <= 0.0 {
            continue;
        }

        let proportion = minutes(overlap_end - overlap_start) / total_minutes;
        tokens += window.display_tokens as f64 * proportion;
        cost += window.cost_usd * proportion;
    }

    let lookback = BURN_RATE_LOOKBACK_MINUTES as f64;
    VelocityEstimate {
        tokens_per_minute: tokens / lookback,
        cost_per_minute: cost / lookback,
    }
}

/// Average cost per minute since a window started; zero before any time has elapsed
pub fn calculate_cost_burn_rate(window: &SessionWindow, now: DateTime<Utc>) -> f64 {
    if window.is_gap {
        return 0.0;
    }
    let elapsed = minutes(window.elapsed(now));
    if elapsed <= 0.0 {
        return 0.0;
    }
    window.cost_usd / elapsed
}

/// Average display tokens per minute since a window started
pub fn calculate_token_burn_rate(window: &SessionWindow, now: DateTime<Utc>) -> f64 {
    if window.is_gap {
        return 0.0;
    }
    let elapsed = minutes(window.elapsed(now));
    if elapsed <= 0.0 {
        return 0.0;
    }
    window.display_tokens as f64 / elapsed
}

fn effective_end(window: &SessionWindow, now: DateTime<Utc>) -> DateTime<Utc> {
    if window.is_active {
        return now;
    }
    window.actual_end.unwrap_or(window.end)
}

fn minutes(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 60_000.0
}
