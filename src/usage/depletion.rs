//! Budget exhaustion forecasts for the session window and the weekly window

use chrono::{DateTime, Duration, Utc};

use crate::usage::models::DepletionForecast;

/// Weekly window length in days
pub const WEEKLY_WINDOW_DAYS: i64 = 7;

/// Minimum elapsed time in the weekly window before a forecast is attempted
pub const WEEKLY_MIN_SAMPLE_HOURS: i64 = 24;

/// When a cost budget runs out at `cost_per_minute`.
///
/// Undefined when nothing is being spent or nothing is left.
pub fn predict_cost_depletion(
    cost_per_minute: f64,
    remaining_usd: f64,
    now: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> DepletionForecast {
    project(cost_per_minute, remaining_usd, 60_000.0, now, window_end)
}

/// When a token budget runs out at `tokens_per_minute`
pub fn predict_token_depletion(
    tokens_per_minute: f64,
    remaining_tokens: f64,
    now: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> DepletionForecast {
    project(tokens_per_minute, remaining_tokens, 60_000.0, now, window_end)
}

/// When the weekly utilization reaches 100% at its average rate so far.
///
/// The window started `resets_at - 7d`. Less than a day into it the rate is too
/// noisy and the forecast is undefined; an already exhausted budget depletes now.
pub fn predict_weekly_depletion(
    utilization_pct: f64,
    resets_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DepletionForecast {
    let window_start = resets_at - Duration::days(WEEKLY_WINDOW_DAYS);
    let elapsed = now - window_start;
    if elapsed < Duration::hours(WEEKLY_MIN_SAMPLE_HOURS) {
        return DepletionForecast::undefined();
    }

    if utilization_pct >= 100.0 {
        return DepletionForecast {
            depletes_at: Some(now),
            will_exceed_before_reset: true,
        };
    }

    let elapsed_hours = elapsed.num_milliseconds() as f64 / 3_600_000.0;
    let rate = utilization_pct / elapsed_hours;
    project(rate, 100.0 - utilization_pct, 3_600_000.0, now, resets_at)
}

/// `now + remaining / rate` units, where one unit is `unit_ms` milliseconds
fn project(
    rate: f64,
    remaining: f64,
    unit_ms: f64,
    now: DateTime<Utc>,
    reset: DateTime<Utc>,
) -> DepletionForecast {
    if !(rate.is_finite() && rate > 0.0 && remaining.is_finite() && remaining > 0.0) {
        return DepletionForecast::undefined();
    }

    let offset_ms = (remaining / rate * unit_ms).round();
    if !offset_ms.is_finite() || offset_ms >= i64::MAX as f64 {
        return DepletionForecast::undefined();
    }

    match Duration::try_milliseconds(offset_ms as i64).and_then(|d| now.checked_add_signed(d)) {
        Some(eta) => DepletionForecast::at(eta, reset),
        None => DepletionForecast::undefined(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 3, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cost_depletion_eta() {
        let end = now() + Duration::hours(3);
        let forecast = predict_cost_depletion(0.10, 5.0, now(), end);
        assert_eq!(forecast.depletes_at, Some(now() + Duration::minutes(50)));
        assert!(forecast.will_exceed_before_reset);

        let forecast = predict_cost_depletion(0.10, 5.0, now(), now() + Duration::minutes(30));
        assert!(!forecast.will_exceed_before_reset);
    }

    #[test]
    fn test_cost_depletion_undefined_without_spend_or_budget() {
        let end = now() + Duration::hours(3);
        assert!(!predict_cost_depletion(0.0, 5.0, now(), end).is_defined());
        assert!(!predict_cost_depletion(0.10, 0.0, now(), end).is_defined());
        assert!(!predict_cost_depletion(0.10, -1.0, now(), end).is_defined());
        assert!(!predict_cost_depletion(f64::NAN, 5.0, now(), end).is_defined());
    }

    #[test]
    fn test_token_depletion_eta() {
        let end = now() + Duration::hours(5);
        let forecast = predict_token_depletion(100.0, 6_000.0, now(), end);
        assert_eq!(forecast.depletes_at, Some(now() + Duration::hours(1)));
        assert!(forecast.will_exceed_before_reset);
    }

    #[test]
    fn test_huge_offset_is_undefined() {
        let end = now() + Duration::hours(5);
        assert!(!predict_token_depletion(1e-300, 1e300, now(), end).is_defined());
    }

    #[test]
    fn test_weekly_needs_a_day_of_samples() {
        // Window started 23h ago
        let resets_at = now() - Duration::hours(23) + Duration::days(7);
        assert!(!predict_weekly_depletion(50.0, resets_at, now()).is_defined());
        // Even an exhausted budget stays undefined this early
        assert!(!predict_weekly_depletion(120.0, resets_at, now()).is_defined());
    }

    #[test]
    fn test_weekly_exhausted_depletes_now() {
        let resets_at = now() + Duration::days(3);
        let forecast = predict_weekly_depletion(100.0, resets_at, now());
        assert_eq!(forecast.depletes_at, Some(now()));
        assert!(forecast.will_exceed_before_reset);
    }

    #[test]
    fn test_weekly_linear_projection() {
        // 48h elapsed at 20% -> 10%/day, 80% left -> 8 days out, after the reset
        let resets_at = now() + Duration::days(5);
        let forecast = predict_weekly_depletion(20.0, resets_at, now());
        assert_eq!(forecast.depletes_at, Some(now() + Duration::hours(192)));
        assert!(!forecast.will_exceed_before_reset);

        // 48h elapsed at 50% -> 48h more, before the reset
        let forecast = predict_weekly_depletion(50.0, resets_at, now());
        assert_eq!(forecast.depletes_at, Some(now() + Duration::hours(48)));
        assert!(forecast.will_exceed_before_reset);

        assert!(!predict_weekly_depletion(0.0, resets_at, now()).is_defined());
    }
}
