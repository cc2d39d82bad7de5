//! Partitioning of usage entries into fixed-duration session windows

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::usage::models::{ModelBreakdown, SessionWindow, UsageEntry};
use crate::usage::pricing::normalize_model_name;

/// Session duration in minutes (5 hours)
pub const SESSION_DURATION_MINUTES: i64 = 300;

pub fn session_duration() -> Duration {
    Duration::minutes(SESSION_DURATION_MINUTES)
}

/// Fold chronologically sorted entries into windows using the default 5-hour duration
pub fn fold_windows(entries: &[UsageEntry]) -> Vec<SessionWindow> {
    fold_windows_with_duration(entries, session_duration())
}

/// Fold chronologically sorted entries into windows of `duration`.
///
/// A window opens at its first entry floored to the hour. An entry at or past the
/// window end opens the next window; when the silence since that end is strictly
/// longer than `duration` a gap window `[end, entry)` is emitted between the two.
///
/// Output is strictly chronological: the closed window, then its gap, then the next
/// window. Consumers select gaps by `is_gap`, never by position.
pub fn fold_windows_with_duration(entries: &[UsageEntry], duration: Duration) -> Vec<SessionWindow> {
    let (mut windows, open) = entries.iter().fold(
        (Vec::new(), None::<SessionWindow>),
        |(mut windows, open), entry| {
            let current = match open {
                Some(mut window) if entry.timestamp < window.end => {
                    absorb(&mut window, entry);
                    window
                }
                Some(window) => {
                    let gap = (entry.timestamp - window.end > duration)
                        .then(|| gap_window(window.end, entry.timestamp));
                    windows.push(window);
                    windows.extend(gap);
                    open_window(entry, duration)
                }
                None => open_window(entry, duration),
            };
            (windows, Some(current))
        },
    );

    if let Some(window) = open {
        windows.push(window);
    }
    windows
}

/// Floor a timestamp to the start of its UTC hour
pub fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::hours(1)).unwrap_or(ts)
}

fn open_window(first: &UsageEntry, duration: Duration) -> SessionWindow {
    let start = floor_to_hour(first.timestamp);
    let mut window = SessionWindow {
        id: format!("session_{}", start.timestamp()),
        start,
        end: start + duration,
        actual_end: None,
        entries: Vec::new(),
        display_tokens: 0,
        total_tokens: 0,
        cost_usd: 0.0,
        message_count: 0,
        per_model: Default::default(),
        is_active: false,
        is_gap: false,
    };
    absorb(&mut window, first);
    window
}

fn gap_window(start: DateTime<Utc>, end: DateTime<Utc>) -> SessionWindow {
    SessionWindow {
        id: format!("gap_{}", start.timestamp()),
        start,
        end,
        actual_end: None,
        entries: Vec::new(),
        display_tokens: 0,
        total_tokens: 0,
        cost_usd: 0.0,
        message_count: 0,
        per_model: Default::default(),
        is_active: false,
        is_gap: true,
    }
}

fn absorb(window: &mut SessionWindow, entry: &UsageEntry) {
    window.display_tokens += entry.display_tokens();
    window.total_tokens += entry.total_tokens();
    window.cost_usd += entry.cost_usd;
    window.message_count += 1;
    window
        .per_model
        .entry(normalize_model_name(&entry.model))
        .or_insert_with(ModelBreakdown::default)
        .absorb(entry);
    window.entries.push(entry.clone());
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 1, h, m, 0).unwrap()
    }

    pub(crate) fn entry_at(ts: DateTime<Utc>, input: u64, output: u64) -> UsageEntry {
        UsageEntry {
            timestamp: ts,
            input_tokens: input,
            output_tokens: output,
            cache_creation_tokens: 20,
            cache_read_tokens: 30,
            cost_usd: 0.05,
            model: "claude-sonnet-4-5-20250929".to_string(),
            message_id: format!("msg_{}", ts.timestamp()),
            request_id: format!("req_{}", ts.timestamp()),
        }
    }

    #[test]
    fn test_empty_input_yields_no_windows() {
        assert!(fold_windows(&[]).is_empty());
    }

    #[test]
    fn test_window_start_floors_to_hour() {
        let windows = fold_windows(&[entry_at(at(12, 52), 10, 10)]);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, at(12, 0));
        assert_eq!(windows[0].end, at(17, 0));
        assert_eq!(windows[0].id, format!("session_{}", at(12, 0).timestamp()));

        let windows = fold_windows(&[entry_at(at(13, 0), 10, 10)]);
        assert_eq!(windows[0].start, at(13, 0));
    }

    #[test]
    fn test_entry_at_window_end_opens_new_window() {
        let windows = fold_windows(&[entry_at(at(10, 30), 1, 1), entry_at(at(15, 0), 1, 1)]);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].start, at(15, 0));
        assert!(windows.iter().all(|w| !w.is_gap));
    }

    #[test]
    fn test_gap_inserted_only_for_silence_longer_than_duration() {
        // First window 00:00-05:00; next entry 6h after the window end
        let windows = fold_windows(&[entry_at(at(0, 10), 1, 1), entry_at(at(11, 0), 1, 1)]);
        assert_eq!(windows.len(), 3);
        assert!(!windows[0].is_gap);
        assert!(windows[1].is_gap);
        assert_eq!(windows[1].start, at(5, 0));
        assert_eq!(windows[1].end, at(11, 0));
        assert!(windows[1].entries.is_empty());
        assert_eq!(windows[1].id, format!("gap_{}", at(5, 0).timestamp()));
        assert_eq!(windows[2].start, at(11, 0));

        // Four hours after the window end: no gap
        let windows = fold_windows(&[entry_at(at(0, 10), 1, 1), entry_at(at(9, 0), 1, 1)]);
        assert_eq!(windows.len(), 2);
        assert!(windows.iter().all(|w| !w.is_gap));
    }

    #[test]
    fn test_silence_exactly_one_duration_is_not_a_gap() {
        let windows = fold_windows(&[entry_at(at(0, 0), 1, 1), entry_at(at(10, 0), 1, 1)]);
        assert_eq!(windows.len(), 2);
        assert!(windows.iter().all(|w| !w.is_gap));

        let windows = fold_windows(&[entry_at(at(0, 0), 1, 1), entry_at(at(10, 1), 1, 1)]);
        assert_eq!(windows.len(), 3);
        assert!(windows[1].is_gap);
    }

    #[test]
    fn test_windows_partition_entries_in_order() {
        let entries: Vec<_> = [(0, 5), (1, 0), (4, 59), (5, 0), (6, 30), (18, 0), (19, 15)]
            .iter()
            .map(|&(h, m)| entry_at(at(h, m), 100, 40))
            .collect();

        let windows = fold_windows(&entries);
        let flattened: Vec<_> = windows
            .iter()
            .filter(|w| !w.is_gap)
            .flat_map(|w| w.entries.iter().cloned())
            .collect();
        assert_eq!(flattened, entries);
        assert!(windows.iter().filter(|w| w.is_gap).all(|w| w.entries.is_empty()));
        assert!(windows.iter().all(|w| w.end >= w.start));

        // Idempotent
        assert_eq!(fold_windows(&entries), windows);
    }

    #[test]
    fn test_aggregates_and_per_model_breakdown() {
        let mut opus = entry_at(at(9, 30), 500, 200);
        opus.model = "claude-opus-4-5-20251101".to_string();
        let entries = vec![entry_at(at(9, 0), 100, 50), opus, entry_at(at(10, 0), 10, 5)];

        let windows = fold_windows(&entries);
        assert_eq!(windows.len(), 1);
        let window = &windows[0];
        assert_eq!(window.display_tokens, 865);
        assert_eq!(window.total_tokens, 865 + 3 * 50);
        assert_eq!(window.message_count, 3);
        assert!((window.cost_usd - 0.15).abs() < 1e-9);
        assert!(window.display_tokens <= window.total_tokens);

        let per_model_display: u64 = window.per_model.values().map(|m| m.display_tokens()).sum();
        assert_eq!(per_model_display, window.display_tokens);
        assert_eq!(window.per_model["claude-opus-4-5"].message_count, 1);
        assert_eq!(window.per_model["claude-sonnet-4-5"].message_count, 2);
    }
}
