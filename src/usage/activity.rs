//! Active/closed classification of session windows relative to `now`

use chrono::{DateTime, Utc};

use crate::usage::models::SessionWindow;

/// Mark each window active or closed at `now`.
///
/// A window is active while `start < now < end`. A closed window with entries gets
/// its `actual_end` frozen to the last entry's timestamp; an already frozen value is
/// never overwritten. Gap windows are never active.
pub fn classify_windows(mut windows: Vec<SessionWindow>, now: DateTime<Utc>) -> Vec<SessionWindow> {
    for window in windows.iter_mut().filter(|w| !w.is_gap) {
        window.is_active = window.start < now && now < window.end;

        if !window.is_active && window.actual_end.is_none() {
            window.actual_end = window.last_entry().map(|e| e.timestamp);
        }
    }
    windows
}

/// Index of the active window, falling back to the most recent non-gap one
pub fn current_window_index(windows: &[SessionWindow]) -> Option<usize> {
    windows
        .iter()
        .position(|w| w.is_active && !w.is_gap)
        .or_else(|| windows.iter().rposition(|w| !w.is_gap))
}
