//! JSONL file reading and parsing

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use glob::glob;
use log::{debug, warn};

use crate::usage::models::{SessionEvent, UsageEntry};
use crate::usage::pricing::PricingCalculator;

/// Error type for reader operations
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Directory not found: {0}")]
    DirNotFound(String),
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Recursively find all `.jsonl` files below `root`
pub fn find_jsonl_files(root: &Path) -> Result<Vec<PathBuf>, ReaderError> {
    if !root.is_dir() {
        return Err(ReaderError::DirNotFound(root.to_string_lossy().to_string()));
    }

    let pattern = root.join("**").join("*.jsonl");
    let mut files: Vec<PathBuf> = glob(pattern.to_string_lossy().as_ref())?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                debug!("Skipping unreadable path: {}", e);
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    Ok(files)
}

/// Read every usage entry from one JSONL file.
///
/// Malformed lines are skipped; only IO failures are errors.
pub fn read_jsonl_file(path: &Path, pricing: &PricingCalculator) -> Result<Vec<UsageEntry>, ReaderError> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = match line_result {
            Ok(l) => l,
            Err(e) => {
                debug!("Failed to read line {} in {:?}: {}", line_num, path, e);
                continue;
            }
        };

        if let Some(entry) = parse_line(&line, pricing) {
            entries.push(entry);
        }
    }

    Ok(entries)
}

/// Parse one JSONL line into a usage entry.
///
/// Only `assistant` records that consumed input or output tokens qualify.
pub fn parse_line(line: &str, pricing: &PricingCalculator) -> Option<UsageEntry> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let event: SessionEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            debug!("Failed to parse JSON line: {}", e);
            return None;
        }
    };

    if event.event_type.as_deref() != Some("assistant") {
        return None;
    }

    let message = event.message.as_ref()?;
    let usage = message.usage.clone().unwrap_or_default();
    let input_tokens = usage.input_tokens.unwrap_or(0);
    let output_tokens = usage.output_tokens.unwrap_or(0);
    if input_tokens == 0 && output_tokens == 0 {
        return None;
    }

    let timestamp = match event.timestamp.as_deref().and_then(parse_timestamp) {
        Some(ts) => ts,
        None => {
            debug!("Skipping record with unparseable timestamp: {:?}", event.timestamp);
            return None;
        }
    };

    let model = message.model.clone().unwrap_or_else(|| "unknown".to_string());
    let cache_creation_tokens = usage.cache_creation_tokens.unwrap_or(0);
    let cache_read_tokens = usage.cache_read_tokens.unwrap_or(0);
    let cost_usd = event.cost.unwrap_or_else(|| {
        pricing.calculate_cost(
            &model,
            input_tokens,
            output_tokens,
            cache_creation_tokens,
            cache_read_tokens,
        )
    });

    Some(UsageEntry {
        timestamp,
        input_tokens,
        output_tokens,
        cache_creation_tokens,
        cache_read_tokens,
        cost_usd,
        model,
        message_id: message.id.clone().unwrap_or_default(),
        request_id: event.request_id.clone().unwrap_or_default(),
    })
}

/// Parse an RFC 3339 or naive ISO timestamp; naive values are taken as UTC
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

/// Oldest timestamp kept for a lookback of `hours_back` hours; zero keeps everything
pub fn cutoff_for(hours_back: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (hours_back > 0).then(|| now - Duration::hours(i64::from(hours_back)))
}

/// True when the file was last written before `cutoff`
pub fn modified_before(path: &Path, cutoff: DateTime<Utc>) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|mtime| DateTime::<Utc>::from(mtime) < cutoff)
        .unwrap_or(false)
}

pub(crate) fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Combine per-file entries into one sorted, deduplicated, time-filtered list.
///
/// The first occurrence of a dedup key wins. Entries missing either id are all kept.
pub fn merge_entries<'a, I>(files: I, cutoff: Option<DateTime<Utc>>) -> Vec<UsageEntry>
where
    I: IntoIterator<Item = &'a [UsageEntry]>,
{
    let mut seen = HashSet::new();
    let mut entries: Vec<UsageEntry> = files
        .into_iter()
        .flatten()
        .filter(|entry| cutoff.map_or(true, |cutoff| entry.timestamp >= cutoff))
        .filter(|entry| match entry.dedup_key() {
            Some(key) => seen.insert(key),
            None => true,
        })
        .cloned()
        .collect();

    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    entries
}

/// Load all usage entries below `projects_dir` within the lookback
pub fn load_usage_entries(
    projects_dir: &Path,
    hours_back: u32,
    now: DateTime<Utc>,
    pricing: &PricingCalculator,
) -> Result<Vec<UsageEntry>, ReaderError> {
    let cutoff = cutoff_for(hours_back, now);
    let files = find_jsonl_files(projects_dir)?;

    let per_file: Vec<Vec<UsageEntry>> = files
        .iter()
        .filter(|file| !cutoff.is_some_and(|cutoff| modified_before(file, cutoff)))
        .filter_map(|file| match read_jsonl_file(file, pricing) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!("Failed to read session file {:?}: {}", file, e);
                None
            }
        })
        .collect();

    let entries = merge_entries(per_file.iter().map(Vec::as_slice), cutoff);
    debug!("Loaded {} entries from {} files", entries.len(), files.len());
    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    pub(crate) fn assistant_line(ts: &str, message_id: &str, request_id: &str, input: u64, output: u64) -> String {
        serde_json::json!({
            "type": "assistant",
            "timestamp": ts,
            "requestId": request_id,
            "message": {
                "id": message_id,
                "model": "claude-sonnet-4-5-20250929",
                "usage": {
                    "input_tokens": input,
                    "output_tokens": output,
                    "cache_creation_input_tokens": 100,
                    "cache_read_input_tokens": 1000
                }
            }
        })
        .to_string()
    }

    pub(crate) fn write_file(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    #[test]
    fn test_parse_assistant_line() {
        let pricing = PricingCalculator::new();
        let line = assistant_line("2025-12-01T10:15:00.123Z", "msg_1", "req_1", 1_000_000, 0);
        let entry = parse_line(&line, &pricing).unwrap();
        assert_eq!(entry.timestamp, Utc.with_ymd_and_hms(2025, 12, 1, 10, 15, 0).unwrap() + Duration::milliseconds(123));
        assert_eq!(entry.cache_creation_tokens, 100);
        assert_eq!(entry.cache_read_tokens, 1000);
        assert_eq!(entry.message_id, "msg_1");
        assert_eq!(entry.request_id, "req_1");
        // 3.0 + 100 * 3.75e-6 + 1000 * 0.3e-6
        assert!((entry.cost_usd - 3.000675).abs() < 1e-9);
    }

    #[test]
    fn test_parse_skips_irrelevant_lines() {
        let pricing = PricingCalculator::new();
        assert!(parse_line("", &pricing).is_none());
        assert!(parse_line("{not json", &pricing).is_none());
        assert!(parse_line(r#"{"type":"user","timestamp":"2025-12-01T10:00:00Z"}"#, &pricing).is_none());
        let zero = assistant_line("2025-12-01T10:00:00Z", "m", "r", 0, 0);
        assert!(parse_line(&zero, &pricing).is_none());
        let bad_ts = assistant_line("yesterday", "m", "r", 10, 0);
        assert!(parse_line(&bad_ts, &pricing).is_none());
    }

    #[test]
    fn test_recorded_cost_wins_over_pricing() {
        let pricing = PricingCalculator::new();
        let line = r#"{"type":"assistant","timestamp":"2025-12-01T10:00:00","costUSD":0.42,"message":{"id":"m","usage":{"input_tokens":5}}}"#;
        let entry = parse_line(line, &pricing).unwrap();
        assert_eq!(entry.cost_usd, 0.42);
        assert_eq!(entry.model, "unknown");
        assert_eq!(entry.request_id, "");
    }

    #[test]
    fn test_load_dedups_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 12, 1, 12, 0, 0).unwrap();
        write_file(
            dir.path(),
            "proj-a/session1.jsonl",
            &[
                assistant_line("2025-12-01T11:00:00Z", "msg_2", "req_2", 20, 20),
                assistant_line("2025-12-01T10:00:00Z", "msg_1", "req_1", 10, 10),
                // Older than the 24h lookback
                assistant_line("2025-11-29T10:00:00Z", "msg_0", "req_0", 10, 10),
            ],
        );
        write_file(
            dir.path(),
            "proj-b/nested/session2.jsonl",
            &[
                // Duplicate of msg_1 from another file
                assistant_line("2025-12-01T10:00:00Z", "msg_1", "req_1", 10, 10),
                // Missing ids are never deduplicated
                assistant_line("2025-12-01T10:30:00Z", "", "", 5, 5),
                assistant_line("2025-12-01T10:30:00Z", "", "", 5, 5),
            ],
        );

        let entries = load_usage_entries(dir.path(), 24, now, &PricingCalculator::new()).unwrap();
        assert_eq!(entries.len(), 4);
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(entries.iter().filter(|e| e.message_id == "msg_1").count(), 1);
        assert_eq!(entries.last().map(|e| e.message_id.as_str()), Some("msg_2"));
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = find_jsonl_files(&dir.path().join("absent"));
        assert!(matches!(result, Err(ReaderError::DirNotFound(_))));
    }
}
