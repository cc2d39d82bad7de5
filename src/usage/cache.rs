//! Cache manager for incremental data refresh

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::usage::models::UsageEntry;
use crate::usage::pricing::PricingCalculator;
use crate::usage::reader::{
    cutoff_for, file_mtime, find_jsonl_files, merge_entries, modified_before, read_jsonl_file, ReaderError,
};

/// Cached data for a single file
#[derive(Debug, Clone)]
struct FileCacheEntry {
    /// File modification time when cached
    mtime: SystemTime,
    /// Parsed entries from this file
    entries: Vec<UsageEntry>,
}

/// Per-file parse cache. Only files whose mtime moved are re-read on each load.
#[derive(Debug, Default)]
pub struct CacheManager {
    file_cache: HashMap<PathBuf, FileCacheEntry>,
}

/// Result of checking file changes
#[derive(Debug, Default, PartialEq)]
pub struct FileChanges {
    /// Files that have been modified
    pub modified: Vec<PathBuf>,
    /// New files not in cache
    pub new_files: Vec<PathBuf>,
    /// Files that were deleted (in cache but not on disk)
    pub deleted: Vec<PathBuf>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.new_files.is_empty() && self.deleted.is_empty()
    }
}

impl CacheManager {
    /// Create a new cache manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect file changes compared to cache
    pub fn check_file_changes(&self, current_files: &[PathBuf]) -> FileChanges {
        let mut changes = FileChanges::default();

        for file in current_files {
            let Some(current_mtime) = file_mtime(file) else {
                // Can't get mtime, treat as modified
                changes.modified.push(file.clone());
                continue;
            };

            match self.file_cache.get(file) {
                Some(cached) if current_mtime > cached.mtime => changes.modified.push(file.clone()),
                Some(_) => {}
                None => changes.new_files.push(file.clone()),
            }
        }

        let current_set: HashSet<&PathBuf> = current_files.iter().collect();
        changes.deleted = self
            .file_cache
            .keys()
            .filter(|cached| !current_set.contains(cached))
            .cloned()
            .collect();

        changes
    }

    /// Re-read changed files and return the merged entries within the lookback
    pub fn load(
        &mut self,
        projects_dir: &Path,
        hours_back: u32,
        now: DateTime<Utc>,
        pricing: &PricingCalculator,
    ) -> Result<Vec<UsageEntry>, ReaderError> {
        let cutoff = cutoff_for(hours_back, now);
        let files: Vec<PathBuf> = find_jsonl_files(projects_dir)?
            .into_iter()
            .filter(|file| !cutoff.is_some_and(|cutoff| modified_before(file, cutoff)))
            .collect();

        let changes = self.check_file_changes(&files);
        if !changes.is_empty() {
            debug!(
                "File changes: {} modified, {} new, {} deleted",
                changes.modified.len(),
                changes.new_files.len(),
                changes.deleted.len()
            );
        }

        for deleted in &changes.deleted {
            self.file_cache.remove(deleted);
        }

        for file in changes.modified.iter().chain(changes.new_files.iter()) {
            match read_jsonl_file(file, pricing) {
                Ok(entries) => {
                    let mtime = file_mtime(file).unwrap_or_else(SystemTime::now);
                    self.file_cache.insert(file.clone(), FileCacheEntry { mtime, entries });
                }
                Err(e) => {
                    warn!("Failed to read file {:?}: {}", file, e);
                }
            }
        }

        let entries = merge_entries(
            files
                .iter()
                .filter_map(|file| self.file_cache.get(file))
                .map(|cached| cached.entries.as_slice()),
            cutoff,
        );
        Ok(entries)
    }
}
