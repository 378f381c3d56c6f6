use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::fsio;
use crate::types::{MemoryCategory, MemoryEntry, TaskId, TaskStatus};

// ---------------------------------------------------------------------------
// MemoryFilter
// ---------------------------------------------------------------------------

/// Query predicate for [`MemoryStore::query`]. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub category: Option<MemoryCategory>,
    /// Every tag listed must be present on the entry.
    pub tags: BTreeSet<String>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MemoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: MemoryCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn since(mut self, t: DateTime<Utc>) -> Self {
        self.since = Some(t);
        self
    }

    pub fn until(mut self, t: DateTime<Utc>) -> Self {
        self.until = Some(t);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if self.category.is_some_and(|c| c != entry.category) {
            return false;
        }
        if !self.tags.iter().all(|t| entry.tags.contains(t)) {
            return false;
        }
        if self.since.is_some_and(|s| entry.timestamp < s) {
            return false;
        }
        if self.until.is_some_and(|u| entry.timestamp >= u) {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Append-only log of memory entries, one JSON file per entry.
///
/// Files are named `<seq:012>-<id>.json` so a directory listing sorts in
/// append order. Entries are never rewritten or removed.
pub struct MemoryStore {
    dir: PathBuf,
    /// Ascending by `seq`.
    entries: Vec<MemoryEntry>,
    next_seq: u64,
    skipped: usize,
}

impl MemoryStore {
    /// Open (or create) the store rooted at `dir`, loading every entry.
    ///
    /// Temp files left by an interrupted append are removed. Entries that
    /// fail to parse are skipped with a warning.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fsio::ensure_dir(&dir)?;

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        let listing = fs::read_dir(&dir).map_err(|e| StoreError::unavailable(&dir, e))?;
        for item in listing {
            let path = item.map_err(|e| StoreError::unavailable(&dir, e))?.path();
            if fsio::is_tmp_file(&path) {
                debug!(path = %path.display(), "removing interrupted memory write");
                let _ = fs::remove_file(&path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_entry(&path) {
                Ok(entry) => entries.push(entry),
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "skipping unreadable memory entry");
                    skipped += 1;
                }
            }
        }
        entries.sort_by_key(|e| e.seq);
        let next_seq = entries.last().map(|e| e.seq + 1).unwrap_or(1);
        debug!(dir = %dir.display(), count = entries.len(), skipped, "memory store opened");

        Ok(Self {
            dir,
            entries,
            next_seq,
            skipped,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Durably append `entry`, assigning its `seq`. Returns the entry id.
    pub fn append(&mut self, mut entry: MemoryEntry) -> Result<Uuid, StoreError> {
        entry.seq = self.next_seq;
        let path = self.dir.join(format!("{:012}-{}.json", entry.seq, entry.id));
        fsio::write_json_atomic(&path, &entry)?;
        self.next_seq += 1;
        let id = entry.id;
        debug!(%id, seq = entry.seq, category = %entry.category, "memory entry appended");
        self.entries.push(entry);
        Ok(id)
    }

    /// Entries matching `filter`, newest first.
    pub fn query(&self, filter: &MemoryFilter) -> Vec<MemoryEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// The `n` most recent entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<MemoryEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn get(&self, id: &Uuid) -> Option<&MemoryEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// All entries in append order.
    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that could not be parsed when the store was opened.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Highest-revision reflection recorded for `night`.
    pub fn latest_reflection(&self, night: NaiveDate) -> Option<&MemoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.as_reflection().is_some_and(|r| r.night == night))
            .max_by_key(|e| (e.as_reflection().map(|r| r.revision), e.seq))
    }

    /// The outcome entry recorded for `task_id` reaching `status` at `revision`.
    pub fn find_task_outcome(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        revision: u32,
    ) -> Option<&MemoryEntry> {
        self.entries.iter().rev().find(|e| {
            e.as_task_outcome()
                .is_some_and(|o| o.task_id == task_id && o.to == status && o.revision == revision)
        })
    }
}

fn load_entry(path: &Path) -> Result<MemoryEntry, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}
