//! In-memory segment table cache.
//!
//! Caches parsed segment tables by path so the handler does not re-read the
//! table file on every request. Entries are dropped when the file changes.

use dashmap::DashMap;
use spdash_media::SegmentTable;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Entry in the table cache.
struct CacheEntry {
    table: Arc<SegmentTable>,
    last_accessed: Instant,
    file_modified: Option<SystemTime>,
}

/// Thread-safe cache of segment tables.
pub struct TableCache {
    entries: DashMap<PathBuf, CacheEntry>,
    max_entries: usize,
}

impl TableCache {
    /// Create a new table cache.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Get a table from the cache, loading it on a miss. File access runs on
    /// the blocking pool.
    pub async fn get_or_load(&self, path: &Path) -> spdash_media::Result<Arc<SegmentTable>> {
        let owned = path.to_owned();
        let modified = blocking(move || Ok(file_modified(&owned))).await?;

        if let Some(mut entry) = self.entries.get_mut(path) {
            if entry.file_modified == modified {
                entry.last_accessed = Instant::now();
                return Ok(Arc::clone(&entry.table));
            }
            // Stale
            drop(entry);
            self.entries.remove(path);
            tracing::debug!(path = %path.display(), "Segment table changed on disk");
        }

        let owned = path.to_owned();
        let table = Arc::new(blocking(move || SegmentTable::load(&owned)).await?);
        tracing::info!(
            path = %path.display(),
            qualities = table.quality_count(),
            segments = table.segment_count(),
            "Loaded segment table"
        );

        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            path.to_owned(),
            CacheEntry {
                table: Arc::clone(&table),
                last_accessed: Instant::now(),
                file_modified: modified,
            },
        );
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_accessed)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl Default for TableCache {
    fn default() -> Self {
        Self::new(64)
    }
}

fn file_modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

async fn blocking<T, F>(f: F) -> spdash_media::Result<T>
where
    F: FnOnce() -> spdash_media::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| spdash_media::Error::Io(io::Error::other(e)))?
}
