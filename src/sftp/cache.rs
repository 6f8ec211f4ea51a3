//! Directory listing cache
//!
//! Keyed by `connection_id::path`. Entries are replaced whole, never merged,
//! so readers on other panes sharing the connection always see a complete
//! listing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::types::FileEntry;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct CacheEntry {
    entries: Arc<Vec<FileEntry>>,
    captured_at: Instant,
}

pub struct DirectoryCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

fn cache_key(connection_id: &str, path: &str) -> String {
    format!("{}::{}", connection_id, path)
}

impl DirectoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached listing, if captured less than one TTL ago.
    ///
    /// An expired entry is dropped on access.
    pub fn get(&self, connection_id: &str, path: &str) -> Option<Arc<Vec<FileEntry>>> {
        let key = cache_key(connection_id, path);
        let fresh = {
            let entry = self.entries.get(&key)?;
            self.is_fresh(&entry).then(|| entry.entries.clone())
        };
        if fresh.is_none() {
            self.evict_expired(&key);
        }
        fresh
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.captured_at.elapsed() < self.ttl
    }

    /// Remove `key` only if it is still expired; a listing put in the
    /// meantime survives.
    fn evict_expired(&self, key: &str) {
        if self.entries.remove_if(key, |_, entry| !self.is_fresh(entry)).is_some() {
            debug!("Cache entry expired: {}", key);
        }
    }

    pub fn put(&self, connection_id: &str, path: &str, entries: Vec<FileEntry>) {
        self.entries.insert(
            cache_key(connection_id, path),
            CacheEntry {
                entries: Arc::new(entries),
                captured_at: Instant::now(),
            },
        );
    }

    /// Drop every listing for a connection
    pub fn invalidate(&self, connection_id: &str) {
        let prefix = cache_key(connection_id, "");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        debug!("Invalidated cache for connection {}", connection_id);
    }

    pub fn invalidate_path(&self, connection_id: &str, path: &str) {
        self.entries.remove(&cache_key(connection_id, path));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
