//! Weight-bounded LRU cache of index-file contents, shared across
//! partitions on the read path. The `lru` crate is count-bounded; this
//! wraps it with manual byte-weight tracking keyed by canonical path, the
//! way a weigher-based cache is expressed without a weigher-aware crate in
//! this codebase's dependency stack.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;

pub struct WeightedIndexCache {
    inner: LruCache<PathBuf, Arc<Vec<u8>>>,
    total_bytes: u64,
    max_bytes: u64,
}

impl WeightedIndexCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            // Capacity is governed by total_bytes, not entry count; use the
            // largest representable count so inner never evicts on its own.
            inner: LruCache::new(NonZeroUsize::new(usize::MAX).unwrap()),
            total_bytes: 0,
            max_bytes,
        }
    }

    /// Returns the cached bytes for `path` if present, promoting it to most
    /// recently used.
    pub fn get(&mut self, path: &Path) -> Option<Arc<Vec<u8>>> {
        self.inner.get(path).cloned()
    }

    /// Inserts `bytes` for `path`, evicting least-recently-used entries
    /// until the cache is back under `max_bytes`. A single entry heavier
    /// than `max_bytes` is still inserted (and will be the next eviction).
    pub fn insert(&mut self, path: PathBuf, bytes: Arc<Vec<u8>>) {
        if let Some(old) = self.inner.put(path, bytes.clone()) {
            self.total_bytes = self.total_bytes.saturating_sub(old.len() as u64);
        }
        self.total_bytes += bytes.len() as u64;
        while self.total_bytes > self.max_bytes {
            match self.inner.pop_lru() {
                Some((_, evicted)) => {
                    self.total_bytes = self.total_bytes.saturating_sub(evicted.len() as u64);
                }
                None => break,
            }
        }
    }

    /// Removes a path's entry, if cached (used when a mergeId is
    /// superseded and its index file deleted).
    pub fn invalidate(&mut self, path: &Path) {
        if let Some(bytes) = self.inner.pop(path) {
            self.total_bytes = self.total_bytes.saturating_sub(bytes.len() as u64);
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}
