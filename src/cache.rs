//! Segmented LRU cache over raw (decompressed) block bytes.
//!
//! The keyspace is striped across N independently locked segments, each
//! owning `max_bytes / N` of the global budget and its own access-ordered
//! map. Striping keeps lock contention near O(1) under concurrency while
//! preserving strict LRU within a segment. No global lock exists; no two
//! segment locks are ever held at once.
//!
//! Values are shared, immutable byte buffers. A buffer returned by `get`
//! stays valid after the entry is evicted; later lookups simply miss.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use lru::LruCache;

use crate::config::CacheConfig;

/// Cache key: one block within one table file.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub path: Arc<PathBuf>,
    pub offset: u64,
}

impl CacheKey {
    pub fn new(path: Arc<PathBuf>, offset: u64) -> Self {
        Self { path, offset }
    }
}

struct Segment {
    entries: LruCache<CacheKey, Arc<[u8]>>,
    bytes: usize,
}

pub struct BlockCache {
    segments: Vec<Mutex<Segment>>,
    mask: u64,
    per_segment_budget: usize,
    total_bytes: AtomicUsize,
}

impl BlockCache {
    /// Create a cache with the given global byte budget and a default
    /// segment count of `clamp(next_pow2(2 * cores), 8, 64)`.
    pub fn new(max_bytes: usize) -> Self {
        Self::with_config(CacheConfig::default().max_bytes(max_bytes))
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let segments = config
            .segments
            .unwrap_or_else(default_segments)
            .max(1)
            .next_power_of_two();
        let per_segment_budget = (config.max_bytes / segments).max(1);
        Self {
            segments: (0..segments)
                .map(|_| {
                    Mutex::new(Segment {
                        entries: LruCache::unbounded(),
                        bytes: 0,
                    })
                })
                .collect(),
            mask: (segments - 1) as u64,
            per_segment_budget,
            total_bytes: AtomicUsize::new(0),
        }
    }

    /// Look up a block, promoting it to most-recently-used on hit. A
    /// poisoned segment degrades to a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<[u8]>> {
        let Ok(mut segment) = self.segment(key).lock() else {
            return None;
        };
        segment.entries.get(key).cloned()
    }

    /// Insert a block, evicting least-recently-used entries in the owning
    /// segment until it is back within budget. Empty blocks and blocks
    /// larger than a whole segment's budget are not cached.
    pub fn put(&self, key: CacheKey, bytes: Arc<[u8]>) {
        let len = bytes.len();
        if len == 0 || len > self.per_segment_budget {
            return;
        }
        let Ok(mut segment) = self.segment(&key).lock() else {
            return;
        };
        if let Some(prev) = segment.entries.put(key, bytes) {
            segment.bytes -= prev.len();
            self.total_bytes.fetch_sub(prev.len(), Ordering::Relaxed);
        }
        segment.bytes += len;
        self.total_bytes.fetch_add(len, Ordering::Relaxed);

        while segment.bytes > self.per_segment_budget {
            match segment.entries.pop_lru() {
                Some((_, evicted)) => {
                    segment.bytes -= evicted.len();
                    self.total_bytes.fetch_sub(evicted.len(), Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Drop a single entry.
    pub fn remove(&self, key: &CacheKey) {
        let Ok(mut segment) = self.segment(key).lock() else {
            return;
        };
        if let Some(removed) = segment.entries.pop(key) {
            segment.bytes -= removed.len();
            self.total_bytes.fetch_sub(removed.len(), Ordering::Relaxed);
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        for segment in &self.segments {
            let Ok(mut segment) = segment.lock() else {
                continue;
            };
            self.total_bytes.fetch_sub(segment.bytes, Ordering::Relaxed);
            segment.bytes = 0;
            segment.entries.clear();
        }
    }

    /// Approximate resident bytes across all segments.
    pub fn current_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn per_segment_budget(&self) -> usize {
        self.per_segment_budget
    }

    fn segment(&self, key: &CacheKey) -> &Mutex<Segment> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let h = hasher.finish();
        let spread = h ^ (h >> 16);
        &self.segments[(spread & self.mask) as usize]
    }
}

fn default_segments() -> usize {
    let cores = thread::available_parallelism().map_or(4, |n| n.get());
    (2 * cores).next_power_of_two().clamp(8, 64)
}
