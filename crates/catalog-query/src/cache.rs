//! Query result cache.
//!
//! Caches computed listing responses under the canonical key of their
//! [`QuerySpec`](crate::QuerySpec).
//!
//! ## Design
//!
//! - **Eviction**: FIFO by insertion time. Lookups never reorder entries;
//!   replacing a key re-inserts it at the back.
//! - **Expiry**: TTL is checked lazily on lookup. Expired entries stay resident
//!   and are reported as [`CacheLookup::Stale`] until overwritten, evicted or
//!   cleared, so callers can serve them when recomputation fails.
//! - **Invalidation**: any catalog write clears the whole cache.
//! - **Time**: read through an injected [`Clock`](catalog_core::Clock).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use catalog_core::{DynClock, SystemClock};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

pub const DEFAULT_CAPACITY: usize = 500;
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<V> {
    Fresh(V),
    /// Resident but older than the TTL.
    Stale(V),
    Miss,
}

impl<V> CacheLookup<V> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheLookup::Fresh(_))
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    payload: V,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct CacheStatistics {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    clears: AtomicU64,
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub clears: u64,
    pub size: usize,
    pub capacity: usize,
    pub ttl_ms: u64,
    pub hit_ratio: f64,
}

/// Bounded FIFO cache with lazy TTL.
pub struct QueryResultCache<V> {
    entries: Mutex<IndexMap<String, CacheEntry<V>>>,
    capacity: usize,
    ttl: Duration,
    clock: DynClock,
    stats: CacheStatistics,
}

impl<V> std::fmt::Debug for QueryResultCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResultCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("size", &self.entries.lock().len())
            .finish()
    }
}

impl<V: Clone> QueryResultCache<V> {
    pub fn new(capacity: usize, ttl: Duration, clock: DynClock) -> Self {
        Self {
            entries: Mutex::new(IndexMap::with_capacity(capacity)),
            capacity,
            ttl,
            clock,
            stats: CacheStatistics::default(),
        }
    }

    /// Cache on the system clock with default capacity and TTL.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL, SystemClock::shared())
    }

    pub fn get(&self, key: &str) -> CacheLookup<V> {
        let now = self.clock.now();
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if now.saturating_duration_since(entry.inserted_at) <= self.ttl => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Fresh(entry.payload.clone())
            }
            Some(entry) => {
                self.stats.stale_hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Stale(entry.payload.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Miss
            }
        }
    }

    pub fn get_fresh(&self, key: &str) -> Option<V> {
        match self.get(key) {
            CacheLookup::Fresh(v) => Some(v),
            _ => None,
        }
    }

    /// Insert or replace `key`, evicting the earliest inserted entries at capacity.
    pub fn set(&self, key: impl Into<String>, payload: V) {
        if self.capacity == 0 {
            return;
        }
        let key = key.into();
        let entry = CacheEntry {
            payload,
            inserted_at: self.clock.now(),
        };
        let mut entries = self.entries.lock();
        entries.shift_remove(&key);
        while entries.len() >= self.capacity {
            if entries.shift_remove_index(0).is_none() {
                break;
            }
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        entries.insert(key, entry);
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        let removed = {
            let mut entries = self.entries.lock();
            let n = entries.len();
            entries.clear();
            n
        };
        self.stats.clears.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(removed, "Query result cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let stale_hits = self.stats.stale_hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let lookups = hits + stale_hits + misses;
        CacheStatsSnapshot {
            hits,
            stale_hits,
            misses,
            insertions: self.stats.insertions.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            clears: self.stats.clears.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.capacity,
            ttl_ms: self.ttl.as_millis() as u64,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}
