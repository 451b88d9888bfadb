//! Bounded, TTL-expiring result cache keyed by query fingerprint.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::escape::normalize_query;
use crate::query::{Params, QueryResult};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: QueryResult,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    evictions: u64,
    expirations: u64,
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    counters: Counters,
}

/// Snapshot returned by [`QueryCache::get_stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub max_size: usize,
    /// `hits / (hits + misses)`, zero before the first lookup.
    pub hit_rate: f64,
}

/// LRU cache of successful query results.
///
/// Entries older than the configured TTL are treated as absent and dropped
/// on access. When full, the least recently used entry is evicted.
pub struct QueryCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    max_size: usize,
    key_prefix: String,
    enabled: bool,
}

impl QueryCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                counters: Counters::default(),
            }),
            ttl: config.ttl(),
            max_size: capacity.get(),
            key_prefix: config.key_prefix.clone(),
            enabled: config.enabled,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deterministic key for a statement and its parameters.
    ///
    /// Whitespace and keyword case outside literals do not affect the key;
    /// parameter order does not either since [`Params`] is sorted.
    #[must_use]
    pub fn key_for(&self, query: &str, params: &Params) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalize_query(query).as_bytes());
        hasher.update(&[0]);
        // BTreeMap<String, Value> always serializes.
        let params_json = serde_json::to_string(params).unwrap_or_default();
        hasher.update(params_json.as_bytes());
        format!("{}{}", self.key_prefix, hasher.finalize().to_hex())
    }

    #[must_use]
    pub fn get(&self, query: &str, params: &Params) -> Option<QueryResult> {
        if !self.enabled {
            return None;
        }
        let key = self.key_for(query, params);
        let mut guard = self.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get(&key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                let value = entry.value.clone();
                inner.counters.hits += 1;
                tracing::debug!(key = %key, "cache hit");
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.pop(&key);
            inner.counters.expirations += 1;
        }
        inner.counters.misses += 1;
        tracing::debug!(key = %key, expired, "cache miss");
        None
    }

    /// Store a result. Results carrying an error are never cached.
    pub fn set(&self, query: &str, params: &Params, result: &QueryResult) {
        if !self.enabled || result.is_error() {
            return;
        }
        let key = self.key_for(query, params);
        let entry = CacheEntry {
            value: result.clone(),
            inserted_at: Instant::now(),
        };
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.counters.sets += 1;
        if let Some((evicted, _)) = inner.entries.push(key.clone(), entry)
            && evicted != key
        {
            inner.counters.evictions += 1;
            tracing::debug!(key = %evicted, "cache eviction");
        }
    }

    /// Remove one entry. Returns whether it was present.
    pub fn delete(&self, query: &str, params: &Params) -> bool {
        let key = self.key_for(query, params);
        self.lock().entries.pop(&key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        tracing::debug!(dropped, "cache cleared");
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(self.ttl))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        inner.counters.expirations += expired.len() as u64;
        expired.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get_stats(&self) -> CacheStats {
        let inner = self.lock();
        let c = &inner.counters;
        let lookups = c.hits + c.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            c.hits as f64 / lookups as f64
        };
        CacheStats {
            hits: c.hits,
            misses: c.misses,
            sets: c.sets,
            evictions: c.evictions,
            expirations: c.expirations,
            size: inner.entries.len(),
            max_size: self.max_size,
            hit_rate,
        }
    }
}
