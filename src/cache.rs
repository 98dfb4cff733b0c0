// src/cache.rs
//! Short-lived in-memory response cache keyed by request signature.

use crate::api::types::RequestSignature;
use crate::error::Result;
use crate::utils::Clock;
use dashmap::DashMap;
use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Written once, replaced wholesale on overwrite.
#[derive(Debug)]
pub struct CacheEntry {
    payload: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.inserted_at.checked_add(self.ttl)
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        match self.expires_at() {
            Some(expiry) => now < expiry,
            // TTL too large to represent: never expires.
            None => true,
        }
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired_on_read: AtomicU64,
    writes: AtomicU64,
}

/// Cache metrics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub expired_on_read: u64,
    pub writes: u64,
    pub entries: usize,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Signature → payload map. Sharded, so different signatures never contend;
/// same-signature writes are last-writer-wins.
#[derive(Clone)]
pub struct CacheStore {
    entries: Arc<DashMap<RequestSignature, Arc<CacheEntry>>>,
    counters: Arc<CacheCounters>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("clock", &self.clock)
            .finish()
    }
}

impl CacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            counters: Arc::new(CacheCounters::default()),
            clock,
        }
    }

    /// Payload for `signature`, or `None` when absent or expired.
    pub fn get(&self, signature: &RequestSignature) -> Option<Value> {
        let now = self.clock.now();
        // Clone the entry out so the shard guard is dropped immediately.
        let entry = self.entries.get(signature).map(|e| Arc::clone(e.value()));

        match entry {
            Some(entry) if entry.is_fresh(now) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!("🎯 Cache HIT for {}", signature);
                Some(entry.payload.clone())
            }
            Some(_) => {
                self.counters.expired_on_read.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!("⏰ Cache entry expired for {}", signature);
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache MISS for {}", signature);
                None
            }
        }
    }

    /// Store `payload`, first dropping whatever has already expired so the map
    /// does not grow without bound across many distinct signatures.
    pub fn put(&self, signature: RequestSignature, payload: Value, ttl: Duration) {
        self.purge_expired();
        let entry = CacheEntry {
            payload,
            inserted_at: self.clock.now(),
            ttl,
        };
        self.entries.insert(signature, Arc::new(entry));
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        debug!("Cache SET for {} with TTL {:?}", signature, ttl);
    }

    /// Typed read. A payload that no longer deserializes counts as a miss.
    pub fn get_json<T: DeserializeOwned>(&self, signature: &RequestSignature) -> Option<T> {
        let value = self.get(signature)?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Failed to deserialize cached payload for {}: {}", signature, e);
                None
            }
        }
    }

    pub fn put_json<T: Serialize>(
        &self,
        signature: RequestSignature,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let payload = serde_json::to_value(value)?;
        self.put(signature, payload, ttl);
        Ok(())
    }

    /// Drop every expired entry. Runs on every write, never on the read path.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("🧹 Purged {} expired cache entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired_on_read: self.counters.expired_on_read.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
