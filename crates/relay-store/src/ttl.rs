use crate::sharded::ShardedMap;
use crate::traits::{CacheStats, CachedResponse, Clock};
use bytes::Bytes;
use http::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Response cache with a single fixed time-to-live.
///
/// Expiry is lazy: an expired entry stays in the map until the next `get`
/// for its key removes it. There is no background sweep and no bound on the
/// number of keys.
pub struct TtlCache {
    entries: ShardedMap<Arc<CachedResponse>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    inserts: AtomicU64,
}

impl TtlCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: ShardedMap::new(),
            ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    /// Look up a live entry. An expired entry is evicted by this call.
    pub fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        let now = self.clock.now();

        match self.entries.get_cloned(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                // A concurrent put may have replaced the entry since the read;
                // only drop it if it is still expired.
                if self.entries.remove_if(key, |e| e.is_expired_at(now)) {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key, "cache entry expired");
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a response, replacing any existing entry for `key`.
    pub fn put(&self, key: impl Into<String>, status: u16, headers: HeaderMap, body: Bytes) {
        let entry = CachedResponse {
            status,
            headers,
            body,
            expires_at: self.clock.now() + self.ttl,
        };
        self.entries.insert(key.into(), Arc::new(entry));
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether the key is physically present, expired or not.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
