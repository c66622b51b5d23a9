use bytes::Bytes;
use http::HeaderMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Buffered upstream response stored in the cache.
///
/// Read-only once stored; a re-population replaces the whole entry.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub expires_at: Instant,
}

impl CachedResponse {
    /// An entry is live up to and including its expiry instant.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Snapshot of cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub inserts: u64,
    pub entries: usize,
}

/// Source of "now" for expiry and window arithmetic.
///
/// Both stores take an `Arc<dyn Clock>` so tests can move time forward
/// without sleeping.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Monotonic wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let now = Instant::now();
        let entry = CachedResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"x"),
            expires_at: now,
        };

        assert!(!entry.is_expired_at(now));
        assert!(entry.is_expired_at(now + Duration::from_millis(1)));
    }

    #[test]
    fn manual_clock_advances_only_on_demand() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), t0 + Duration::from_secs(5));
    }
}
