use crate::sharded::ShardedMap;
use crate::traits::Clock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-client counter for the current window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateRecord {
    pub count: u64,
    pub window_start: Instant,
}

/// Fixed-window admission control keyed by client identifier.
///
/// The counter resets once a full window has passed since the window started,
/// not on a rolling basis, so a client can burst up to twice the limit across
/// a window boundary. Rejected calls still count.
pub struct FixedWindowLimiter {
    records: ShardedMap<RateRecord>,
    window: Duration,
    max_requests: u64,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, max_requests: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: ShardedMap::new(),
            window,
            max_requests,
            clock,
        }
    }

    /// Count this call against `identifier` and report whether it is within
    /// the limit.
    pub fn admit(&self, identifier: &str) -> bool {
        let now = self.clock.now();

        self.records.upsert_with(
            identifier,
            || RateRecord {
                count: 0,
                window_start: now,
            },
            |record| {
                if now.saturating_duration_since(record.window_start) >= self.window {
                    record.count = 0;
                    record.window_start = now;
                }
                record.count = record.count.saturating_add(1);
                record.count <= self.max_requests
            },
        )
    }

    /// Current record for `identifier`, if one exists.
    pub fn record(&self, identifier: &str) -> Option<RateRecord> {
        self.records.get_cloned(identifier)
    }

    /// Value for a `Retry-After` header: the window length in whole seconds,
    /// rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_millis().div_ceil(1000) as u64
    }

    /// Number of identifiers with a record. Records are never removed.
    pub fn tracked_clients(&self) -> usize {
        self.records.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}
