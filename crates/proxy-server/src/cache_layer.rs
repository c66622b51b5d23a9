use axum::http::{header, HeaderMap, StatusCode, Uri};
use bytes::Bytes;
use relay_store::{CacheStats, CachedResponse, Clock, TtlCache};
use std::sync::Arc;
use std::time::Duration;

/// How a response relates to the cache, reported in `X-Cache` and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a live entry without contacting upstream.
    Hit,
    /// GET that went upstream.
    Miss,
    /// Method never consults the cache.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// Cache key for a resolved upstream URI.
///
/// Keyed on the upstream URL, not the inbound path, so `/api/x` and `/x`
/// share an entry.
pub fn cache_key(target: &Uri) -> String {
    target.to_string()
}

/// Whether upstream applied a content coding other than `identity`.
pub fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CONTENT_ENCODING)
        .iter()
        .any(|v| {
            v.to_str()
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .any(|c| !c.is_empty() && !c.eq_ignore_ascii_case("identity"))
                })
                .unwrap_or(true)
        })
}

/// Caching policy for the proxy on top of the TTL store: which responses are
/// admitted and how large they may be.
pub struct CacheLayer {
    store: TtlCache,
    pub max_body_size: usize,
}

impl CacheLayer {
    pub fn new(ttl: Duration, max_body_size: usize, clock: Arc<dyn Clock>) -> Self {
        tracing::info!(
            ttl_ms = ttl.as_millis() as u64,
            max_body_size,
            "cache layer initialized"
        );

        Self {
            store: TtlCache::new(ttl, clock),
            max_body_size,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        self.store.get(key)
    }

    /// Whether a body of `len` bytes is small enough to cache.
    pub fn fits(&self, len: usize) -> bool {
        len < self.max_body_size
    }

    /// Only complete 200 responses under the size cap are cached, and only
    /// when upstream sent them unencoded. An encoded body was negotiated for
    /// one client's `accept-encoding` and the key does not carry that.
    pub fn admits(&self, status: StatusCode, headers: &HeaderMap, len: usize) -> bool {
        status == StatusCode::OK && !is_encoded(headers) && self.fits(len)
    }

    pub fn insert(&self, key: String, status: StatusCode, headers: HeaderMap, body: Bytes) {
        self.store.put(key, status.as_u16(), headers, body);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.store.ttl()
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }
}
