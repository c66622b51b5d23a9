//! Shared state for the relay proxy: a sharded concurrent map, the TTL
//! response cache built on it, and the fixed-window rate limiter.
//!
//! Both stores take an injectable [`Clock`](traits::Clock) so expiry and
//! window arithmetic can be driven deterministically.

pub mod rate;
pub mod sharded;
pub mod traits;
pub mod ttl;

pub use rate::{FixedWindowLimiter, RateRecord};
pub use sharded::ShardedMap;
pub use traits::{CacheStats, CachedResponse, Clock, ManualClock, SystemClock};
pub use ttl::TtlCache;
