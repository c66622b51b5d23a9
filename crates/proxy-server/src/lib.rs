//! Caching, rate-limiting reverse proxy for a single upstream.
//!
//! Request flow: [`dispatch`](dispatch::dispatch) applies CORS, admits the
//! client through the fixed-window limiter, answers preflight and health
//! checks itself, and otherwise hands the request to the forwarder in
//! [`proxy`]. GETs are served from or populate the TTL cache and are
//! optionally gzip-encoded; every other method is streamed both ways.

pub mod cache_layer;
pub mod compress;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod rewrite;

pub use config::Config;
pub use dispatch::router;
pub use error::ProxyError;
pub use proxy::AppState;
