use crate::error::ProxyError;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderValue, Uri};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid upstream url {url:?}: {reason}")]
    InvalidUpstream { url: String, reason: String },
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("invalid header value for {name}: {value:?}")]
    InvalidHeader { name: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    /// Zero disables the timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_max_body_size")]
    pub max_body_size_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allow_origin")]
    pub allow_origin: String,
    #[serde(default = "default_allow_methods")]
    pub allow_methods: String,
    #[serde(default = "default_allow_headers")]
    pub allow_headers: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_compression_enabled")]
    pub enabled: bool,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Config {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                url: "http://127.0.0.1:3000".to_string(),
                timeout_ms: default_timeout_ms(),
            },
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            compression: CompressionConfig::default(),
        }
    }

    /// Overlay settings from environment variables. `lookup` is
    /// `std::env::var(..).ok()` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            let port: u16 = parse_env("PORT", &port)?;
            self.server.listen_addr = format!("0.0.0.0:{port}");
        }
        if let Some(addr) = lookup("METRICS_ADDR") {
            self.server.metrics_addr = addr;
        }
        if let Some(url) = lookup("TARGET_URL") {
            self.upstream.url = url;
        }
        if let Some(v) = lookup("UPSTREAM_TIMEOUT_MS") {
            self.upstream.timeout_ms = parse_env("UPSTREAM_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("CACHE_TTL_MS") {
            self.cache.ttl_ms = parse_env("CACHE_TTL_MS", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window_ms = parse_env("RATE_LIMIT_WINDOW_MS", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT_MAX") {
            self.rate_limit.max_requests = parse_env("RATE_LIMIT_MAX", &v)?;
        }
        if let Some(origin) = lookup("CORS_ORIGIN") {
            self.cors.allow_origin = origin;
        }
        if let Some(v) = lookup("ENABLE_GZIP") {
            self.compression.enabled = v.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        match self.upstream.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

/// Origin of the single upstream every request is resolved against.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    scheme: Scheme,
    authority: Authority,
    host_header: HeaderValue,
}

impl UpstreamTarget {
    /// Parse the configured base URL. Only `http` upstreams are supported and
    /// any path on the base is dropped: request paths are absolute.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUpstream {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let uri: Uri = url
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| invalid(&e.to_string()))?;
        let scheme = uri.scheme().cloned().ok_or_else(|| invalid("missing scheme"))?;
        if scheme != Scheme::HTTP {
            return Err(invalid("only http:// upstreams are supported"));
        }
        let authority = uri.authority().cloned().ok_or_else(|| invalid("missing host"))?;
        let host_header = HeaderValue::from_str(authority.as_str())
            .map_err(|_| invalid("host is not a valid header value"))?;

        if !matches!(uri.path(), "" | "/") {
            tracing::warn!(
                upstream = %url,
                path = uri.path(),
                "upstream base path is ignored; request paths resolve against the origin"
            );
        }

        Ok(Self {
            scheme,
            authority,
            host_header,
        })
    }

    /// Absolute upstream URI for an already rewritten path and query. Only
    /// origin-form targets resolve; `*` and absolute-form do not.
    pub fn resolve(&self, path_and_query: &str) -> Result<Uri, ProxyError> {
        if !path_and_query.starts_with('/') {
            return Err(ProxyError::InvalidTarget(path_and_query.to_string()));
        }
        let pq: PathAndQuery = path_and_query.parse().map_err(axum::http::Error::from)?;
        let uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(pq)
            .build()?;
        Ok(uri)
    }

    /// Value for the outbound `host` header.
    pub fn host_header(&self) -> &HeaderValue {
        &self.host_header
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            max_body_size_bytes: default_max_body_size(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: default_allow_origin(),
            allow_methods: default_allow_methods(),
            allow_headers: default_allow_headers(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: default_compression_enabled(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_ttl_ms() -> u64 {
    5_000
}
fn default_max_body_size() -> usize {
    1_000_000
}
fn default_window_ms() -> u64 {
    60_000
}
fn default_max_requests() -> u64 {
    60
}
fn default_allow_origin() -> String {
    "*".to_string()
}
fn default_allow_methods() -> String {
    "GET,POST,PUT,PATCH,DELETE,OPTIONS".to_string()
}
fn default_allow_headers() -> String {
    "Content-Type, Authorization".to_string()
}
fn default_compression_enabled() -> bool {
    true
}
