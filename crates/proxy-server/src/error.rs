use axum::http::header::RETRY_AFTER;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;

/// Every way a single proxied request can fail. None of these are fatal to
/// the server; each becomes the response for the request that hit it.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("request target {0:?} cannot be resolved against the upstream")]
    InvalidTarget(String),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("upstream response body failed: {0}")]
    UpstreamBody(#[from] hyper::Error),

    #[error("upstream timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::RateLimited { .. } => "rate_limited",
            ProxyError::InvalidTarget(_) => "invalid_target",
            ProxyError::InvalidRequest(_) => "invalid_request",
            ProxyError::Upstream(_) => "connect",
            ProxyError::UpstreamBody(_) => "body",
            ProxyError::Timeout(_) => "timeout",
        }
    }

    /// Message plus the full source chain. The legacy client's own message
    /// is only "client error (Connect)", so the interesting part is below it.
    pub fn details(&self) -> String {
        let mut details = self.to_string();
        // The direct source is already part of our own message.
        let mut source = self.source().and_then(|e| e.source());
        while let Some(err) = source {
            details.push_str(": ");
            details.push_str(&err.to_string());
            source = err.source();
        }
        details
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, retry_after_secs.to_string())],
                Json(json!({ "error": "rate_limit_exceeded" })),
            )
                .into_response(),
            other => (
                other.status(),
                Json(json!({ "error": "bad_gateway", "details": other.details() })),
            )
                .into_response(),
        }
    }
}
