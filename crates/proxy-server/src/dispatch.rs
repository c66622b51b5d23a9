use crate::cache_layer::CacheStatus;
use crate::config::{ConfigError, CorsConfig};
use crate::error::ProxyError;
use crate::metrics;
use crate::proxy::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

pub const HEALTH_PATH: &str = "/health";

/// CORS response headers, validated once at startup.
#[derive(Debug, Clone)]
pub struct CorsHeaders {
    allow_origin: HeaderValue,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
}

impl CorsHeaders {
    pub fn from_config(config: &CorsConfig) -> Result<Self, ConfigError> {
        let value = |name: &'static str, raw: &str| {
            HeaderValue::from_str(raw).map_err(|_| ConfigError::InvalidHeader {
                name,
                value: raw.to_string(),
            })
        };

        Ok(Self {
            allow_origin: value("cors.allow_origin", &config.allow_origin)?,
            allow_methods: value("cors.allow_methods", &config.allow_methods)?,
            allow_headers: value("cors.allow_headers", &config.allow_headers)?,
        })
    }

    /// Set the CORS headers, replacing any the upstream sent.
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
    }
}

/// Proxy router: every method and path goes through [`dispatch`]. Targets
/// that are not a path at all (`*`) land there through the fallback.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{*path}", any(dispatch))
        .route("/", any(dispatch))
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Entry point for every inbound request.
///
/// Order: rate limit, preflight, health check, then rewrite and forward.
/// CORS headers end up on every response, errors included.
pub async fn dispatch(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response<Body> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let client = client_identifier(&req);

    let (mut response, upstream, cache) = if !state.limiter.admit(&client) {
        tracing::warn!(client = %client, method = %method, path = %path, "rate limit exceeded");
        metrics::record_rate_limited();
        let rejection = ProxyError::RateLimited {
            retry_after_secs: state.limiter.retry_after_secs(),
        };
        (rejection.into_response(), None, None)
    } else if method == Method::OPTIONS {
        (StatusCode::NO_CONTENT.into_response(), None, None)
    } else if req.uri().path() == HEALTH_PATH {
        (health(), None, None)
    } else {
        let forwarded = state.forward(req, &client).await;
        let response = match forwarded.result {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    error = %e.details(),
                    kind = e.kind(),
                    method = %method,
                    path = %path,
                    upstream = ?forwarded.upstream,
                    "upstream request failed"
                );
                metrics::record_upstream_error(e.kind());
                e.into_response()
            }
        };
        (response, forwarded.upstream, Some(forwarded.cache))
    };

    state.cors.apply(response.headers_mut());

    let elapsed = start.elapsed();
    let upstream = upstream.map(|u| u.to_string());
    tracing::info!(
        status = response.status().as_u16(),
        method = %method,
        path = %path,
        upstream = upstream.as_deref().unwrap_or("-"),
        elapsed_ms = elapsed.as_millis() as u64,
        cache = cache.map(CacheStatus::as_str).unwrap_or("-"),
        "request completed"
    );
    metrics::record_request(&method, response.status(), cache, elapsed);

    response
}

/// Client identifier for rate limiting: the peer IP, or `unknown` when the
/// server was not started with connect info.
pub fn client_identifier<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn health() -> Response<Body> {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}
