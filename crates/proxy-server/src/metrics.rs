use crate::cache_layer::CacheStatus;
use crate::proxy::AppState;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// State for the admin router. The Prometheus handle is absent when no
/// recorder could be installed (e.g. one already exists in this process).
#[derive(Clone)]
pub struct MetricsState {
    pub app: Arc<AppState>,
    pub prometheus: Option<PrometheusHandle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub cache: CacheMetrics,
    pub rate_limit: RateLimitMetrics,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub inserts: u64,
    pub hit_rate: f64,
    pub ttl_ms: u64,
    pub max_body_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitMetrics {
    pub tracked_clients: usize,
    pub window_ms: u64,
    pub max_requests: u64,
}

impl StatsSnapshot {
    pub fn capture(app: &AppState) -> Self {
        let stats = app.cache.stats();
        let total = stats.hits + stats.misses;

        StatsSnapshot {
            cache: CacheMetrics {
                entries: stats.entries,
                hits: stats.hits,
                misses: stats.misses,
                expirations: stats.expirations,
                inserts: stats.inserts,
                hit_rate: if total > 0 {
                    stats.hits as f64 / total as f64
                } else {
                    0.0
                },
                ttl_ms: app.cache.ttl().as_millis() as u64,
                max_body_size_bytes: app.cache.max_body_size,
            },
            rate_limit: RateLimitMetrics {
                tracked_clients: app.limiter.tracked_clients(),
                window_ms: app.limiter.window().as_millis() as u64,
                max_requests: app.limiter.max_requests(),
            },
            uptime_seconds: app.started_at.elapsed().as_secs(),
        }
    }
}

/// Admin router, served on its own port.
pub fn admin_router(state: MetricsState) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(state)
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_handler(State(state): State<MetricsState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET /api/stats: one-shot stats endpoint.
pub async fn stats_handler(State(state): State<MetricsState>) -> Json<StatsSnapshot> {
    Json(StatsSnapshot::capture(&state.app))
}

pub fn record_request(
    method: &Method,
    status: StatusCode,
    cache: Option<CacheStatus>,
    elapsed: Duration,
) {
    ::metrics::counter!(
        "relay_requests_total",
        "method" => method.to_string(),
        "status" => status.as_u16().to_string(),
        "cache" => cache.map(CacheStatus::as_str).unwrap_or("none")
    )
    .increment(1);
    ::metrics::histogram!("relay_request_duration_seconds", "method" => method.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_rate_limited() {
    ::metrics::counter!("relay_rate_limited_total").increment(1);
}

pub fn record_upstream_error(kind: &'static str) {
    ::metrics::counter!("relay_upstream_errors_total", "kind" => kind).increment(1);
}
