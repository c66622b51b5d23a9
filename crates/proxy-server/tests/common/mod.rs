//! Shared harness for the proxy integration tests: a counting upstream and a
//! proxy bound to an ephemeral port.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_proxy::{router, AppState, Config};
use relay_store::Clock;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Body size used for the oversized-response route.
pub const LARGE_BODY: usize = 1_000_000;

/// Identity body of the route that negotiates its own encoding.
pub const NEGOTIATED_BODY: &[u8] = b"plain text body";

pub struct Upstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl Upstream {
    /// Number of requests the upstream has received.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn ping(State(hits): State<Arc<AtomicUsize>>) -> Json<serde_json::Value> {
    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "pong": true, "served": n }))
}

async fn item(State(hits): State<Arc<AtomicUsize>>, Path(id): Path<u64>) -> String {
    hits.fetch_add(1, Ordering::SeqCst);
    format!("item {id} ").repeat(64)
}

async fn large(State(hits): State<Arc<AtomicUsize>>) -> Vec<u8> {
    hits.fetch_add(1, Ordering::SeqCst);
    vec![b'x'; LARGE_BODY]
}

async fn status(State(hits): State<Arc<AtomicUsize>>, Path(code): Path<u16>) -> StatusCode {
    hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn echo(State(hits): State<Arc<AtomicUsize>>, body: Bytes) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, body)
}

async fn headers(
    State(hits): State<Arc<AtomicUsize>>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    Json(json!({
        "host": get("host"),
        "x-forwarded-host": get("x-forwarded-host"),
        "x-forwarded-proto": get("x-forwarded-proto"),
        "x-forwarded-for": get("x-forwarded-for"),
        "x-custom": get("x-custom"),
    }))
}

async fn slow(State(hits): State<Arc<AtomicUsize>>) -> &'static str {
    hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    "finally"
}

async fn pre_encoded(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    let body = relay_proxy::compress::gzip(b"already gzipped by upstream").unwrap();
    ([(header::CONTENT_ENCODING, "gzip")], body)
}

/// Gzips only for clients that ask for it, like an upstream with its own
/// compression enabled.
async fn negotiated(
    State(hits): State<Arc<AtomicUsize>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    let wants_gzip = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));
    if wants_gzip {
        let body = relay_proxy::compress::gzip(NEGOTIATED_BODY).unwrap();
        (
            [
                (header::CONTENT_ENCODING, "gzip"),
                (header::VARY, "accept-encoding"),
            ],
            body,
        )
            .into_response()
    } else {
        ([(header::VARY, "accept-encoding")], NEGOTIATED_BODY).into_response()
    }
}

/// Start an upstream on an ephemeral port.
pub async fn spawn_upstream() -> Upstream {
    let hits = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .route("/ping", get(ping))
        .route("/items/{id}", get(item))
        .route("/large", get(large))
        .route("/status/{code}", get(status))
        .route("/echo", post(echo))
        .route("/headers", get(headers))
        .route("/slow", get(slow))
        .route("/pre-encoded", get(pre_encoded))
        .route("/negotiated", get(negotiated))
        .with_state(Arc::clone(&hits));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Upstream { addr, hits }
}

/// An upstream that promises a 100 byte body, sends a few bytes of it and
/// closes the connection.
pub async fn spawn_truncating_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut request: Vec<u8> = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\npartial")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Config pointing at `upstream` with a generous rate limit.
pub fn config_for(upstream: SocketAddr) -> Config {
    let mut config = Config::default_config();
    config.upstream.url = format!("http://{upstream}");
    config.rate_limit.max_requests = 1000;
    config
}

pub fn state_with_clock(config: &Config, clock: Arc<dyn Clock>) -> Arc<AppState> {
    Arc::new(AppState::with_clock(config, clock).unwrap())
}

/// Serve the proxy for `state` on an ephemeral port.
pub async fn spawn_proxy(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// An address nothing is listening on.
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
