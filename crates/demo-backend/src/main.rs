//! Upstream for running the proxy by hand: `cargo run -p demo-backend`,
//! then point `TARGET_URL` at it.

use axum::body::Bytes;
use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

async fn ping() -> Json<Value> {
    Json(json!({ "pong": true }))
}

async fn get_item(Path(id): Path<u64>) -> Json<Value> {
    // Simulate upstream latency (5-20ms) so cache hits are visible in logs
    let delay = rand::thread_rng().gen_range(5..=20);
    tokio::time::sleep(Duration::from_millis(delay)).await;

    Json(json!({
        "id": id,
        "name": format!("Item {}", id),
        "data": "x".repeat(256),
        "latency_ms": delay,
    }))
}

/// Just over the proxy's default cache cap; relayed but never cached.
async fn large() -> String {
    "x".repeat(1_200_000)
}

async fn echo(body: Bytes) -> Bytes {
    body
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app = Router::new()
        .route("/ping", get(ping))
        .route("/items/{id}", get(get_item))
        .route("/large", get(large))
        .route("/echo", post(echo));

    let addr = std::env::var("DEMO_BACKEND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    tracing::info!(addr = %addr, "demo backend starting");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind demo backend to {addr}: {e}"));
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "demo backend error");
    }
}
