use relay_proxy::config::Config;
use relay_proxy::metrics::{admin_router, MetricsState};
use relay_proxy::{router, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load config: file first, then environment overrides
    let config_path = std::env::var("RELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    let mut config = if config_path.exists() {
        match Config::load(&config_path) {
            Ok(c) => {
                tracing::info!(path = %config_path.display(), "loaded config");
                c
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    path = %config_path.display(),
                    "failed to load config, using defaults"
                );
                Config::default_config()
            }
        }
    } else {
        tracing::info!(path = %config_path.display(), "no config file found, using defaults");
        Config::default_config()
    };

    if let Err(e) = config.apply_env(|key| std::env::var(key).ok()) {
        tracing::error!(error = %e, "invalid environment configuration");
        std::process::exit(1);
    }

    let state = match AppState::new(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    // Install Prometheus metrics recorder
    let prometheus = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "failed to install prometheus recorder");
            None
        }
    };

    // Shutdown token for graceful shutdown
    let shutdown = CancellationToken::new();

    let metrics_router = admin_router(MetricsState {
        app: Arc::clone(&state),
        prometheus,
    });
    let proxy_router = router(Arc::clone(&state));

    let proxy_addr = config.server.listen_addr.clone();
    let metrics_addr = config.server.metrics_addr.clone();

    tracing::info!(
        proxy = %proxy_addr,
        metrics = %metrics_addr,
        upstream = %config.upstream.url,
        cache_ttl_ms = config.cache.ttl_ms,
        rate_window_ms = config.rate_limit.window_ms,
        rate_max = config.rate_limit.max_requests,
        gzip = config.compression.enabled,
        upstream_timeout_ms = config.upstream.timeout_ms,
        "relay proxy starting"
    );

    let proxy_listener = tokio::net::TcpListener::bind(&proxy_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind proxy to {proxy_addr}: {e}"));

    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind metrics to {metrics_addr}: {e}"));

    // Spawn shutdown signal handler
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(shutdown_clone).await;
    });

    // Peer addresses identify clients for rate limiting.
    let proxy_future = axum::serve(
        proxy_listener,
        proxy_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let metrics_future = axum::serve(metrics_listener, metrics_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    tokio::select! {
        result = proxy_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "proxy server error");
            }
        }
        result = metrics_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "metrics server error");
            }
        }
    }

    tracing::info!("relay proxy shut down");
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections...");
    token.cancel();
}
