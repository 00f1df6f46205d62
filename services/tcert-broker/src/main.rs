//! TCert Broker
//!
//! Single-binary service that keeps a warm pool of transaction certificates
//! for local transaction signers:
//! 1. Restores unused tcerts from the store file
//! 2. Refills from the TCA gateway in the background
//! 3. Issues one tcert per `POST /v1/tcerts/next`
//! 4. Persists everything still pooled on SIGINT/SIGTERM

mod authority;
mod config;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tcert::{FileTCertStore, TCert};
use tcert_pool::{Pool, PoolState};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::authority::HttpAuthority;
use crate::config::Config;

/// How long in-flight requests get to finish after a shutdown signal.
/// Requests still waiting on an empty pool are abandoned; the wait is cancel-safe.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    pool: Arc<Pool>,
    prometheus: PrometheusHandle,
}

#[derive(Debug, Deserialize)]
struct AddTCertRequest {
    /// Base64 DER
    tcert: String,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/tcerts/next", post(next_tcert_handler))
        .route("/v1/tcerts", post(add_tcert_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting tcert-broker");

    let prometheus = metrics::install_recorder()?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        authority_url = %config.authority.url,
        store_path = %config.store.path.display(),
        batch_size = config.pool.batch_size,
        authenticated = config.authority.token.is_some(),
        "configuration loaded"
    );

    let store = FileTCertStore::open(config.store.path.clone())
        .await
        .with_context(|| format!("failed to open tcert store {}", config.store.path.display()))?;
    let authority = HttpAuthority::new(reqwest::Client::new(), &config.authority);

    let pool = Arc::new(
        Pool::new(config.pool.clone(), Arc::new(store), Arc::new(authority))
            .context("failed to create tcert pool")?,
    );
    pool.start().await.context("failed to start tcert pool")?;

    let app = build_router(
        AppState {
            pool: pool.clone(),
            prometheus,
        },
        config.server.max_connections,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    drain_server(server_handle, DRAIN_TIMEOUT).await;
    pool.stop().await;

    info!("shutdown complete");
    Ok(())
}

/// Wait for in-flight requests, then abort whatever is left.
///
/// Handlers still running after the timeout are cancelled before the pool is
/// stopped, so none of them can touch the pool after its final drain.
async fn drain_server(mut server: JoinHandle<std::io::Result<()>>, drain_timeout: Duration) {
    match tokio::time::timeout(drain_timeout, &mut server).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => {
            warn!(
                drain_timeout_secs = drain_timeout.as_secs(),
                "drain timeout exceeded, aborting in-flight requests"
            );
            server.abort();
            let _ = server.await;
        }
    }
}

/// Pool health. 200 while the pool is running, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = match state.pool.state() {
        PoolState::Running => StatusCode::OK,
        PoolState::Stopped | PoolState::Draining => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(state.pool.health()))
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Issue the next tcert. The tcert is already recorded as used when this responds.
async fn next_tcert_handler(State(state): State<AppState>) -> Response {
    match state.pool.get_next_tcert().await {
        Ok(tcert) => {
            metrics::record_request("next", 200);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "tcert": STANDARD.encode(tcert.der()),
                    "fingerprint": tcert.fingerprint_hex(),
                })),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "no tcert available for caller");
            metrics::record_request("next", 503);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "error": {
                        "type": "empty_pool",
                        "message": e.to_string(),
                    }
                })),
            )
                .into_response()
        }
    }
}

/// Inject an out-of-band tcert. Waits while the pool is full.
async fn add_tcert_handler(
    State(state): State<AppState>,
    Json(request): Json<AddTCertRequest>,
) -> Response {
    let parsed = STANDARD
        .decode(&request.tcert)
        .map_err(|e| format!("tcert is not valid base64: {e}"))
        .and_then(|der| TCert::from_der(&der).map_err(|e| e.to_string()));

    match parsed {
        Ok(tcert) => {
            state.pool.add_tcert(tcert).await;
            metrics::record_request("add", 204);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(message) => {
            metrics::record_request("add", 400);
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": {
                        "type": "invalid_tcert",
                        "message": message,
                    }
                })),
            )
                .into_response()
        }
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
