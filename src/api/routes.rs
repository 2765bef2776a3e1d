//! API Routes
//!
//! HTTP endpoints for health checks, key distribution and metrics

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::Metrics;
use crate::config::TimeDnsConfig;
use crate::crypto::{KeyManager, SIGNATURE_ALGORITHM};

/// Shared API state
pub struct ApiState {
    pub keys: Arc<KeyManager>,
    pub metrics: Arc<Metrics>,
}

/// Run the HTTP API server
pub async fn run_api_server(
    config: Arc<TimeDnsConfig>,
    keys: Arc<KeyManager>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let app = router(Arc::new(ApiState { keys, metrics }));

    let addr = config.api_addr();
    info!("📊 HTTP API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health_check))
        .route("/status", get(get_status))

        // Verification key
        .route("/public-key", get(get_public_key))

        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))

        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check
async fn health_check() -> impl IntoResponse {
    "OK"
}

/// GET /status - Detailed status
async fn get_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let key = state.keys.current_key();

    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.metrics.uptime_secs(),
        "key": {
            "source": state.keys.source(),
            "fingerprint": key.fingerprint(),
        },
    }))
}

/// GET /public-key - Key that verifies the TXT signatures
async fn get_public_key(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let key = state.keys.current_key();

    Json(serde_json::json!({
        "algorithm": SIGNATURE_ALGORITHM,
        "public_key": key.public_key_base64(),
        "fingerprint": key.fingerprint(),
    }))
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}
