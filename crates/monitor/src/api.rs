//! Probe and metrics endpoints
//!
//! `/healthz` reports component health and the number of pods currently
//! held by the suppression cache. `/readyz` reports the initial pod sync.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use monitor_lib::{
    health::{ComponentStatus, HealthRegistry, HealthResponse},
    observability::MonitorMetrics,
    suppression::SuppressionCache,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// State shared by the API handlers
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub suppression: Arc<SuppressionCache>,
    pub metrics: MonitorMetrics,
}

#[derive(Serialize)]
struct HealthBody {
    #[serde(flatten)]
    health: HealthResponse,
    suppressed_pods: usize,
}

fn probe_status(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let status = probe_status(health.status != ComponentStatus::Unhealthy);

    let body = HealthBody {
        health,
        suppressed_pods: state.suppression.len(),
    };
    (status, Json(body))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    (probe_status(readiness.ready), Json(readiness))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    // Gauge may lag between sweeps; refresh before scraping.
    state
        .metrics
        .set_suppression_cache_entries(state.suppression.len() as i64);

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
        buffer,
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port = port, "Serving probes and metrics");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
