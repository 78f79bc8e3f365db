//! API request handlers.
//!
//! Handlers return `Result<_, StatsError>`; failures render through the
//! `IntoResponse` implementation on `StatsError`.

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::Result;
use crate::observability::metrics;
use crate::stats::StatsSnapshot;

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.aggregator.store().name(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stats Aggregation
// ═══════════════════════════════════════════════════════════════════════════════

/// Successful on-demand aggregation body.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: StatsSnapshot,
}

/// Run one aggregation and return the published snapshot.
pub async fn aggregate_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let stats = state.aggregator.compute_and_publish_stats().await?;
    Ok(Json(StatsResponse {
        success: true,
        stats,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics::render(),
    )
}
