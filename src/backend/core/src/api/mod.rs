//! HTTP layer.
//!
//! - `/aggregate-stats` (any method): on-demand aggregation, returns the snapshot
//! - `GET /health`: liveness
//! - `GET /metrics`: Prometheus exposition
//!
//! CORS is open to any origin.

mod handlers;

use axum::{
    routing::{any, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::stats::Aggregator;

pub use handlers::StatsResponse;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
}

impl AppState {
    pub fn new(aggregator: Aggregator) -> Self {
        Self { aggregator }
    }
}

/// Build the API router.
///
/// ```rust,ignore
/// let app = build_router(AppState::new(aggregator));
/// axum::serve(listener, app).await?;
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/aggregate-stats", any(handlers::aggregate_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
