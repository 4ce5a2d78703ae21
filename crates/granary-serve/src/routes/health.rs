//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

/// Response for `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    queue_size: usize,
    processed_count: u64,
}

/// `GET /health`
///
/// Liveness, not readiness: reads only in-memory state (queue depth and the
/// processed-count atomic) and must never block on the dedup store.
/// Use this for load balancer health probes.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        queue_size: state.publisher.depth(),
        processed_count: state.processed.load(std::sync::atomic::Ordering::Relaxed),
    })
}
