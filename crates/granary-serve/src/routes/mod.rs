//! API route definitions.

mod events;
mod health;
mod publish;
mod stats;

use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

/// Build the complete API router.
///
/// # Route Structure
///
/// - `POST /publish` - Accept a batch of events for processing
/// - `GET /events` - Query stored events (newest publisher timestamp first)
/// - `GET /stats` - Durable counters and topics
/// - `GET /health` - Liveness probe (never touches the store)
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/publish", post(publish::publish_events))
        .route("/events", get(events::list_events))
        .route("/stats", get(stats::stats))
        .route("/health", get(health::health_check))
        .with_state(state)
}
