//! Query endpoint over stored events.

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use granary_core::StoredEvent;

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for `GET /events`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsQuery {
    /// Filter to a single topic.
    pub topic: Option<String>,
    /// Max events to return (default: 100, clamped to [1, 1000]).
    pub limit: Option<i64>,
}

/// Response for `GET /events`.
#[derive(Debug, Clone, Serialize)]
pub struct EventsResponse {
    pub topic: Option<String>,
    pub total: usize,
    pub events: Vec<StoredEvent>,
}

/// `GET /events?topic=<string>&limit=<int>`
///
/// Returns stored events sorted by publisher `timestamp` descending with a
/// deterministic `(topic, event_id)` tiebreak. The payload table is the sole
/// authority; nothing is served from memory.
pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);

    let events = state.store.query_events(params.topic.as_deref(), limit)?;

    Ok(Json(EventsResponse {
        topic: params.topic,
        total: events.len(),
        events,
    }))
}
