//! Aggregate statistics endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Response for `GET /stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Seconds since the server started.
    pub uptime_seconds: f64,
    /// Total events accepted via `/publish`, across process restarts.
    pub received: u64,
    /// Unique events stored (equals the stored-event count).
    pub unique_processed: u64,
    /// Duplicates detected and dropped.
    pub duplicate_dropped: u64,
    /// All distinct topics observed, sorted.
    pub topics: Vec<String>,
}

/// `GET /stats`
///
/// Reads the durable counters and the topics projection. Counters are global
/// to the data directory, not to this process — they are read back from disk
/// at startup and survive restarts.
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let store_stats = state.store.stats()?;

    Ok(Json(StatsResponse {
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
        received: store_stats.received,
        unique_processed: store_stats.unique_processed,
        duplicate_dropped: store_stats.duplicate_dropped,
        topics: store_stats.topics,
    }))
}
