//! Publish endpoint: validated events enter the ingestion queue here.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use granary_core::parse_batch;

use crate::error::ApiError;
use crate::state::AppState;

/// Response for `POST /publish`.
#[derive(Debug, Clone, Serialize)]
pub struct PublishResponse {
    /// Number of events accepted into the queue.
    pub accepted: usize,
    pub message: String,
}

/// `POST /publish`
///
/// Body: `{ "events": [Event, ...] }`, 1..=batch_max events. Validation
/// failure rejects the whole batch with 400 before any state changes.
///
/// The enqueue is two-phase: queue slots for the entire batch are reserved
/// first (this await is the only back-pressure point and times out into 503
/// with nothing recorded), then `received` is advanced and the slots are
/// committed with no intervening await. A client disconnect therefore cannot
/// leave `received` counting events that never reached the queue.
pub async fn publish_events(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    let events = parse_batch(&body, state.config.batch_max).map_err(|e| {
        metrics::counter!("publish_rejected_total").increment(1);
        tracing::debug!(error = %e, "rejected publish request");
        ApiError::from(e)
    })?;
    let accepted = events.len();

    let slots = state
        .publisher
        .reserve(accepted, state.config.enqueue_timeout)
        .await
        .map_err(|e| {
            metrics::counter!("publish_saturated_total").increment(1);
            tracing::warn!(batch = accepted, error = %e, "enqueue failed");
            ApiError::from(e)
        })?;

    state.store.increment_counter("received", accepted as u64)?;
    slots.send(events);

    metrics::counter!("publish_requests_total").increment(1);
    metrics::counter!("publish_events_received_total").increment(accepted as u64);
    tracing::info!(accepted, "accepted events for processing");

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            accepted,
            message: format!("Accepted {accepted} events for processing"),
        }),
    ))
}
