//! Ingress event model and batch validation.
//!
//! Publishers submit batches of events over HTTP; this module is the single
//! place where raw request bytes become validated [`Event`] values. Validation
//! is a pure function — nothing downstream (queue, dedup store) ever sees an
//! event that failed it.
//!
//! An event is identified by the composite key `(topic, event_id)`. All other
//! fields are carried verbatim; in particular `timestamp` is the publisher's
//! original string and is never reformatted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// An event as submitted by a publisher.
///
/// Field constraints (checked by [`Event::validate`]):
/// - `topic`, `event_id`, `source`: non-empty after trimming
/// - `timestamp`: ISO-8601 shape (offset or naive), kept as the original string
/// - `payload`: a JSON object — arbitrary nesting, never interpreted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dot-delimited hierarchical topic name (e.g., "logs.application.error").
    pub topic: String,

    /// Opaque identifier chosen by the publisher. Together with `topic` it
    /// uniquely identifies the event across all sources.
    pub event_id: String,

    /// Publisher-originated ISO-8601 UTC timestamp, preserved verbatim.
    pub timestamp: String,

    /// Identifier of the publishing system.
    pub source: String,

    /// Arbitrary JSON object; opaque to the aggregator.
    pub payload: Value,
}

/// Publish request envelope: `{ "events": [...] }`.
#[derive(Debug, Deserialize)]
struct Batch {
    events: Vec<Event>,
}

impl Event {
    /// Validate field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidField`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::InvalidField {
                field: "topic",
                reason: "must not be empty".to_string(),
            });
        }
        if self.event_id.trim().is_empty() {
            return Err(Error::InvalidField {
                field: "event_id",
                reason: "must not be empty".to_string(),
            });
        }
        if self.source.trim().is_empty() {
            return Err(Error::InvalidField {
                field: "source",
                reason: "must not be empty".to_string(),
            });
        }
        if !is_iso8601_shaped(&self.timestamp) {
            return Err(Error::InvalidField {
                field: "timestamp",
                reason: format!("not an ISO-8601 timestamp: {:?}", self.timestamp),
            });
        }
        if !self.payload.is_object() {
            return Err(Error::InvalidField {
                field: "payload",
                reason: "must be a JSON object".to_string(),
            });
        }
        Ok(())
    }

    /// The composite dedup key, for logging.
    pub fn key(&self) -> String {
        format!("{}:{}", self.topic, self.event_id)
    }
}

/// Parse and validate a publish request body.
///
/// This is the only path from raw bytes to accepted events. The batch must
/// contain between 1 and `max_batch` events inclusive; any invalid event fails
/// the entire batch.
///
/// # Errors
///
/// - [`Error::Json`] if the body is not the expected JSON shape
/// - [`Error::InvalidBatch`] for size violations or a failing event (with its
///   index in the message)
pub fn parse_batch(body: &[u8], max_batch: usize) -> Result<Vec<Event>> {
    let batch: Batch = serde_json::from_slice(body)?;

    if batch.events.is_empty() {
        return Err(Error::InvalidBatch(
            "batch must contain at least one event".to_string(),
        ));
    }
    if batch.events.len() > max_batch {
        return Err(Error::InvalidBatch(format!(
            "batch contains {} events, maximum is {}",
            batch.events.len(),
            max_batch
        )));
    }

    for (i, event) in batch.events.iter().enumerate() {
        event
            .validate()
            .map_err(|e| Error::InvalidBatch(format!("event {i}: {e}")))?;
    }

    Ok(batch.events)
}

/// Basic ISO-8601 shape check.
///
/// Accepts RFC 3339 strings ("2025-10-23T10:00:00Z", "...+00:00") and naive
/// timestamps without an offset. The string itself is what gets stored; this
/// only gates obviously malformed input.
fn is_iso8601_shaped(ts: &str) -> bool {
    if ts.trim().is_empty() {
        return false;
    }
    chrono::DateTime::parse_from_rfc3339(ts).is_ok() || ts.parse::<chrono::NaiveDateTime>().is_ok()
}

/// Current aggregator clock as an RFC 3339 UTC string.
pub fn utc_now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// An event as persisted after its first sighting.
///
/// Echoes the ingress shape plus `processed_at`, the aggregator's local UTC
/// clock at the moment the event was first stored. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub topic: String,
    pub event_id: String,
    pub timestamp: String,
    pub source: String,
    pub payload: Value,
    pub processed_at: String,
}

impl StoredEvent {
    /// Promote an accepted event to its stored form.
    pub fn from_event(event: Event, processed_at: String) -> Self {
        Self {
            topic: event.topic,
            event_id: event.event_id,
            timestamp: event.timestamp,
            source: event.source,
            payload: event.payload,
            processed_at,
        }
    }
}
