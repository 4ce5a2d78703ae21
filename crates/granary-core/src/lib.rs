//! Core types, validation, and shared utilities for the Granary aggregator.
//!
//! This crate provides:
//! - The ingress event model and batch validation
//! - The stored-event record returned by queries
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod metrics;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Maximum number of events accepted in a single publish request.
pub const DEFAULT_BATCH_MAX: usize = 1000;

/// Default capacity of the ingestion queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

pub use error::{Error, Result};
pub use event::{Event, StoredEvent, parse_batch, utc_now_rfc3339};
