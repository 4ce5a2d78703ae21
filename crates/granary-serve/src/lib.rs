//! Granary Serve - HTTP API for the pub-sub log aggregator
//!
//! This crate provides the REST surface over the ingestion pipeline: publish,
//! query, stats, and health endpoints plus the server lifecycle wiring.
//!
//! # Architecture
//!
//! - **AppState**: Shared application state (dedup store, queue publisher,
//!   configuration)
//! - **Routes**: Endpoint handlers grouped by concern
//! - **ApiError**: Error-to-status mapping with a JSON `{error, message}` body

mod error;
mod routes;
mod state;

pub use self::error::ApiError;
pub use self::routes::router;
pub use self::state::{AppState, Config};
