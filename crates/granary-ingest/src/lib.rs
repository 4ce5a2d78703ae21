//! Granary ingestion pipeline components.
//!
//! This crate provides the core pipeline between the publish endpoint and the
//! durable dedup store.
//!
//! # Modules
//!
//! - [`store`] - SQLite-backed dedup store (markers, payloads, counters)
//! - [`queue`] - Bounded multi-producer / single-consumer ingestion queue
//! - [`consumer`] - The single consumer task draining the queue
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Publish handlers│  (validated events, one enqueue per event)
//! └────────┬────────┘
//!          │  bounded FIFO, capacity 10 000
//!          ▼
//! ┌─────────────────┐
//! │    Consumer     │  single task, strictly enqueue order
//! └────────┬────────┘
//!          │  check_and_mark → store / drop
//!          ▼
//! ┌─────────────────┐
//! │   DedupStore    │  SQLite - markers, payloads, counters
//! └─────────────────┘
//! ```
//!
//! The store is the source of truth: the queue is in-memory and lost on
//! restart, which is fine because publishers deliver at-least-once.

pub mod consumer;
pub mod error;
pub mod queue;
mod schema;
pub mod store;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use consumer::Consumer;
pub use queue::{Inbox, Publisher, QueueError, queue};
pub use store::{DedupStore, DurabilityMode, MarkOutcome, StoreStats};
