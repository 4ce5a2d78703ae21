//! Durable dedup store backed by SQLite.
//!
//! This module provides the [`DedupStore`], the correctness anchor of the
//! aggregator. It holds three tables in one database file:
//!
//! - `processed_events` - markers keyed on `(topic, event_id)`
//! - `event_payloads` - full stored events under the same key
//! - `system_stats` - durable counters
//!
//! # Key Design
//!
//! - `check_and_mark` is a single `INSERT OR IGNORE` under the composite
//!   primary key; the New/Duplicate outcome is read from rows-affected, never
//!   from a separate lookup. Concurrent callers on the same key see exactly
//!   one `New`.
//! - Markers and payloads are separate tables so the check-and-mark hot path
//!   never touches payload bytes.
//! - All access goes through one connection behind a mutex, which serializes
//!   every mutation across tasks.

use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use granary_core::{StoredEvent, utc_now_rfc3339};

use crate::error::Result;
use crate::schema;

/// Mutations between passive WAL checkpoints in [`DurabilityMode::Checkpoint`].
const CHECKPOINT_INTERVAL: u64 = 100;

/// Durability mode selected when opening the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Every successful mutation is fsynced before return
    /// (`PRAGMA synchronous=FULL`). Highest latency, zero recent-write loss
    /// under OS crash.
    Strict,
    /// Mutations land in the WAL with ordered writes
    /// (`PRAGMA synchronous=NORMAL`); the WAL is checkpointed every
    /// ~100 mutations and on close. A worst-case OS crash loses the
    /// un-checkpointed tail.
    #[default]
    Checkpoint,
}

impl DurabilityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Checkpoint => "checkpoint",
        }
    }
}

impl std::str::FromStr for DurabilityMode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "checkpoint" => Ok(Self::Checkpoint),
            _ => Err(()),
        }
    }
}

/// Outcome of [`DedupStore::check_and_mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The `(topic, event_id)` pair was not seen before; a marker now exists.
    New,
    /// The pair already had a marker.
    Duplicate,
}

/// Aggregate view over the store, used by `GET /stats`.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub topics: Vec<String>,
}

/// SQLite-backed dedup store.
///
/// Thread-safe: can be shared across tasks via `Arc<DedupStore>`. Mutations
/// are serialized by the internal connection mutex, which also makes the
/// check-and-mark / counter discipline a single-writer story.
pub struct DedupStore {
    /// SQLite connection (protected by mutex for cross-task serialization).
    conn: Mutex<Connection>,
    mode: DurabilityMode,
    path: Option<PathBuf>,
    /// Mutations since the last passive checkpoint (locked after `conn`).
    mutations: Mutex<u64>,
}

impl DedupStore {
    /// Open or create a dedup store at the given database file path.
    ///
    /// Idempotently creates the parent directory and schema, then recovers
    /// from a prior crash: markers without a stored event are deleted (the
    /// crash window between mark and store) and the `unique_processed`
    /// counter is reconciled to the stored-event count.
    pub fn open<P: AsRef<Path>>(path: P, mode: DurabilityMode) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), mode = mode.as_str(), "opening dedup store");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL keeps readers unblocked; the synchronous level is the whole
        // difference between the two durability modes.
        match mode {
            DurabilityMode::Strict => {
                conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
            }
            DurabilityMode::Checkpoint => {
                conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
            }
        }

        Self::init(conn, mode, Some(path.to_path_buf()))
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, DurabilityMode::Checkpoint, None)
    }

    fn init(conn: Connection, mode: DurabilityMode, path: Option<PathBuf>) -> Result<Self> {
        schema::init_schema(&conn)?;

        conn.execute_batch(
            "INSERT OR IGNORE INTO system_stats (key, value) VALUES
                ('received', 0),
                ('unique_processed', 0),
                ('duplicate_dropped', 0);",
        )?;

        Self::recover(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            mode,
            path,
            mutations: Mutex::new(0),
        })
    }

    /// Crash recovery: drop orphaned markers and reconcile `unique_processed`.
    ///
    /// A marker without a payload row means the process died between
    /// check-and-mark and store; deleting the marker lets the publisher's
    /// retry go through as New. Afterwards the marker set, the payload set,
    /// and the `unique_processed` counter agree again.
    fn recover(conn: &Connection) -> Result<()> {
        let orphans = conn.execute(
            "DELETE FROM processed_events
             WHERE NOT EXISTS (
                 SELECT 1 FROM event_payloads ep
                 WHERE ep.topic = processed_events.topic
                   AND ep.event_id = processed_events.event_id
             )",
            [],
        )?;
        if orphans > 0 {
            tracing::warn!(orphans, "removed orphaned markers from prior crash");
        }

        let stored: u64 =
            conn.query_row("SELECT COUNT(*) FROM event_payloads", [], |row| row.get(0))?;
        conn.execute(
            "INSERT INTO system_stats (key, value) VALUES ('unique_processed', ?1)
             ON CONFLICT(key) DO UPDATE SET value = ?1",
            params![stored],
        )?;

        Ok(())
    }

    /// Atomically check whether `(topic, event_id)` was seen and mark it.
    ///
    /// A single `INSERT OR IGNORE` under the composite primary key; the
    /// outcome is rows-affected, so concurrent callers for the same key see
    /// exactly one [`MarkOutcome::New`].
    pub fn check_and_mark(&self, topic: &str, event_id: &str) -> Result<MarkOutcome> {
        let start = Instant::now();
        let first_seen_at = utc_now_rfc3339();

        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO processed_events (topic, event_id, first_seen_at)
             VALUES (?1, ?2, ?3)",
            params![topic, event_id, first_seen_at],
        )?;
        self.note_mutation(&conn)?;
        drop(conn);

        metrics::histogram!("dedup_mark_duration_seconds").record(start.elapsed().as_secs_f64());

        if changed > 0 {
            tracing::debug!(topic, event_id, "new event marked");
            Ok(MarkOutcome::New)
        } else {
            tracing::debug!(topic, event_id, "duplicate detected");
            Ok(MarkOutcome::Duplicate)
        }
    }

    /// Persist a stored event under its `(topic, event_id)` key.
    ///
    /// Called only after [`check_and_mark`](Self::check_and_mark) returned
    /// `New`. Storing under an existing key is a silent no-op; the original
    /// row is never overwritten.
    pub fn store_event(&self, event: &StoredEvent) -> Result<()> {
        let payload_json = serde_json::to_string(&event.payload)?;

        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO event_payloads
                 (topic, event_id, timestamp, source, payload, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.topic,
                event.event_id,
                event.timestamp,
                event.source,
                payload_json,
                event.processed_at,
            ],
        )?;
        self.note_mutation(&conn)?;

        if changed == 0 {
            tracing::debug!(
                topic = %event.topic,
                event_id = %event.event_id,
                "event already stored, keeping original"
            );
        }
        Ok(())
    }

    /// Remove a marker whose stored event failed to persist.
    ///
    /// Consumer-side compensation: a transient failure after a `New` marker
    /// must leave the event unmarked so the publisher's retry is processed,
    /// not dropped as a duplicate. Open-time recovery covers the same window
    /// across a crash.
    pub(crate) fn unmark(&self, topic: &str, event_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM processed_events WHERE topic = ?1 AND event_id = ?2",
            params![topic, event_id],
        )?;
        self.note_mutation(&conn)?;
        Ok(())
    }

    /// Durably add `delta` (≥ 0) to the named counter.
    pub fn increment_counter(&self, name: &str, delta: u64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO system_stats (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = value + ?2",
            params![name, delta],
        )?;
        self.note_mutation(&conn)?;
        Ok(())
    }

    /// Read the current value of a counter; 0 for unseen names.
    pub fn load_counter(&self, name: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let value: Option<u64> = conn
            .query_row(
                "SELECT value FROM system_stats WHERE key = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0))
    }

    /// Query stored events, newest publisher timestamp first.
    ///
    /// `limit` is clamped to `[1, 1000]`. Ties on `timestamp` are broken by
    /// `(topic, event_id)` so the order is deterministic.
    pub fn query_events(&self, topic: Option<&str>, limit: i64) -> Result<Vec<StoredEvent>> {
        let limit = limit.clamp(1, 1000);
        let conn = self.conn.lock();

        let mut stmt = match topic {
            Some(_) => conn.prepare(
                "SELECT topic, event_id, timestamp, source, payload, processed_at
                 FROM event_payloads
                 WHERE topic = ?1
                 ORDER BY timestamp DESC, topic, event_id
                 LIMIT ?2",
            )?,
            None => conn.prepare(
                "SELECT topic, event_id, timestamp, source, payload, processed_at
                 FROM event_payloads
                 ORDER BY timestamp DESC, topic, event_id
                 LIMIT ?1",
            )?,
        };

        let rows = match topic {
            Some(t) => stmt.query_map(params![t, limit], row_to_event)?,
            None => stmt.query_map(params![limit], row_to_event)?,
        };

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Distinct topics observed, sorted.
    pub fn topics(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT topic FROM processed_events ORDER BY topic")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut topics = Vec::new();
        for row in rows {
            topics.push(row?);
        }
        Ok(topics)
    }

    /// Aggregate counters and topics in one call, for `GET /stats`.
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            received: self.load_counter("received")?,
            unique_processed: self.load_counter("unique_processed")?,
            duplicate_dropped: self.load_counter("duplicate_dropped")?,
            topics: self.topics()?,
        })
    }

    /// Flush all durable state and release the WAL.
    ///
    /// After this returns, every preceding mutation is on disk in either
    /// durability mode. The store remains usable afterwards; this is also
    /// safe to call again.
    pub fn close(&self) -> Result<()> {
        if self.path.is_some() {
            let conn = self.conn.lock();
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            *self.mutations.lock() = 0;
        }
        tracing::info!("dedup store closed");
        Ok(())
    }

    /// Count a mutation and take a passive checkpoint when due.
    ///
    /// Caller holds the connection lock. No-op in `Strict` mode (every commit
    /// is already synced) and for in-memory databases.
    fn note_mutation(&self, conn: &Connection) -> Result<()> {
        if self.mode != DurabilityMode::Checkpoint || self.path.is_none() {
            return Ok(());
        }

        let mut mutations = self.mutations.lock();
        *mutations += 1;
        if *mutations >= CHECKPOINT_INTERVAL {
            conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
            *mutations = 0;
            metrics::counter!("dedup_checkpoints_total").increment(1);
        }
        Ok(())
    }
}

/// Map a `event_payloads` row to a [`StoredEvent`].
fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEvent> {
    let payload_json: String = row.get(4)?;
    let payload = serde_json::from_str(&payload_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StoredEvent {
        topic: row.get(0)?,
        event_id: row.get(1)?,
        timestamp: row.get(2)?,
        source: row.get(3)?,
        payload,
        processed_at: row.get(5)?,
    })
}
