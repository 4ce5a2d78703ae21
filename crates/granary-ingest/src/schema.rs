//! SQLite schema for the dedup store.
//!
//! This module defines the database schema and provides migration utilities
//! for the dedup store database.

use rusqlite::{Connection, Result};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
///
/// Creates all tables if they don't exist and runs any pending migrations.
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Check current version
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        // Fresh database - create all tables
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        // Run migrations
        migrate(conn, current_version, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    // Create version table if it doesn't exist
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Create all tables for a fresh database.
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Processed markers: one row per unique (topic, event_id), ever
        CREATE TABLE IF NOT EXISTS processed_events (
            topic TEXT NOT NULL,
            event_id TEXT NOT NULL,
            first_seen_at TEXT NOT NULL,
            PRIMARY KEY (topic, event_id)
        );

        -- Full stored events, written only after a New marker
        CREATE TABLE IF NOT EXISTS event_payloads (
            topic TEXT NOT NULL,
            event_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            source TEXT NOT NULL,
            payload TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            PRIMARY KEY (topic, event_id)
        );

        -- Durable counters (received, unique_processed, duplicate_dropped)
        CREATE TABLE IF NOT EXISTS system_stats (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        -- Indexes for topic-filtered queries
        CREATE INDEX IF NOT EXISTS idx_event_payloads_topic ON event_payloads(topic);
        CREATE INDEX IF NOT EXISTS idx_processed_events_topic ON processed_events(topic);
        "#,
    )?;

    Ok(())
}

/// Run migrations from one version to another.
fn migrate(conn: &Connection, _from: i32, to: i32) -> Result<()> {
    // No migrations yet; v1 is the first released schema.
    set_schema_version(conn, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_init_schema_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        // Verify tables exist
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"processed_events".to_string()));
        assert!(tables.contains(&"event_payloads".to_string()));
        assert!(tables.contains(&"system_stats".to_string()));
    }

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // Should not fail
    }

    #[test]
    fn test_marker_primary_key_rejects_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO processed_events (topic, event_id, first_seen_at) VALUES (?, ?, ?)",
            ["billing", "tx-001", "2025-10-23T10:00:00Z"],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO processed_events (topic, event_id, first_seen_at) VALUES (?, ?, ?)",
            ["billing", "tx-001", "2025-10-23T10:00:01Z"],
        );
        assert!(dup.is_err());
    }
}
