//! Application state and configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use granary_core::{DEFAULT_BATCH_MAX, DEFAULT_QUEUE_CAPACITY};
use granary_ingest::{DedupStore, DurabilityMode, Publisher};

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080").
    pub bind_addr: String,

    /// Directory holding the dedup store database and its WAL files.
    pub data_dir: PathBuf,

    /// Ingestion queue capacity.
    pub queue_capacity: usize,

    /// Maximum events per publish request.
    pub batch_max: usize,

    /// Durability mode for the dedup store.
    pub durability: DurabilityMode,

    /// How long a publish handler waits for queue space before 503.
    pub enqueue_timeout: Duration,

    /// How long the consumer may drain the queue during shutdown.
    pub drain_grace: Duration,

    /// Prometheus exporter port (0 disables the metrics server).
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `GRANARY_BIND_ADDR`: Server bind address (default: "0.0.0.0:8080")
    /// - `GRANARY_DATA_DIR`: Data directory (default: "./data")
    /// - `GRANARY_QUEUE_CAPACITY`: Queue slots (default: 10000)
    /// - `GRANARY_BATCH_MAX`: Max events per publish (default: 1000)
    /// - `GRANARY_DURABILITY`: "strict" | "checkpoint" (default: "checkpoint")
    /// - `GRANARY_ENQUEUE_TIMEOUT_SECS`: Back-pressure wait (default: 5)
    /// - `GRANARY_DRAIN_GRACE_SECS`: Shutdown drain deadline (default: 10)
    /// - `GRANARY_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("GRANARY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("GRANARY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let queue_capacity = parse_env("GRANARY_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        let batch_max = parse_env("GRANARY_BATCH_MAX", DEFAULT_BATCH_MAX)?;
        let enqueue_timeout_secs = parse_env("GRANARY_ENQUEUE_TIMEOUT_SECS", 5u64)?;
        let drain_grace_secs = parse_env("GRANARY_DRAIN_GRACE_SECS", 10u64)?;
        let metrics_port = parse_env("GRANARY_METRICS_PORT", 0u16)?;

        let durability = match std::env::var("GRANARY_DURABILITY") {
            Ok(raw) => raw.parse::<DurabilityMode>().map_err(|_| {
                anyhow::anyhow!("GRANARY_DURABILITY must be 'strict' or 'checkpoint', got '{raw}'")
            })?,
            Err(_) => DurabilityMode::default(),
        };

        if queue_capacity == 0 {
            anyhow::bail!("GRANARY_QUEUE_CAPACITY must be at least 1");
        }
        if batch_max == 0 {
            anyhow::bail!("GRANARY_BATCH_MAX must be at least 1");
        }

        tracing::info!(
            bind_addr = %bind_addr,
            data_dir = %data_dir.display(),
            queue_capacity,
            batch_max,
            durability = durability.as_str(),
            metrics_port,
            "configuration loaded"
        );

        Ok(Self {
            bind_addr,
            data_dir,
            queue_capacity,
            batch_max,
            durability,
            enqueue_timeout: Duration::from_secs(enqueue_timeout_secs),
            drain_grace: Duration::from_secs(drain_grace_secs),
            metrics_port,
        })
    }

    /// Path of the dedup store database inside the data directory.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("dedup.db")
    }
}

/// Parse an env var, falling back to a default when unset.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key} '{raw}': {e}")),
        Err(_) => Ok(default),
    }
}

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,

    /// Durable dedup store, shared with the consumer.
    pub store: Arc<DedupStore>,

    /// Producer side of the ingestion queue.
    pub publisher: Publisher,

    /// In-memory reflection of `unique_processed`, kept current by the
    /// consumer and initialized from disk at open. `/health` reads this
    /// instead of touching the store.
    pub processed: Arc<AtomicU64>,

    /// Server start time, for `/stats` uptime.
    pub started_at: Instant,
}

impl AppState {
    /// Assemble the shared state from already-wired components.
    pub fn new(
        config: Arc<Config>,
        store: Arc<DedupStore>,
        publisher: Publisher,
        processed: Arc<AtomicU64>,
    ) -> Self {
        Self {
            config,
            store,
            publisher,
            processed,
            started_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "GRANARY_BIND_ADDR",
        "GRANARY_DATA_DIR",
        "GRANARY_QUEUE_CAPACITY",
        "GRANARY_BATCH_MAX",
        "GRANARY_DURABILITY",
        "GRANARY_ENQUEUE_TIMEOUT_SECS",
        "GRANARY_DRAIN_GRACE_SECS",
        "GRANARY_METRICS_PORT",
    ];

    /// Helper to run config tests with isolated env vars.
    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap();

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: Serialized by mutex; only test code touches these vars.
        unsafe {
            for k in ENV_KEYS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        // SAFETY: Restoring original env state.
        unsafe {
            for (k, v) in &saved {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.bind_addr, "0.0.0.0:8080");
            assert_eq!(config.data_dir, PathBuf::from("./data"));
            assert_eq!(config.queue_capacity, 10_000);
            assert_eq!(config.batch_max, 1000);
            assert_eq!(config.durability, DurabilityMode::Checkpoint);
            assert_eq!(config.enqueue_timeout, Duration::from_secs(5));
            assert_eq!(config.drain_grace, Duration::from_secs(10));
            assert_eq!(config.metrics_port, 0);
        });
    }

    #[test]
    fn config_custom_values() {
        with_env_vars(
            &[
                ("GRANARY_BIND_ADDR", "127.0.0.1:9090"),
                ("GRANARY_DATA_DIR", "/var/lib/granary"),
                ("GRANARY_QUEUE_CAPACITY", "500"),
                ("GRANARY_BATCH_MAX", "50"),
                ("GRANARY_DURABILITY", "strict"),
                ("GRANARY_METRICS_PORT", "9091"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.bind_addr, "127.0.0.1:9090");
                assert_eq!(config.data_dir, PathBuf::from("/var/lib/granary"));
                assert_eq!(config.queue_capacity, 500);
                assert_eq!(config.batch_max, 50);
                assert_eq!(config.durability, DurabilityMode::Strict);
                assert_eq!(config.metrics_port, 9091);
                assert_eq!(config.store_path(), PathBuf::from("/var/lib/granary/dedup.db"));
            },
        );
    }

    #[test]
    fn config_rejects_bad_durability() {
        with_env_vars(&[("GRANARY_DURABILITY", "eventual")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn config_rejects_zero_capacity() {
        with_env_vars(&[("GRANARY_QUEUE_CAPACITY", "0")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn config_rejects_unparseable_number() {
        with_env_vars(&[("GRANARY_BATCH_MAX", "many")], || {
            assert!(Config::from_env().is_err());
        });
    }
}
