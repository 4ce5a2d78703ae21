//! Granary Serve - HTTP API server for the pub-sub log aggregator.
//!
//! This binary opens the dedup store, spawns the consumer worker, and serves
//! the publish/query API.
//!
//! # Graceful Shutdown
//!
//! On SIGINT (Ctrl+C) the server:
//! 1. Stops accepting new requests
//! 2. Signals the consumer to drain the queue (bounded grace period)
//! 3. Closes the dedup store, flushing checkpointed state

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use anyhow::Context;
use axum::http::Request;
use clap::Parser;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use granary_core::metrics::{init_metrics, start_metrics_server};
use granary_ingest::{Consumer, DedupStore, queue};
use granary_serve::{AppState, Config, router};

/// Granary aggregator API server.
#[derive(Parser, Debug)]
#[command(name = "granary-serve")]
#[command(about = "HTTP API server for the Granary log aggregator", long_about = None)]
#[command(version)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load .env file if it exists
    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Initialize metrics exporter
    if config.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(config.metrics_port, metrics_handle).await?;
    }

    // Open the dedup store; a failure here aborts startup.
    let store = Arc::new(
        DedupStore::open(config.store_path(), config.durability)
            .with_context(|| format!("failed to open dedup store in {:?}", config.data_dir))?,
    );

    // The /health processed counter starts from the durable value.
    let processed = Arc::new(AtomicU64::new(
        store
            .load_counter("unique_processed")
            .context("failed to read unique_processed")?,
    ));

    // Wire the ingestion pipeline: queue -> consumer -> store.
    let (publisher, inbox) = queue(config.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = Consumer::new(
        Arc::clone(&store),
        inbox,
        shutdown_rx,
        config.drain_grace,
        Arc::clone(&processed),
    );
    let consumer_handle = tokio::spawn(consumer.run());

    // Build router with middleware
    let state = AppState::new(
        Arc::clone(&config),
        Arc::clone(&store),
        publisher,
        processed,
    );
    let app = router(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    query = request.uri().query().unwrap_or("")
                )
            }),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown sequence: requests have stopped; drain the queue, then flush.
    tracing::info!("shutting down...");
    let _ = shutdown_tx.send(true);
    consumer_handle
        .await
        .context("consumer task panicked during drain")?;
    store.close().context("failed to close dedup store")?;
    tracing::info!("shutdown complete");

    Ok(())
}

/// Resolve when the process receives SIGINT.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
