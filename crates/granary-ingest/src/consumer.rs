//! The single consumer task draining the ingestion queue.
//!
//! One long-lived task owns the queue's receive side and processes events
//! strictly in enqueue order: check-and-mark, then either store the event and
//! advance `unique_processed`, or drop it and advance `duplicate_dropped`.
//! Per-event store failures are logged and swallowed — the publisher's
//! at-least-once delivery covers retry — so the loop only ever exits on the
//! shutdown signal, after draining pending items within a grace period.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use granary_core::{Event, StoredEvent, utc_now_rfc3339};

use crate::queue::Inbox;
use crate::store::{DedupStore, MarkOutcome};

/// Single consumer worker between the queue and the dedup store.
pub struct Consumer {
    store: Arc<DedupStore>,
    inbox: Inbox,
    shutdown: watch::Receiver<bool>,
    /// How long the drain may run after the shutdown signal.
    drain_grace: Duration,
    /// In-memory reflection of `unique_processed`, read by `/health`.
    processed: Arc<AtomicU64>,
}

impl Consumer {
    pub fn new(
        store: Arc<DedupStore>,
        inbox: Inbox,
        shutdown: watch::Receiver<bool>,
        drain_grace: Duration,
        processed: Arc<AtomicU64>,
    ) -> Self {
        Self {
            store,
            inbox,
            shutdown,
            drain_grace,
            processed,
        }
    }

    /// Run until the shutdown signal fires (then drain) or the queue closes.
    pub async fn run(mut self) {
        tracing::info!("consumer worker running");

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                maybe_event = self.inbox.recv() => {
                    match maybe_event {
                        Some(event) => {
                            self.process(event);
                            metrics::gauge!("queue_depth").set(self.inbox.len() as f64);
                        }
                        // All producers gone: nothing more will arrive.
                        None => {
                            tracing::info!("ingestion queue closed, consumer exiting");
                            return;
                        }
                    }
                }
            }
        }

        self.drain();
        tracing::info!("consumer worker stopped");
    }

    /// Drain pending queue entries after shutdown, up to the grace deadline.
    fn drain(&mut self) {
        let deadline = Instant::now() + self.drain_grace;
        let mut drained = 0usize;

        while let Some(event) = self.inbox.try_recv() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    remaining = self.inbox.len() + 1,
                    "drain deadline reached, abandoning queued events"
                );
                return;
            }
            self.process(event);
            drained += 1;
        }

        tracing::info!(drained, "queue drained");
    }

    /// Process one event. Errors are logged, never propagated; the affected
    /// event ends up neither marked nor stored nor counted.
    fn process(&self, event: Event) {
        let key = event.key();

        match self.store.check_and_mark(&event.topic, &event.event_id) {
            Ok(MarkOutcome::New) => {
                let topic = event.topic.clone();
                let event_id = event.event_id.clone();
                let stored = StoredEvent::from_event(event, utc_now_rfc3339());

                if let Err(e) = self.store.store_event(&stored) {
                    tracing::warn!(key = %key, error = %e, "failed to store event, unmarking");
                    metrics::counter!("consumer_errors_total").increment(1);
                    if let Err(e) = self.store.unmark(&topic, &event_id) {
                        // Open-time recovery will clean this orphan up.
                        tracing::warn!(key = %key, error = %e, "failed to unmark event");
                    }
                    return;
                }

                if let Err(e) = self.store.increment_counter("unique_processed", 1) {
                    tracing::warn!(key = %key, error = %e, "failed to advance unique_processed");
                    metrics::counter!("consumer_errors_total").increment(1);
                }
                self.processed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("consumer_events_unique_total").increment(1);
                tracing::debug!(key = %key, "processed");
            }
            Ok(MarkOutcome::Duplicate) => {
                if let Err(e) = self.store.increment_counter("duplicate_dropped", 1) {
                    tracing::warn!(key = %key, error = %e, "failed to advance duplicate_dropped");
                    metrics::counter!("consumer_errors_total").increment(1);
                }
                metrics::counter!("consumer_events_duplicate_total").increment(1);
                tracing::debug!(key = %key, "duplicate dropped");
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "check_and_mark failed, skipping event");
                metrics::counter!("consumer_errors_total").increment(1);
            }
        }
    }
}
