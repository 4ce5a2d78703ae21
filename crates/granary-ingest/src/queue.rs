//! Bounded in-memory ingestion queue.
//!
//! A multi-producer / single-consumer FIFO between the publish handlers and
//! the consumer task, built on `tokio::sync::mpsc`. Capacity is fixed at
//! construction (default 10 000); a full queue makes producers wait, which is
//! the system's only back-pressure mechanism. The queue never drops elements
//! and is deliberately non-durable: a restart empties it, and publishers are
//! expected to redeliver.
//!
//! Enqueueing is two-phase. A handler first reserves slots for its whole
//! batch ([`Publisher::reserve`]), which can wait and time out without any
//! state change; committing the reserved slots ([`BatchSlots::send`]) is
//! synchronous and infallible. Counter updates can therefore sit between the
//! two phases without ever being stranded by a full queue or a dropped
//! connection.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use granary_core::Event;

/// Errors surfaced to producers.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// Capacity could not be reserved within the caller's deadline.
    #[error("ingestion queue is full")]
    Saturated,

    /// The consumer side is gone (shutdown).
    #[error("ingestion queue closed")]
    Closed,
}

/// Create a bounded queue with the given capacity.
pub fn queue(capacity: usize) -> (Publisher, Inbox) {
    let (tx, rx) = mpsc::channel(capacity);
    (Publisher { tx }, Inbox { rx })
}

/// Producer handle, cloned into every publish handler.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Event>,
}

/// Reserved capacity for one batch, ready to commit.
#[derive(Debug)]
pub struct BatchSlots<'a> {
    permits: Vec<mpsc::Permit<'a, Event>>,
}

impl Publisher {
    /// Reserve `n` queue slots, waiting up to `timeout` for space.
    ///
    /// On success the slots are held until [`BatchSlots::send`] commits them
    /// (or the value is dropped, which releases them). No queue state is
    /// visible to the consumer until commit.
    pub async fn reserve(
        &self,
        n: usize,
        timeout: Duration,
    ) -> Result<BatchSlots<'_>, QueueError> {
        // A reservation larger than the queue itself can never be satisfied.
        if n > self.tx.max_capacity() {
            return Err(QueueError::Saturated);
        }
        match tokio::time::timeout(timeout, self.tx.reserve_many(n)).await {
            Ok(Ok(permits)) => Ok(BatchSlots {
                permits: permits.collect(),
            }),
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::Saturated),
        }
    }

    /// Events currently occupying queue slots (including reserved ones).
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Total queue capacity.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl BatchSlots<'_> {
    /// Number of reserved slots.
    pub fn len(&self) -> usize {
        self.permits.len()
    }

    /// Whether the reservation is empty.
    pub fn is_empty(&self) -> bool {
        self.permits.is_empty()
    }

    /// Commit the batch in submission order.
    ///
    /// Synchronous and infallible: there is no await between the caller's
    /// bookkeeping and the events becoming visible to the consumer.
    ///
    /// # Panics
    ///
    /// Panics if `events.len()` differs from the reservation size.
    pub fn send(self, events: Vec<Event>) {
        assert_eq!(events.len(), self.permits.len(), "reservation size mismatch");
        for (permit, event) in self.permits.into_iter().zip(events) {
            permit.send(event);
        }
    }
}

/// Consumer handle; exactly one exists per queue.
pub struct Inbox {
    rx: mpsc::Receiver<Event>,
}

impl Inbox {
    /// Receive the next event in FIFO order, waiting if the queue is empty.
    ///
    /// Returns `None` once all producers are gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive, used while draining during shutdown.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Events currently buffered in the queue.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_event(event_id: &str) -> Event {
        Event {
            topic: "logs.test".to_string(),
            event_id: event_id.to_string(),
            timestamp: "2025-10-23T10:00:00Z".to_string(),
            source: "t".to_string(),
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (publisher, mut inbox) = queue(16);

        let events: Vec<Event> = (0..4).map(|i| test_event(&format!("e{i}"))).collect();
        let slots = publisher
            .reserve(4, Duration::from_secs(1))
            .await
            .unwrap();
        slots.send(events);

        for i in 0..4 {
            let event = inbox.recv().await.unwrap();
            assert_eq!(event.event_id, format!("e{i}"));
        }
    }

    #[tokio::test]
    async fn test_reserve_times_out_when_full() {
        let (publisher, _inbox) = queue(2);

        let slots = publisher
            .reserve(2, Duration::from_millis(50))
            .await
            .unwrap();
        slots.send(vec![test_event("a"), test_event("b")]);

        // Queue is full and nobody is consuming: the next reservation must
        // time out with Saturated, not block forever.
        let err = publisher
            .reserve(1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::Saturated);
    }

    #[tokio::test]
    async fn test_oversized_reservation_saturates() {
        // Asking for more slots than the queue will ever have cannot succeed.
        let (publisher, _inbox) = queue(2);
        let err = publisher
            .reserve(3, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::Saturated);
    }

    #[tokio::test]
    async fn test_reserve_after_consumer_dropped() {
        let (publisher, inbox) = queue(2);
        drop(inbox);

        let err = publisher
            .reserve(1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::Closed);
    }

    #[tokio::test]
    async fn test_dropped_reservation_releases_slots() {
        let (publisher, _inbox) = queue(2);

        {
            let _slots = publisher.reserve(2, Duration::from_millis(50)).await.unwrap();
            assert_eq!(publisher.depth(), 2);
        }

        // Slots came back without anything being enqueued.
        assert_eq!(publisher.depth(), 0);
        let slots = publisher.reserve(2, Duration::from_millis(50)).await.unwrap();
        assert_eq!(slots.len(), 2);
    }

    #[tokio::test]
    async fn test_depth_tracking() {
        let (publisher, mut inbox) = queue(8);
        assert_eq!(publisher.depth(), 0);
        assert_eq!(publisher.capacity(), 8);

        let slots = publisher.reserve(3, Duration::from_secs(1)).await.unwrap();
        slots.send(vec![test_event("a"), test_event("b"), test_event("c")]);
        assert_eq!(publisher.depth(), 3);
        assert_eq!(inbox.len(), 3);

        inbox.recv().await.unwrap();
        assert_eq!(publisher.depth(), 2);
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let (publisher, mut inbox) = queue(2);
        assert!(inbox.try_recv().is_none());

        let slots = publisher.reserve(1, Duration::from_secs(1)).await.unwrap();
        slots.send(vec![test_event("a")]);
        assert_eq!(inbox.try_recv().unwrap().event_id, "a");
        assert!(inbox.try_recv().is_none());
    }
}
