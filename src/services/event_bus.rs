//! Event bus.
//!
//! Broadcast-based fan-out of typed engine events with per-process sequence
//! numbering. Subscribers that fall behind lose the oldest events (broadcast
//! semantics); the delivery contract is at-least-once for live subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EngineEvent, EventEnvelope};
use crate::domain::ports::EventPublisher;

/// In-process event bus backed by a tokio broadcast channel.
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Subscribe to the event stream from this point forward.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Wrap and broadcast an event, returning the assigned envelope.
    pub fn emit(&self, event: EngineEvent) -> EventEnvelope {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            event,
        };
        debug!(
            kind = envelope.event.kind(),
            run_id = envelope.event.run_id(),
            sequence = envelope.sequence,
            "event published"
        );
        // A send error only means nobody is listening right now.
        let _ = self.sender.send(envelope.clone());
        envelope
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: EngineEvent) -> DomainResult<()> {
        self.emit(event);
        Ok(())
    }
}

/// Publisher decorator that retries transient publish failures.
///
/// Workers and the coordinator must not lose lifecycle events to a hiccup in
/// an external bus; failed publishes are retried with exponential backoff
/// for a bounded window, then logged and dropped (the SLA monitor reaps any
/// task orphaned by the loss).
pub struct RetryingPublisher {
    inner: Arc<dyn EventPublisher>,
    max_elapsed: Duration,
}

impl RetryingPublisher {
    pub fn new(inner: Arc<dyn EventPublisher>, max_elapsed: Duration) -> Self {
        Self { inner, max_elapsed }
    }
}

#[async_trait]
impl EventPublisher for RetryingPublisher {
    async fn publish(&self, event: EngineEvent) -> DomainResult<()> {
        let policy = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(50))
            .with_max_interval(Duration::from_secs(1))
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build();

        let result = backoff::future::retry(policy, || {
            let event = event.clone();
            async move {
                self.inner
                    .publish(event)
                    .await
                    .map_err(backoff::Error::transient)
            }
        })
        .await;

        if let Err(e) = &result {
            error!(
                kind = event.kind(),
                run_id = event.run_id(),
                error = %e,
                "event publish failed after retries, dropping"
            );
            return Err(DomainError::Publish(e.to_string()));
        }
        Ok(())
    }
}
