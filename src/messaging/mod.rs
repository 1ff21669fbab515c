//! Event delivery abstraction
//!
//! The task engine publishes through [`EventSink`]; the HTTP layer plugs in a
//! [`BroadcastSink`] that fans out to SSE subscribers.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::tasks::events::TaskEvent;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

pub type Result<T> = std::result::Result<T, SinkError>;

/// Observer receiving engine events in delivery order
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &TaskEvent) -> Result<()>;
}

/// Fan-out sink backed by a broadcast channel
///
/// Publishing with no subscribers is not an error; slow subscribers lose the
/// oldest events and see a lag notice on their stream.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<TaskEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn publish(&self, event: &TaskEvent) -> Result<()> {
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!(event = event.name(), "No subscribers for event");
        }
        Ok(())
    }
}

/// Sink that records every event; for tests and embedding
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TaskEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, event: &TaskEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
