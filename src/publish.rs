//! Fire-and-forget notification of persisted items.
//!
//! Downstream consumers learn about new objects through a [`ProcessedEvent`]
//! emitted exactly once per fresh catalog row. Delivery failures are the
//! publisher's problem to report; the pipeline logs them and carries on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::catalog::ObjectStatus;

/// Event announcing that an object is durable and catalogued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Catalog row id of the image.
    pub id: i64,
    /// Object name within the configured bucket.
    pub processed_object: String,
    /// Catalog status at publish time.
    pub status: ObjectStatus,
}

/// Errors raised while emitting an event.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The receiving side has gone away.
    #[error("event channel closed")]
    Closed,
    /// The channel is at capacity.
    #[error("event channel full")]
    Full,
}

/// Sink for [`ProcessedEvent`]s.
#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    /// Emit `event` without waiting for downstream processing.
    async fn publish(&self, event: ProcessedEvent) -> Result<(), PublishError>;
}

/// [`EventPublisher`] that forwards into a bounded channel.
///
/// Publishing never waits: a full channel is reported as
/// [`PublishError::Full`].
#[derive(Clone, Debug)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<ProcessedEvent>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiver that drains it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProcessedEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, event: ProcessedEvent) -> Result<(), PublishError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::Full,
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })
    }
}
