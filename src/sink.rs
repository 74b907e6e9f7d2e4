//! Where session events go.
//!
//! The worker does not know who listens, or whether anyone does; a sink with no
//! subscribers silently drops events.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::types::ScanEvent;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ScanEvent);
}

/// Fan-out to any number of subscribers (the SSE endpoint uses one receiver per client).
///
/// Never blocks the producer: a subscriber that falls more than `capacity` events behind
/// loses the oldest ones.
#[derive(Clone, Debug)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ScanEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn emit(&self, event: ScanEvent) {
        if self.tx.send(event).is_err() {
            debug!("no subscribers, event dropped");
        }
    }
}

/// Single consumer behind a bounded queue: `emit` waits while the queue is full, so a
/// slow consumer paces the worker.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<ScanEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ScanEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: ScanEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("event receiver closed, event dropped");
        }
    }
}
