//! Depot Events - repository event delivery
//!
//! Repositories publish [`RepositoryEvent`]s through an [`EventPublisher`].
//! The [`EventBus`] implementation fans every event out to all current
//! subscribers over a `tokio` broadcast channel.
//!
//! ## Delivery
//!
//! - Publishing never blocks and never fails; with no subscribers the event
//!   is dropped.
//! - A subscriber that falls more than the channel capacity behind misses the
//!   oldest events and is told how many it skipped.
//! - [`RepositorySubscription`] filters the stream down to one repository.

use depot_core::{RepositoryEvent, RepositoryId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default number of buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Sink for repository events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: RepositoryEvent);
}

/// Publisher that drops everything, for repositories nobody listens to.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: RepositoryEvent) {}
}

/// Broadcast fan-out of repository events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RepositoryEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.tx.subscribe()
    }

    /// Receive only the events of one repository.
    pub fn subscribe_repository(&self, repository: RepositoryId) -> RepositorySubscription {
        RepositorySubscription {
            repository,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: RepositoryEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event_type = event_type, receivers = receivers, "Published event");
            }
            Err(_) => {
                // No subscribers
                debug!(event_type = event_type, "No subscribers for event");
            }
        }
    }
}

/// Event stream of a single repository.
#[derive(Debug)]
pub struct RepositorySubscription {
    repository: RepositoryId,
    rx: broadcast::Receiver<RepositoryEvent>,
}

impl RepositorySubscription {
    /// Next event of this repository, or `None` once the bus is gone.
    ///
    /// Lag is logged and skipped over.
    pub async fn recv(&mut self) -> Option<RepositoryEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.repository() == &self.repository => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(repository = %self.repository, skipped = skipped, "Event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already buffered event of this repository, without waiting.
    pub fn try_recv(&mut self) -> Option<RepositoryEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.repository() == &self.repository => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
