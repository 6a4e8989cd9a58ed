//! Live updates for queue and availability views.
//!
//! Committed ledger changes are published on a broadcast channel. Observers
//! subscribe and filter by event. Slow subscribers lag and lose messages; the
//! engine never waits on them.

use crate::events::{LedgerEvent, LedgerNotification};
use crate::types::EventId;
use tokio::sync::broadcast;

/// Broadcast of committed ledger changes
#[derive(Clone, Debug)]
pub struct Notifier {
    sender: broadcast::Sender<LedgerNotification>,
}

impl Notifier {
    /// Channel buffering up to `capacity` notifications per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every notification published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerNotification> {
        self.sender.subscribe()
    }

    /// Publish changes for an event; a no-op without subscribers
    pub fn publish<'a>(&self, event_id: EventId, changes: impl IntoIterator<Item = &'a LedgerEvent>) {
        if self.sender.receiver_count() == 0 {
            return;
        }
        for change in changes {
            // Err only means every receiver was dropped meanwhile
            let _ = self.sender.send(LedgerNotification {
                event_id,
                change: change.clone(),
            });
        }
    }

    /// Current subscriber count
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
