//! Event bus broadcasting root changes to feed subscribers.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use super::types::{DropReason, FeedConfig, FeedHandle, FeedId, RootEvent};

/// Internal feed subscription state.
struct FeedSubscription {
    config: FeedConfig,
    sender: Sender<RootEvent>,
}

impl FeedSubscription {
    /// Try to send an event. Returns false if the buffer is full or the
    /// receiver is gone.
    fn try_send(&self, event: RootEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

/// Manages feed subscriptions and broadcasts root events.
pub struct RootEventBus {
    subscriptions: RwLock<HashMap<FeedId, FeedSubscription>>,
    next_id: AtomicU64,
}

impl RootEventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new feed subscription.
    pub fn subscribe(&self, config: FeedConfig) -> FeedHandle {
        let id = FeedId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscriptions
            .write()
            .insert(id, FeedSubscription { config, sender });

        FeedHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: FeedId) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            let _ = sub.sender.try_send(RootEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Send `event` to every matching subscriber. Drops subscribers that fail
    /// to receive.
    pub fn broadcast(&self, event: RootEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            if subs.is_empty() {
                return;
            }
            for (id, sub) in subs.iter() {
                if event.matches(&sub.config.filter) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(feed = id.0, "Dropping slow root feed subscriber");
                    let _ = sub.sender.try_send(RootEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for RootEventBus {
    fn default() -> Self {
        Self::new()
    }
}
