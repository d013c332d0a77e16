//! Change notification fan-out.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::context::{Subscription, SubscriptionId};
use ormfetch_proto::{ChangeEvent, ChangeNotification, StoreId};

/// A registered subscriber.
#[derive(Debug)]
struct SubscriberEntry {
    /// Entities the subscriber tracks.
    entities: Vec<String>,
    /// Delivery channel.
    sender: UnboundedSender<ChangeNotification>,
}

impl SubscriberEntry {
    fn tracks(&self, entity: &str) -> bool {
        self.entities.iter().any(|e| e == entity)
    }
}

/// Delivers change batches to subscribers through unbounded channels.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Debug)]
pub struct ChangePublisher {
    subscribers: DashMap<SubscriptionId, SubscriberEntry>,
    next_subscription_id: AtomicU64,
}

impl ChangePublisher {
    /// Create a publisher with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_subscription_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber for the given entities.
    pub fn subscribe(&self, entities: &[String]) -> Subscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();

        self.subscribers.insert(
            id,
            SubscriberEntry {
                entities: entities.to_vec(),
                sender,
            },
        );

        tracing::debug!(subscription_id = id, entities = ?entities, "subscription created");
        Subscription { id, receiver }
    }

    /// Remove a subscriber. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            tracing::debug!(subscription_id = id, "subscription removed");
        }
        removed
    }

    /// Number of live subscribers.
    pub fn subscription_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Send each subscriber the events for entities it tracks, as one batch.
    ///
    /// Returns how many subscribers received a batch.
    pub fn publish_batch(&self, events: &[ChangeEvent]) -> usize {
        if events.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            let batch: Vec<ChangeEvent> = events
                .iter()
                .filter(|event| entry.tracks(event.entity()))
                .cloned()
                .collect();
            if batch.is_empty() {
                continue;
            }
            if entry.sender.send(ChangeNotification::Batch(batch)).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        self.prune(closed);
        tracing::trace!(events = events.len(), subscribers = delivered, "published change batch");
        delivered
    }

    /// Tell every subscriber the attached stores changed.
    pub fn publish_topology(&self, stores: &[StoreId]) {
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if entry
                .sender
                .send(ChangeNotification::StoresChanged(stores.to_vec()))
                .is_err()
            {
                closed.push(*entry.key());
            }
        }
        self.prune(closed);
        tracing::debug!(stores = stores.len(), "published store topology change");
    }

    fn prune(&self, closed: Vec<SubscriptionId>) {
        for id in closed {
            self.subscribers.remove(&id);
            tracing::debug!(subscription_id = id, "pruned closed subscription");
        }
    }
}

impl Default for ChangePublisher {
    fn default() -> Self {
        Self::new()
    }
}
