use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender, unbounded};

/// Notifications published by a [`DeviceLink`](super::DeviceLink).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    Ready,
    DriveCount(u8),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&LinkEvent) + Send + Sync>;

#[derive(Clone)]
enum Subscriber {
    Handler(Handler),
    Channel(Sender<LinkEvent>),
}

/// Copy-on-write subscriber list. Publishing never takes a lock, so the
/// reader thread cannot stall on a subscriber registering.
pub struct EventBus {
    subscribers: ArcSwap<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.add(Subscriber::Handler(Arc::new(handler)))
    }

    /// Delivers every later event to the returned receiver. The subscription
    /// is dropped at the first publish after the receiver goes away.
    pub fn subscribe_channel(&self) -> Receiver<LinkEvent> {
        let (tx, rx) = unbounded();
        self.add(Subscriber::Channel(tx));
        rx
    }

    fn add(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push((id, subscriber.clone()));
            next
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.remove(&[id]) > 0
    }

    /// Returns how many of `ids` were still subscribed.
    fn remove(&self, ids: &[SubscriptionId]) -> usize {
        let before = self.subscribers.load().len();
        self.subscribers.rcu(|current| {
            current
                .iter()
                .filter(|(sid, _)| !ids.contains(sid))
                .cloned()
                .collect::<Vec<_>>()
        });
        before.saturating_sub(self.subscribers.load().len())
    }

    pub fn len(&self) -> usize {
        self.subscribers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn publish(&self, event: LinkEvent) {
        tracing::trace!(?event, "publishing link event");
        let mut closed = Vec::new();
        for (id, subscriber) in self.subscribers.load().iter() {
            match subscriber {
                Subscriber::Handler(handler) => handler(&event),
                Subscriber::Channel(tx) => {
                    if tx.send(event).is_err() {
                        closed.push(*id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            let removed = self.remove(&closed);
            tracing::debug!(removed, "dropped closed event channels");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
