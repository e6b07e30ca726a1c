//! Change subscriptions
//!
//! Subscriptions are per-table, keyed either on one primary key or on the
//! whole table (wildcard). Delivery happens after commit: the database
//! dispatches each committed audit entry to the owning table's registry,
//! which fans it out over `mpsc` channels. A subscription opened with
//! `retain` first receives the currently stored value, mirroring
//! retained-message semantics.
//!
//! Disconnected receivers are pruned on the next notify; dropping a
//! `Subscription` is enough to unsubscribe.

use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;
use tessera_core::{AuditEntry, Value, Version};
use uuid::Uuid;

/// Opaque subscription identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options for opening a subscription
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Deliver the currently stored value before live notifications
    pub retain: bool,
}

impl SubscribeOptions {
    /// Options with retained delivery enabled
    pub fn retained() -> Self {
        Self { retain: true }
    }
}

/// One delivered notification
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The value stored at subscribe time (`retain` only)
    Retained {
        /// Primary key
        key: Value,
        /// Stored record attributes
        value: Value,
        /// Stored version
        version: Version,
    },
    /// A committed mutation or published message
    Commit(AuditEntry),
}

struct Subscriber {
    id: SubscriptionId,
    // None subscribes to the whole table
    key: Option<Value>,
    sender: mpsc::Sender<Notification>,
}

/// Per-table subscriber fan-out
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for one key, or the whole table with `None`
    pub(crate) fn subscribe(&self, key: Option<Value>) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let id = SubscriptionId::new();
        self.subscribers.lock().push(Subscriber { id, key, sender });
        Subscription { id, receiver }
    }

    /// Drop one subscriber
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    /// Deliver directly to one subscriber (retained values)
    pub(crate) fn send_to(&self, id: SubscriptionId, notification: Notification) {
        let subscribers = self.subscribers.lock();
        if let Some(subscriber) = subscribers.iter().find(|s| s.id == id) {
            let _ = subscriber.sender.send(notification);
        }
    }

    /// Fan a committed audit entry out to matching subscribers
    ///
    /// Subscribers whose receiver has been dropped are pruned here.
    pub(crate) fn notify(&self, entry: &AuditEntry) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| {
            let matches = match &subscriber.key {
                None => true,
                Some(key) => *key == entry.key,
            };
            if !matches {
                return true;
            }
            subscriber
                .sender
                .send(Notification::Commit(entry.clone()))
                .is_ok()
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

/// The receiving half of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Notification>,
}

impl Subscription {
    /// This subscription's identity
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait up to `timeout` for the next notification
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Notification> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Take the next notification if one is already queued
    pub fn try_recv(&self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }
}
