//! Connector lifecycle and data notifications
//!
//! Observers register plain callbacks keyed by a subscription id; there is no
//! object graph to walk. Events are emitted from both the worker thread
//! (connection lifecycle, received data) and the owner thread (activation),
//! so callbacks must be `Send + Sync` and are invoked outside the
//! subscription lock.

use std::sync::{Arc, Mutex};

use crate::io::lock;

/// Notifications emitted by a [`Connector`](crate::io::Connector)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    /// The worker thread was started
    Activated,
    /// The worker thread exited
    Deactivated,
    /// A connection was established
    Connected,
    /// The connection was lost or closed
    Disconnected,
    /// A new message completed for a device and is ready to drain
    Receive {
        /// Wire device name the message arrived under
        device: String,
    },
    /// A previously unseen (name, type) pair was observed and auto-registered
    NewDevice {
        /// Wire device name
        name: String,
        /// Wire device type
        device_type: String,
    },
}

/// Handle for removing an event subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&ConnectorEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

/// Subscription table for connector events
#[derive(Default)]
pub(crate) struct EventDispatcher {
    subscribers: Mutex<Subscribers>,
}

impl EventDispatcher {
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ConnectorEvent) + Send + Sync + 'static,
    {
        let mut subs = lock(&self.subscribers);
        let id = subs.next_id;
        subs.next_id += 1;
        subs.entries.push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = lock(&self.subscribers);
        let before = subs.entries.len();
        subs.entries.retain(|(sid, _)| *sid != id.0);
        subs.entries.len() != before
    }

    // Callbacks run outside the lock so they may freely call back into the
    // connector (including subscribe/unsubscribe).
    pub fn emit(&self, event: &ConnectorEvent) {
        let callbacks: Vec<Callback> = lock(&self.subscribers)
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}
