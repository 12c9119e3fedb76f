// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Off-the-hot-path delivery of eviction and expiration events.
//!
//! Stores publish events into an unbounded queue; a single notifier task per
//! store drains it and calls listeners in the order events occurred. The
//! task starts with the first listener and ends when the store is disposed
//! or dropped.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use toolkit_tier::{CacheListener, Error};

/// Something that happened to a locally resident key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheEvent<K> {
    /// The key left this node's local tiers because of capacity pressure.
    Evicted(K),
    /// The key's TTI or TTL elapsed.
    Expired(K),
}

impl<K> CacheEvent<K> {
    /// Returns the key the event is about.
    #[must_use]
    pub fn key(&self) -> &K {
        match self {
            Self::Evicted(key) | Self::Expired(key) => key,
        }
    }

    /// Returns a stable, lowercase name for the event.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Evicted(_) => "evicted",
            Self::Expired(_) => "expired",
        }
    }
}

impl<K: 'static> CacheEvent<K> {
    fn dispatch(&self, listener: &dyn CacheListener<K>) {
        match self {
            Self::Evicted(key) => listener.on_eviction(key),
            Self::Expired(key) => listener.on_expiration(key),
        }
    }
}

type Listeners<K> = Arc<RwLock<Vec<Arc<dyn CacheListener<K>>>>>;

struct Queue<K> {
    sender: Option<UnboundedSender<CacheEvent<K>>>,
    receiver: Option<UnboundedReceiver<CacheEvent<K>>>,
}

pub(crate) struct Notifier<K> {
    store: Arc<str>,
    listeners: Listeners<K>,
    queue: Mutex<Queue<K>>,
}

impl<K> std::fmt::Debug for Notifier<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("Notifier")
            .field("store", &self.store)
            .field("listeners", &self.listeners.read().len())
            .field("open", &queue.sender.is_some())
            .field("running", &(queue.sender.is_some() && queue.receiver.is_none()))
            .finish()
    }
}

impl<K: Send + Sync + 'static> Notifier<K> {
    pub(crate) fn new(store: Arc<str>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            store,
            listeners: Arc::default(),
            queue: Mutex::new(Queue {
                sender: Some(sender),
                receiver: Some(receiver),
            }),
        }
    }

    /// Adds a listener, starting the notifier task on the current tokio runtime if needed.
    pub(crate) fn subscribe(&self, listener: Arc<dyn CacheListener<K>>) -> Result<(), Error> {
        let mut queue = self.queue.lock();
        if queue.sender.is_none() {
            return Err(Error::illegal_state(format!("notifier of store '{}' is closed", self.store)));
        }

        if queue.receiver.is_some() {
            let handle = Handle::try_current().map_err(Error::illegal_state)?;
            if let Some(receiver) = queue.receiver.take() {
                handle.spawn(deliver(Arc::clone(&self.store), Arc::clone(&self.listeners), receiver));
            }
        }

        self.listeners.write().push(listener);
        Ok(())
    }

    /// Removes a listener by identity; returns whether it was registered.
    pub(crate) fn unsubscribe(&self, listener: &Arc<dyn CacheListener<K>>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|registered| !Arc::ptr_eq(registered, listener));
        listeners.len() != before
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Queues events for delivery; never blocks on listeners.
    pub(crate) fn publish(&self, events: Vec<CacheEvent<K>>) {
        if events.is_empty() || self.listeners.read().is_empty() {
            return;
        }

        let queue = self.queue.lock();
        let Some(sender) = queue.sender.as_ref() else {
            return;
        };
        for event in events {
            if sender.send(event).is_err() {
                break;
            }
        }
    }

    /// Stops accepting events and forgets every listener; queued events are still delivered.
    pub(crate) fn close(&self) {
        let mut queue = self.queue.lock();
        queue.sender = None;
        queue.receiver = None;
        drop(queue);
        self.listeners.write().clear();
    }
}

async fn deliver<K: 'static>(store: Arc<str>, listeners: Listeners<K>, mut events: UnboundedReceiver<CacheEvent<K>>) {
    while let Some(event) = events.recv().await {
        let snapshot = listeners.read().clone();
        for listener in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| event.dispatch(listener.as_ref()))).is_err() {
                tracing::event!(
                    name: "toolkit.listener.panicked",
                    tracing::Level::ERROR,
                    store.name = &*store,
                    event.kind = event.as_str(),
                );
            }
        }
    }
}
