//! Event hub: scoped listeners for live channel events.
//!
//! The protocol adapter pushes every new-message / edit update into the hub with
//! [`EventHub::dispatch`]; each live connection holds a [`Subscription`] filtered to its own
//! channel set. Dropping the subscription removes the listener.

use crate::telegram::client::{ChannelRef, ClientError, RawMessage};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

/// Kind of live event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    Edit,
}

impl EventKind {
    /// Wire name used in the `type` field of live frames.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewMessage => "new_message",
            EventKind::Edit => "edit",
        }
    }
}

/// Which event kinds a listener wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKinds {
    pub new_messages: bool,
    pub edits: bool,
}

impl EventKinds {
    pub const NEW_MESSAGES: Self = Self {
        new_messages: true,
        edits: false,
    };

    pub fn with_edits(edits: bool) -> Self {
        Self {
            new_messages: true,
            edits,
        }
    }

    pub fn accepts(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::NewMessage => self.new_messages,
            EventKind::Edit => self.edits,
        }
    }
}

/// One update on one channel.
#[derive(Debug, Clone)]
pub struct ChannelEvent {
    pub kind: EventKind,
    pub channel: ChannelRef,
    pub message: RawMessage,
}

pub type SubscriptionId = u64;

struct Listener {
    channels: HashSet<i64>,
    kinds: EventKinds,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Default)]
struct HubState {
    listeners: HashMap<SubscriptionId, Listener>,
    closed: bool,
}

/// Registry of live listeners keyed by subscription id. Shared by the adapter and handlers.
pub struct EventHub {
    /// Blocking lock: `Subscription::drop` unsubscribes synchronously.
    inner: RwLock<HubState>,
    next_id: AtomicU64,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HubState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for `channels`. Fails once the hub is closed.
    pub fn subscribe(
        self: &Arc<Self>,
        channels: &[ChannelRef],
        kinds: EventKinds,
    ) -> Result<Subscription, ClientError> {
        if channels.is_empty() {
            return Err(ClientError::Request("no channels to subscribe to".to_string()));
        }
        let mut g = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if g.closed {
            return Err(ClientError::Disconnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        g.listeners.insert(
            id,
            Listener {
                channels: channels.iter().map(|c| c.id).collect(),
                kinds,
                tx,
            },
        );
        log::debug!(
            "event hub: subscription {} added ({} channel(s), {} active)",
            id,
            channels.len(),
            g.listeners.len()
        );
        Ok(Subscription {
            id,
            hub: Arc::clone(self),
            rx,
        })
    }

    /// Remove a listener. Returns false when it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut g = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let removed = g.listeners.remove(&id).is_some();
        if removed {
            log::debug!(
                "event hub: subscription {} removed ({} active)",
                id,
                g.listeners.len()
            );
        }
        removed
    }

    /// Deliver an event to every listener scoped to its channel and kind.
    /// Returns the number of listeners it was queued for.
    pub fn dispatch(&self, event: ChannelEvent) -> usize {
        let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        for listener in g.listeners.values() {
            if !listener.kinds.accepts(event.kind) || !listener.channels.contains(&event.channel.id) {
                continue;
            }
            if listener.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop every listener and refuse new ones. Open subscriptions observe end-of-stream.
    pub fn close(&self) {
        let mut g = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        g.closed = true;
        g.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).closed
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }
}

/// Scoped listener registration. Unsubscribes from the hub exactly once, on drop.
pub struct Subscription {
    id: SubscriptionId,
    hub: Arc<EventHub>,
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event for this listener; `None` once the hub has been closed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
