//! In-process client backed by fixed channel histories. Used by the test suites and for
//! running the gateway without a Telegram account.

use crate::telegram::client::{
    normalize_handle, ChannelRef, ClientError, MessageStream, RawMessage, TelegramClient,
};
use crate::telegram::events::{ChannelEvent, EventHub, EventKind, EventKinds, Subscription};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

struct MemoryChannel {
    channel: ChannelRef,
    /// Delivered as-is by `history`, so callers keep it newest-first.
    messages: Vec<RawMessage>,
    /// Yield this many messages, then the error.
    failure: Option<(usize, ClientError)>,
}

/// Client whose channels and histories are set up by the caller.
pub struct MemoryClient {
    channels: RwLock<HashMap<String, MemoryChannel>>,
    hub: Arc<EventHub>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            hub: Arc::new(EventHub::new()),
        }
    }

    /// Register a channel reachable as `@username`. Replaces any previous channel of that name.
    pub fn add_channel(&self, id: i64, username: &str) -> ChannelRef {
        let username = normalize_handle(username).to_string();
        let channel = ChannelRef::new(id, Some(username.clone()));
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                username.to_lowercase(),
                MemoryChannel {
                    channel: channel.clone(),
                    messages: Vec::new(),
                    failure: None,
                },
            );
        channel
    }

    /// Replace the channel's history. Messages are yielded in the given order.
    pub fn set_history(&self, username: &str, messages: Vec<RawMessage>) {
        self.with_channel(username, |c| c.messages = messages);
    }

    /// Make history iteration fail with `error` after `after` messages.
    pub fn fail_history_after(&self, username: &str, after: usize, error: ClientError) {
        self.with_channel(username, |c| c.failure = Some((after, error)));
    }

    /// The hub live subscriptions are registered with.
    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Publish a live event on a registered channel. Returns the number of listeners reached.
    pub fn emit(&self, kind: EventKind, username: &str, message: RawMessage) -> usize {
        let key = normalize_handle(username).to_lowercase();
        let channel = {
            let g = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            match g.get(&key) {
                Some(c) => c.channel.clone(),
                None => return 0,
            }
        };
        self.hub.dispatch(ChannelEvent {
            kind,
            channel,
            message,
        })
    }

    fn with_channel(&self, username: &str, f: impl FnOnce(&mut MemoryChannel)) {
        let key = normalize_handle(username).to_lowercase();
        let mut g = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        match g.get_mut(&key) {
            Some(c) => f(c),
            None => log::debug!("memory client: no channel {}", key),
        }
    }
}

#[async_trait]
impl TelegramClient for MemoryClient {
    async fn resolve(&self, handle: &str) -> Result<ChannelRef, ClientError> {
        let key = normalize_handle(handle).to_lowercase();
        let g = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        g.get(&key)
            .map(|c| c.channel.clone())
            .ok_or_else(|| ClientError::NotFound(handle.to_string()))
    }

    fn history(&self, channel: &ChannelRef, limit: Option<usize>) -> MessageStream {
        let g = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        let Some(c) = g.values().find(|c| c.channel.id == channel.id) else {
            return futures_util::stream::empty().boxed();
        };
        let mut items: Vec<Result<RawMessage, ClientError>> = match &c.failure {
            Some((after, err)) => {
                let mut v: Vec<_> = c.messages.iter().take(*after).cloned().map(Ok).collect();
                v.push(Err(err.clone()));
                v
            }
            None => c.messages.iter().cloned().map(Ok).collect(),
        };
        if let Some(n) = limit {
            items.truncate(n);
        }
        futures_util::stream::iter(items).boxed()
    }

    fn subscribe(
        &self,
        channels: &[ChannelRef],
        kinds: EventKinds,
    ) -> Result<Subscription, ClientError> {
        self.hub.subscribe(channels, kinds)
    }

    async fn disconnect(&self) {
        self.hub.close();
    }
}
