//! Telegram side of the gateway: the protocol client contract, live event hub,
//! and an in-process client.
//!
//! Handlers never talk to MTProto directly; they receive an `Arc<dyn TelegramClient>`
//! and register live listeners through the [`EventHub`].

mod client;
mod events;
mod memory;

pub use client::{
    normalize_handle, ChannelRef, ClientError, MessageStream, RawDate, RawMessage, TelegramClient,
};
pub use events::{
    ChannelEvent, EventHub, EventKind, EventKinds, Subscription, SubscriptionId,
};
pub use memory::MemoryClient;
