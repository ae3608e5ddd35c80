//! Protocol client contract: handle resolution, history iteration, live subscriptions.
//!
//! The gateway only talks to Telegram through [`TelegramClient`]. The MTProto adapter crate
//! implements it for production; [`crate::telegram::MemoryClient`] implements it in-process.

use crate::telegram::events::{EventKinds, Subscription};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use futures_util::stream::BoxStream;

/// Resolved channel identity. Opaque to callers apart from the display fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: i64,
    /// Public username without the leading `@`, when the channel has one.
    pub username: Option<String>,
    pub title: Option<String>,
    /// Adapter-private bytes needed to address the channel again (e.g. packed peer + access hash).
    pub peer: Vec<u8>,
}

impl ChannelRef {
    pub fn new(id: i64, username: Option<String>) -> Self {
        Self {
            id,
            username,
            title: None,
            peer: Vec::new(),
        }
    }

    /// Short label for logs and warnings.
    pub fn label(&self) -> String {
        match &self.username {
            Some(u) => format!("@{}", u),
            None => self.id.to_string(),
        }
    }
}

/// Timestamp as delivered by the protocol; some sources omit the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawDate {
    Zoned(DateTime<FixedOffset>),
    /// No zone attached; treated as UTC.
    Naive(NaiveDateTime),
}

impl RawDate {
    pub fn to_utc(self) -> DateTime<Utc> {
        match self {
            RawDate::Zoned(dt) => dt.with_timezone(&Utc),
            RawDate::Naive(naive) => Utc.from_utc_datetime(&naive),
        }
    }
}

impl From<DateTime<Utc>> for RawDate {
    fn from(dt: DateTime<Utc>) -> Self {
        RawDate::Zoned(dt.fixed_offset())
    }
}

/// A channel message as the client hands it over, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: i64,
    pub date: Option<RawDate>,
    pub text: Option<String>,
}

/// Errors raised by a [`TelegramClient`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("cannot resolve {0}")]
    NotFound(String),
    #[error("rate limited: retry after {seconds}s")]
    FloodWait { seconds: u32 },
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("session is not authorized")]
    Unauthorized,
    #[error("client disconnected")]
    Disconnected,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl ClientError {
    /// Conditions that routinely end a scan early and are not worth more than a debug line.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ClientError::NotFound(_) | ClientError::FloodWait { .. } | ClientError::AccessDenied(_)
        )
    }
}

/// Newest-first message history for one channel.
pub type MessageStream = BoxStream<'static, Result<RawMessage, ClientError>>;

/// The shared protocol client. One instance serves the whole process.
#[async_trait]
pub trait TelegramClient: Send + Sync {
    /// Look up a channel by handle (already trimmed).
    async fn resolve(&self, handle: &str) -> Result<ChannelRef, ClientError>;

    /// Iterate the channel's history newest-first. `limit` caps the number of messages the
    /// underlying iteration yields.
    fn history(&self, channel: &ChannelRef, limit: Option<usize>) -> MessageStream;

    /// Register a listener for events on exactly `channels`. Dropping the returned
    /// [`Subscription`] unregisters it.
    fn subscribe(
        &self,
        channels: &[ChannelRef],
        kinds: EventKinds,
    ) -> Result<Subscription, ClientError>;

    /// Release the protocol connection. Called once on shutdown.
    async fn disconnect(&self);
}

/// Reduce user input (`@name`, `t.me/name`, `https://t.me/name`) to the bare username.
pub fn normalize_handle(handle: &str) -> &str {
    let h = handle.trim();
    let h = h
        .strip_prefix("https://")
        .or_else(|| h.strip_prefix("http://"))
        .unwrap_or(h);
    let h = h.strip_prefix("t.me/").unwrap_or(h);
    let h = h.strip_prefix('@').unwrap_or(h);
    h.trim_end_matches('/')
}
