//! Gateway wire types: query parameters and live WebSocket frames.

use crate::feed::MessageRecord;
use serde::{Deserialize, Serialize};

/// Close code sent for a bad key or a request without channels.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code sent when the feed cannot be set up (no client, nothing resolvable).
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Close code sent when the event source goes away (shutdown, lost connection).
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_NORMAL: u16 = 1000;

/// `GET /fetch` query. Numeric params are kept as strings and range-checked by the handler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchQuery {
    /// Comma-separated handles, e.g. `@bbcbreaking,@reuters`.
    pub channels: Option<String>,
    /// Lookback window in days (1..=365, default 7).
    pub days: Option<String>,
    /// Comma-separated search terms.
    pub q: Option<String>,
    /// Max messages iterated per channel (1..=2000).
    pub limit: Option<String>,
    pub key: Option<String>,
}

/// `GET /ws` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveQuery {
    pub channels: Option<String>,
    pub q: Option<String>,
    pub key: Option<String>,
    /// `true`/`1` to also stream edits, `false`/`0` to suppress them.
    pub edits: Option<String>,
}

impl LiveQuery {
    /// Whether this connection wants edit events; unrecognised values keep the default.
    pub fn edits_enabled(&self, default: bool) -> bool {
        match self
            .edits
            .as_deref()
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            _ => default,
        }
    }
}

/// Non-record frame: `{"warning": ...}` or `{"error": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Notice {
    Warning(String),
    Error(String),
}

/// Record frame: the message record plus `"type": "new_message" | "edit"`.
#[derive(Debug, Serialize)]
pub struct LiveFrame<'a> {
    #[serde(flatten)]
    pub record: &'a MessageRecord,
    #[serde(rename = "type")]
    pub typ: &'static str,
}
