//! Canonical message record and normalization from raw protocol messages.

use crate::telegram::{ChannelRef, RawMessage};
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Serialize, Serializer};

/// One message as returned by `/fetch` and pushed on `/ws`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub channel: Option<String>,
    pub channel_id: Option<i64>,
    pub message_id: i64,
    /// UTC, serialized as ISO-8601 with a `+00:00` offset; `null` when the source had none.
    #[serde(serialize_with = "serialize_iso")]
    pub date: Option<DateTime<Utc>>,
    /// Never empty.
    pub text: String,
    pub matched_terms: Vec<String>,
}

/// ISO-8601 in UTC with an explicit `+00:00` offset; microseconds only when present.
pub fn iso(dt: &DateTime<Utc>) -> String {
    let format = if dt.nanosecond() / 1_000 == 0 {
        SecondsFormat::Secs
    } else {
        SecondsFormat::Micros
    };
    dt.to_rfc3339_opts(format, false)
}

fn serialize_iso<S: Serializer>(date: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
    match date {
        Some(dt) => s.serialize_str(&iso(dt)),
        None => s.serialize_none(),
    }
}

/// Trimmed message text; empty when the message carries none.
pub fn text_of(message: &RawMessage) -> &str {
    message.text.as_deref().unwrap_or("").trim()
}

/// Build a record for `message` posted in `channel`. Returns `None` when the text is empty after
/// trimming. `matched_terms` starts empty; the caller fills it from the term matcher.
pub fn normalize(channel: &ChannelRef, message: &RawMessage) -> Option<MessageRecord> {
    let text = text_of(message);
    if text.is_empty() {
        return None;
    }
    Some(MessageRecord {
        channel: channel.username.clone(),
        channel_id: Some(channel.id),
        message_id: message.id,
        date: message.date.map(|d| d.to_utc()),
        text: text.to_string(),
        matched_terms: Vec::new(),
    })
}
