//! Batch history fetch: per-channel scan and concurrent fan-out across channels.

use crate::feed::record::{normalize, MessageRecord};
use crate::feed::terms::TermSet;
use crate::telegram::{ClientError, TelegramClient};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::StreamExt;

/// Why a channel scan stopped.
#[derive(Debug)]
pub enum ScanStop {
    /// History (or the count limit) ran out.
    Exhausted,
    /// Reached a message older than the boundary.
    Boundary,
    /// The handle did not resolve; nothing was scanned.
    Unresolved(ClientError),
    /// The client failed mid-scan; records gathered so far are kept.
    Interrupted(ClientError),
}

impl ScanStop {
    /// True unless the scan hit an error that is not part of normal operation.
    pub fn is_expected(&self) -> bool {
        match self {
            ScanStop::Exhausted | ScanStop::Boundary | ScanStop::Unresolved(_) => true,
            ScanStop::Interrupted(e) => e.is_expected(),
        }
    }
}

/// Result of scanning one channel. Always carries whatever was collected.
#[derive(Debug)]
pub struct ScanOutcome {
    pub handle: String,
    pub records: Vec<MessageRecord>,
    pub stop: ScanStop,
}

/// One `/fetch` request after validation.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub handles: Vec<String>,
    /// Messages strictly older than this end the scan.
    pub since: DateTime<Utc>,
    /// Upper bound on messages iterated per channel.
    pub limit: Option<usize>,
    pub terms: TermSet,
}

/// Scan one channel newest-first until the boundary, the limit, or an error.
///
/// History is assumed to arrive in non-increasing date order, so the first message older than
/// `since` ends the scan. Messages without a date are never treated as crossing the boundary.
pub async fn fetch_channel(
    client: &dyn TelegramClient,
    handle: &str,
    since: DateTime<Utc>,
    limit: Option<usize>,
    terms: &TermSet,
) -> ScanOutcome {
    let handle = handle.trim().to_string();
    let channel = match client.resolve(&handle).await {
        Ok(c) => c,
        Err(e) => {
            return ScanOutcome {
                handle,
                records: Vec::new(),
                stop: ScanStop::Unresolved(e),
            }
        }
    };

    let mut records = Vec::new();
    let mut history = client.history(&channel, limit);
    let stop = loop {
        let message = match history.next().await {
            None => break ScanStop::Exhausted,
            Some(Err(e)) => break ScanStop::Interrupted(e),
            Some(Ok(m)) => m,
        };
        if let Some(date) = message.date {
            if date.to_utc() < since {
                break ScanStop::Boundary;
            }
        }
        let Some(mut record) = normalize(&channel, &message) else {
            continue;
        };
        let Some(hit) = terms.filter(&record.text) else {
            continue;
        };
        record.matched_terms = hit;
        records.push(record);
    };

    ScanOutcome {
        handle,
        records,
        stop,
    }
}

/// Newest first; records without a date go last. Stable for equal dates.
pub fn sort_newest_first(records: &mut [MessageRecord]) {
    records.sort_by(|a, b| b.date.cmp(&a.date));
}

/// Scan every requested channel concurrently and merge the results newest-first.
/// A failing channel contributes whatever it gathered and never affects the others.
pub async fn fetch_all(client: &dyn TelegramClient, req: &FetchRequest) -> Vec<MessageRecord> {
    let scans = req
        .handles
        .iter()
        .map(|h| fetch_channel(client, h, req.since, req.limit, &req.terms));
    let outcomes = join_all(scans).await;

    let mut merged = Vec::new();
    for outcome in outcomes {
        if outcome.stop.is_expected() {
            log::debug!(
                "fetch {}: {} record(s), stopped: {:?}",
                outcome.handle,
                outcome.records.len(),
                outcome.stop
            );
        } else {
            log::warn!(
                "fetch {}: scan interrupted after {} record(s): {:?}",
                outcome.handle,
                outcome.records.len(),
                outcome.stop
            );
        }
        merged.extend(outcome.records);
    }
    sort_newest_first(&mut merged);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::{MemoryClient, RawMessage};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn msg(id: i64, hours_ago: i64, text: &str) -> RawMessage {
        RawMessage {
            id,
            date: Some((now() - Duration::hours(hours_ago)).into()),
            text: Some(text.to_string()),
        }
    }

    fn request(handles: &[&str], days: i64, limit: Option<usize>, q: Option<&str>) -> FetchRequest {
        FetchRequest {
            handles: handles.iter().map(|h| h.to_string()).collect(),
            since: now() - Duration::days(days),
            limit,
            terms: TermSet::parse(q),
        }
    }

    #[tokio::test]
    async fn boundary_stops_the_scan() {
        let client = MemoryClient::new();
        client.add_channel(1, "a");
        client.set_history(
            "a",
            vec![
                msg(3, 1, "fresh"),
                msg(2, 24 * 3, "too old"),
                // Never reached: the scan stops at the first message past the boundary.
                msg(1, 2, "out of order"),
            ],
        );
        let out = fetch_channel(&client, "@a", now() - Duration::days(2), None, &TermSet::default()).await;
        assert!(matches!(out.stop, ScanStop::Boundary));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].message_id, 3);
    }

    #[tokio::test]
    async fn limit_bounds_iterated_messages() {
        let client = MemoryClient::new();
        client.add_channel(1, "a");
        client.set_history(
            "a",
            vec![msg(4, 1, "one"), msg(3, 2, "  "), msg(2, 3, "three"), msg(1, 4, "four")],
        );
        let out = fetch_channel(&client, "a", now() - Duration::days(7), Some(3), &TermSet::default()).await;
        assert!(matches!(out.stop, ScanStop::Exhausted));
        let ids: Vec<i64> = out.records.iter().map(|r| r.message_id).collect();
        assert_eq!(ids, vec![4, 2]);
    }

    #[tokio::test]
    async fn flood_wait_keeps_partial_results() {
        let client = MemoryClient::new();
        client.add_channel(1, "a");
        client.set_history("a", vec![msg(3, 1, "one"), msg(2, 2, "two"), msg(1, 3, "three")]);
        client.fail_history_after("a", 2, ClientError::FloodWait { seconds: 30 });
        let out = fetch_channel(&client, "a", now() - Duration::days(7), None, &TermSet::default()).await;
        assert!(matches!(out.stop, ScanStop::Interrupted(ClientError::FloodWait { .. })));
        assert!(out.stop.is_expected());
        assert_eq!(out.records.len(), 2);
    }

    #[tokio::test]
    async fn access_denied_mid_scan_keeps_partial_results() {
        let client = MemoryClient::new();
        client.add_channel(1, "a");
        client.set_history("a", vec![msg(3, 1, "one"), msg(2, 2, "two"), msg(1, 3, "three")]);
        client.fail_history_after("a", 1, ClientError::AccessDenied("CHANNEL_PRIVATE".into()));
        let out = fetch_channel(&client, "a", now() - Duration::days(7), None, &TermSet::default()).await;
        assert!(matches!(out.stop, ScanStop::Interrupted(ClientError::AccessDenied(_))));
        assert!(out.stop.is_expected());
        let ids: Vec<i64> = out.records.iter().map(|r| r.message_id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[tokio::test]
    async fn unresolved_channel_yields_nothing() {
        let client = MemoryClient::new();
        let out = fetch_channel(&client, "@missing", now(), None, &TermSet::default()).await;
        assert!(matches!(out.stop, ScanStop::Unresolved(ClientError::NotFound(_))));
        assert!(out.records.is_empty());
    }

    #[tokio::test]
    async fn fan_out_merges_filters_and_skips_bad_channels() {
        let client = MemoryClient::new();
        client.add_channel(1, "a");
        client.add_channel(2, "c");
        client.set_history("a", vec![msg(11, 5, "Elon on stage"), msg(10, 6, "weather")]);
        client.set_history("c", vec![msg(21, 1, "ELON again"), msg(20, 9, "elon earlier")]);

        let records = fetch_all(&client, &request(&["@a", "@b", "@c"], 7, None, Some("Elon"))).await;
        let ids: Vec<i64> = records.iter().map(|r| r.message_id).collect();
        assert_eq!(ids, vec![21, 11, 20]);
        assert!(records.iter().all(|r| r.matched_terms == vec!["Elon".to_string()]));
    }

    #[tokio::test]
    async fn no_terms_means_no_filtering() {
        let client = MemoryClient::new();
        client.add_channel(1, "a");
        client.set_history("a", vec![msg(2, 1, "first"), msg(1, 2, "second")]);
        let records = fetch_all(&client, &request(&["a"], 1, None, None)).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.matched_terms.is_empty()));
    }

    #[test]
    fn undated_records_sort_last() {
        let rec = |id: i64, date: Option<DateTime<Utc>>| MessageRecord {
            channel: None,
            channel_id: None,
            message_id: id,
            date,
            text: "x".to_string(),
            matched_terms: Vec::new(),
        };
        let mut records = vec![
            rec(1, None),
            rec(2, Some(now() - Duration::hours(2))),
            rec(3, Some(now())),
            rec(4, None),
        ];
        sort_newest_first(&mut records);
        let ids: Vec<i64> = records.iter().map(|r| r.message_id).collect();
        assert_eq!(ids, vec![3, 2, 1, 4]);
    }
}
