//! Integration tests for `GET /fetch` and `GET /` against a real server with an in-memory client.

mod common;

use chrono::{DateTime, Duration, Utc};
use common::{msg, start_gateway, start_gateway_with, KEY};
use std::sync::Arc;
use tgfeed::config::Config;
use tgfeed::gateway::ClientSlot;
use tgfeed::telegram::{ClientError, MemoryClient, RawMessage};

async fn get_json(url: &str) -> (u16, serde_json::Value) {
    let resp = reqwest::get(url).await.expect("request");
    let status = resp.status().as_u16();
    let body = resp.json().await.expect("parse JSON");
    (status, body)
}

#[tokio::test]
async fn fetch_skips_unresolvable_channel_and_filters_terms() {
    let client = Arc::new(MemoryClient::new());
    client.add_channel(100, "a");
    client.set_history(
        "a",
        vec![msg(2, 1, "Elon Musk announces"), msg(1, 2, "Weather update")],
    );
    let addr = start_gateway(client).await;

    let url = format!(
        "http://{}/fetch?channels=@a,@b&days=7&q=Elon&key={}",
        addr, KEY
    );
    let (status, body) = get_json(&url).await;
    assert_eq!(status, 200);
    let records = body.as_array().expect("array body");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["channel"], "a");
    assert_eq!(records[0]["channel_id"], 100);
    assert_eq!(records[0]["message_id"], 2);
    assert_eq!(records[0]["text"], "Elon Musk announces");
    assert_eq!(records[0]["matched_terms"], serde_json::json!(["Elon"]));
}

#[tokio::test]
async fn fetch_respects_lookback_window() {
    let client = Arc::new(MemoryClient::new());
    client.add_channel(1, "a");
    client.set_history(
        "a",
        vec![msg(3, 1, "today"), msg(2, 30, "yesterday"), msg(1, 24 * 5, "last week")],
    );
    let addr = start_gateway(client).await;
    let floor = Utc::now() - Duration::days(2);

    let url = format!("http://{}/fetch?channels=a&days=2&key={}", addr, KEY);
    let (status, body) = get_json(&url).await;
    assert_eq!(status, 200);
    let records = body.as_array().expect("array body");
    assert_eq!(records.len(), 2);
    for r in records {
        let date = r["date"].as_str().expect("date string");
        let date: DateTime<Utc> = DateTime::parse_from_rfc3339(date)
            .expect("rfc3339 date")
            .with_timezone(&Utc);
        assert!(date >= floor);
        assert!(r["matched_terms"].as_array().expect("terms").is_empty());
    }
}

#[tokio::test]
async fn fetch_merges_channels_newest_first_with_undated_last() {
    let client = Arc::new(MemoryClient::new());
    client.add_channel(1, "a");
    client.add_channel(2, "b");
    client.set_history("a", vec![msg(11, 3, "a-3h"), msg(10, 10, "a-10h")]);
    client.set_history(
        "b",
        vec![
            RawMessage {
                id: 22,
                date: None,
                text: Some("b-undated".into()),
            },
            msg(21, 1, "b-1h"),
            msg(20, 5, "b-5h"),
        ],
    );
    let addr = start_gateway(client).await;

    let url = format!("http://{}/fetch?channels=@a,@b&key={}", addr, KEY);
    let (status, body) = get_json(&url).await;
    assert_eq!(status, 200);
    let texts: Vec<&str> = body
        .as_array()
        .expect("array body")
        .iter()
        .map(|r| r["text"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(texts, vec!["b-1h", "a-3h", "b-5h", "a-10h", "b-undated"]);
}

#[tokio::test]
async fn fetch_returns_partial_results_when_rate_limited() {
    let client = Arc::new(MemoryClient::new());
    client.add_channel(1, "a");
    client.set_history("a", vec![msg(3, 1, "one"), msg(2, 2, "two"), msg(1, 3, "three")]);
    client.fail_history_after("a", 1, ClientError::FloodWait { seconds: 120 });
    let addr = start_gateway(client).await;

    let url = format!("http://{}/fetch?channels=a&key={}", addr, KEY);
    let (status, body) = get_json(&url).await;
    assert_eq!(status, 200);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn fetch_limit_caps_messages_per_channel() {
    let client = Arc::new(MemoryClient::new());
    client.add_channel(1, "a");
    client.set_history("a", (1..=10).rev().map(|i| msg(i, 11 - i, "news")).collect());
    let addr = start_gateway(client).await;

    let url = format!("http://{}/fetch?channels=a&limit=4&key={}", addr, KEY);
    let (status, body) = get_json(&url).await;
    assert_eq!(status, 200);
    assert_eq!(body.as_array().map(Vec::len), Some(4));
}

#[tokio::test]
async fn fetch_rejects_bad_key() {
    let client = Arc::new(MemoryClient::new());
    let addr = start_gateway(client).await;

    let (status, body) = get_json(&format!("http://{}/fetch?channels=a&key=nope", addr)).await;
    assert_eq!(status, 401);
    assert!(body["detail"].as_str().is_some());

    let (status, _) = get_json(&format!("http://{}/fetch?channels=a", addr)).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn fetch_requires_channels() {
    let client = Arc::new(MemoryClient::new());
    let addr = start_gateway(client).await;

    let (status, _) = get_json(&format!("http://{}/fetch?channels=%20,%20&key={}", addr, KEY)).await;
    assert_eq!(status, 400);
    let (status, _) = get_json(&format!("http://{}/fetch?key={}", addr, KEY)).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn fetch_rejects_out_of_range_params() {
    let client = Arc::new(MemoryClient::new());
    let addr = start_gateway(client).await;

    for query in ["days=0", "days=366", "limit=0", "limit=2001", "days=abc"] {
        let url = format!("http://{}/fetch?channels=a&{}&key={}", addr, query, KEY);
        let (status, _) = get_json(&url).await;
        assert_eq!(status, 422, "query {}", query);
    }
}

#[tokio::test]
async fn fetch_without_client_is_server_error() {
    let addr = start_gateway_with(Config::default(), ClientSlot::empty()).await;

    let url = format!("http://{}/fetch?channels=a&key={}", addr, KEY);
    let (status, body) = get_json(&url).await;
    assert_eq!(status, 500);
    assert_eq!(body["detail"], "Telegram client not ready.");
}

#[tokio::test]
async fn health_reports_client_state() {
    let client = Arc::new(MemoryClient::new());
    let addr = start_gateway(client).await;
    let (status, body) = get_json(&format!("http://{}/", addr)).await;
    assert_eq!(status, 200);
    assert_eq!(body["runtime"], "running");
    assert_eq!(body["client"], "ready");

    let addr = start_gateway_with(Config::default(), ClientSlot::empty()).await;
    let (_, body) = get_json(&format!("http://{}/", addr)).await;
    assert_eq!(body["client"], "unavailable");
}
