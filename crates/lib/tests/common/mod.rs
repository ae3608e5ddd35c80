//! Shared helpers: start the gateway on an ephemeral port with an in-memory client.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tgfeed::config::Config;
use tgfeed::gateway::{self, ClientSlot, GatewayState, SharedKey};
use tgfeed::telegram::{MemoryClient, RawMessage};

pub const KEY: &str = "test-key-228";

/// Start the gateway with the given config and client slot; returns the bound address.
/// The server task is left running when the test ends.
pub async fn start_gateway_with(config: Config, slot: ClientSlot) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    let state = GatewayState::new(config, SharedKey::new(KEY), slot);
    tokio::spawn(async move {
        let _ = gateway::serve(listener, state, std::future::pending()).await;
    });
    addr
}

pub async fn start_gateway(client: Arc<MemoryClient>) -> SocketAddr {
    start_gateway_with(Config::default(), ClientSlot::new(client)).await
}

/// Message posted `hours_ago` hours before now.
pub fn msg(id: i64, hours_ago: i64, text: &str) -> RawMessage {
    RawMessage {
        id,
        date: Some((Utc::now() - Duration::hours(hours_ago)).into()),
        text: Some(text.to_string()),
    }
}

/// Wait until the client's hub has exactly `n` live listeners.
pub async fn wait_for_listeners(client: &MemoryClient, n: usize) {
    for _ in 0..250 {
        if client.hub().listener_count() == n {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!(
        "expected {} listener(s), found {}",
        n,
        client.hub().listener_count()
    );
}
