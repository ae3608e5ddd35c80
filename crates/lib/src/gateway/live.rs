//! `GET /ws`: live feed of new (and optionally edited) channel messages.
//!
//! Lifecycle per connection: check key, parse params, resolve channels once, register one
//! scoped subscription, forward matching records until either side goes away. The
//! subscription is dropped before the socket is closed on every exit path.

use crate::feed::{normalize, split_csv, TermSet};
use crate::gateway::protocol::{
    LiveFrame, LiveQuery, Notice, CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL,
    CLOSE_POLICY_VIOLATION,
};
use crate::gateway::server::GatewayState;
use crate::telegram::{ChannelEvent, EventKinds, Subscription};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Serialize;
use std::borrow::Cow;
use std::time::Duration;

const PEER_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// GET /ws upgrades to WebSocket; the key is checked after the upgrade so a mismatch can be
/// reported with close code 1008.
pub(crate) async fn ws_handler(
    State(state): State<GatewayState>,
    Query(query): Query<LiveQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

/// Socket plus the closed flag. Once closed, pushes are dropped and close is a no-op.
struct LiveSession {
    socket: WebSocket,
    closed: bool,
}

impl LiveSession {
    fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            closed: false,
        }
    }

    /// Best-effort send of one JSON frame. A failed send marks the session closed.
    async fn push<T: Serialize>(&mut self, payload: &T) {
        if self.closed {
            return;
        }
        let text = match serde_json::to_string(payload) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("ws: failed to encode frame: {}", e);
                return;
            }
        };
        if self.socket.send(Message::Text(text)).await.is_err() {
            log::debug!("ws: send failed, closing session");
            self.closed = true;
        }
    }

    /// Finish a close handshake the client started: keep reading so the queued close reply is
    /// flushed, until the peer drops the connection.
    async fn finish_peer_close(&mut self) {
        let drain = async {
            while let Some(Ok(_)) = self.socket.recv().await {}
        };
        if tokio::time::timeout(PEER_CLOSE_GRACE, drain).await.is_err() {
            log::debug!("ws: peer did not finish the close handshake");
        }
    }

    async fn close(&mut self, code: u16, reason: &'static str) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        };
        let _ = self.socket.send(Message::Close(Some(frame))).await;
    }

    /// Send an error frame, then close.
    async fn fail(&mut self, message: impl Into<String>, code: u16, reason: &'static str) {
        self.push(&Notice::Error(message.into())).await;
        self.close(code, reason).await;
    }
}

async fn handle_socket(socket: WebSocket, state: GatewayState, query: LiveQuery) {
    let mut session = LiveSession::new(socket);

    if !state.key.verify(query.key.as_deref()) {
        log::debug!("ws: rejected connection with invalid key");
        session.close(CLOSE_POLICY_VIOLATION, "unauthorized").await;
        return;
    }

    let handles = split_csv(query.channels.as_deref().unwrap_or(""));
    if handles.is_empty() {
        session
            .fail(
                "Provide at least one channel via ?channels=@a,@b",
                CLOSE_POLICY_VIOLATION,
                "no channels",
            )
            .await;
        return;
    }
    let terms = TermSet::parse(query.q.as_deref());
    let kinds = EventKinds::with_edits(query.edits_enabled(state.config.live.stream_edits));

    let Some(client) = state.client.get().await else {
        session
            .fail("Telegram client not ready.", CLOSE_INTERNAL_ERROR, "client not ready")
            .await;
        return;
    };

    let mut channels = Vec::with_capacity(handles.len());
    for handle in &handles {
        match client.resolve(handle).await {
            Ok(channel) => channels.push(channel),
            Err(e) => {
                log::debug!("ws: cannot resolve {}: {}", handle, e);
                session
                    .push(&Notice::Warning(format!("Cannot access/resolve {}", handle)))
                    .await;
            }
        }
    }
    if channels.is_empty() {
        session
            .fail("No resolvable channels", CLOSE_INTERNAL_ERROR, "no resolvable channels")
            .await;
        return;
    }

    let subscription = match client.subscribe(&channels, kinds) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("ws: subscribe failed: {}", e);
            session
                .fail(format!("Subscribe failed: {}", e), CLOSE_INTERNAL_ERROR, "subscribe failed")
                .await;
            return;
        }
    };
    log::debug!(
        "ws: subscription {} streaming {} channel(s), {} term(s), edits: {}",
        subscription.id(),
        channels.len(),
        terms.terms().len(),
        kinds.edits
    );

    stream(&mut session, subscription, &terms).await;
}

/// Forward events until the client leaves, a push fails, or the event source closes.
/// Owns the subscription so it is unregistered before the socket is closed.
async fn stream(session: &mut LiveSession, mut subscription: Subscription, terms: &TermSet) {
    let mut close_code = CLOSE_NORMAL;
    let mut peer_closed = false;
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    log::debug!("ws: event source closed");
                    close_code = CLOSE_GOING_AWAY;
                    break;
                };
                forward(session, &event, terms).await;
                if session.closed {
                    break;
                }
            }
            msg = session.socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) => {
                        log::debug!("ws: client closed the connection");
                        session.closed = true;
                        peer_closed = true;
                        break;
                    }
                    Some(Err(_)) | None => {
                        log::debug!("ws: client disconnected");
                        session.closed = true;
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    let id = subscription.id();
    drop(subscription);
    log::debug!("ws: subscription {} released", id);
    if peer_closed {
        session.finish_peer_close().await;
    } else {
        session.close(close_code, "").await;
    }
}

async fn forward(session: &mut LiveSession, event: &ChannelEvent, terms: &TermSet) {
    let Some(mut record) = normalize(&event.channel, &event.message) else {
        return;
    };
    let Some(hit) = terms.filter(&record.text) else {
        return;
    };
    record.matched_terms = hit;
    session
        .push(&LiveFrame {
            record: &record,
            typ: event.kind.as_str(),
        })
        .await;
}
