//! Gateway HTTP + WebSocket server (single port).

use crate::config::{self, Config};
use crate::feed::{fetch_all, split_csv, FetchRequest, MessageRecord, TermSet};
use crate::gateway::auth::SharedKey;
use crate::gateway::live::ws_handler;
use crate::gateway::protocol::FetchQuery;
use crate::telegram::TelegramClient;
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

const DEFAULT_DAYS: i64 = 7;
const DAYS_RANGE: RangeInclusive<i64> = 1..=365;
const LIMIT_RANGE: RangeInclusive<i64> = 1..=2000;

/// Holder for the process-wide protocol client. Empty until startup has connected it and
/// again once shutdown has taken it; handlers report "not ready" while empty.
#[derive(Clone, Default)]
pub struct ClientSlot {
    inner: Arc<RwLock<Option<Arc<dyn TelegramClient>>>>,
}

impl ClientSlot {
    pub fn new(client: Arc<dyn TelegramClient>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(client))),
        }
    }

    /// A slot with no client; every request gets "not ready".
    pub fn empty() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<Arc<dyn TelegramClient>> {
        self.inner.read().await.clone()
    }

    /// Remove the client so no new work starts on it.
    pub async fn take(&self) -> Option<Arc<dyn TelegramClient>> {
        self.inner.write().await.take()
    }
}

/// Shared state for the gateway (config, shared key, protocol client).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub key: SharedKey,
    pub client: ClientSlot,
}

impl GatewayState {
    pub fn new(config: Config, key: SharedKey, client: ClientSlot) -> Self {
        Self {
            config: Arc::new(config),
            key,
            client,
        }
    }
}

/// Rejections for `GET /fetch`. Bodies are `{"detail": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Unauthorized: invalid key")]
    Unauthorized,
    #[error("Invalid '{param}': {reason}")]
    Invalid { param: &'static str, reason: String },
    #[error("Telegram client not ready.")]
    NotReady,
    #[error("Provide at least one channel in 'channels'.")]
    NoChannels,
}

impl FetchError {
    pub fn status(&self) -> StatusCode {
        match self {
            FetchError::Unauthorized => StatusCode::UNAUTHORIZED,
            FetchError::Invalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            FetchError::NotReady => StatusCode::INTERNAL_SERVER_ERROR,
            FetchError::NoChannels => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for FetchError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Parse an optional integer query param and check it against `range`.
fn parse_bounded(
    param: &'static str,
    value: Option<&str>,
    range: RangeInclusive<i64>,
) -> Result<Option<i64>, FetchError> {
    let Some(raw) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let n: i64 = raw.parse().map_err(|_| FetchError::Invalid {
        param,
        reason: format!("not an integer: {:?}", raw),
    })?;
    if !range.contains(&n) {
        return Err(FetchError::Invalid {
            param,
            reason: format!("must be between {} and {}", range.start(), range.end()),
        });
    }
    Ok(Some(n))
}

/// GET /fetch: keyword-filtered history across channels, newest first.
async fn fetch_http(
    State(state): State<GatewayState>,
    Query(query): Query<FetchQuery>,
) -> Result<Json<Vec<MessageRecord>>, FetchError> {
    if !state.key.verify(query.key.as_deref()) {
        return Err(FetchError::Unauthorized);
    }
    let days = parse_bounded("days", query.days.as_deref(), DAYS_RANGE)?.unwrap_or(DEFAULT_DAYS);
    let limit = parse_bounded("limit", query.limit.as_deref(), LIMIT_RANGE)?;
    let client = state.client.get().await.ok_or(FetchError::NotReady)?;
    let handles = split_csv(query.channels.as_deref().unwrap_or(""));
    if handles.is_empty() {
        return Err(FetchError::NoChannels);
    }

    let req = FetchRequest {
        handles,
        since: chrono::Utc::now() - chrono::Duration::days(days),
        limit: limit.map(|n| n as usize),
        terms: TermSet::parse(query.q.as_deref()),
    };
    let records = fetch_all(client.as_ref(), &req).await;
    log::debug!(
        "fetch: {} channel(s), {} day(s), {} record(s)",
        req.handles.len(),
        days,
        records.len()
    );
    Ok(Json(records))
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let client = if state.client.get().await.is_some() {
        "ready"
    } else {
        "unavailable"
    };
    Json(json!({
        "runtime": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "client": client,
    }))
}

/// Routes: `/` (health), `/fetch` (REST), `/ws` (live feed).
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/fetch", get(fetch_http))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve the gateway on an already-bound listener until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, state: GatewayState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server exited")
}

/// Run the gateway; binds to config.server.bind:config.server.port with an already connected
/// client. Blocks until shutdown (e.g. Ctrl+C), then disconnects the client.
pub async fn run_gateway(config: Config, client: Arc<dyn TelegramClient>) -> Result<()> {
    let key = config::resolve_secret_key(&config)
        .context("secret key not configured (set SECRET_KEY or server.secretKey)")?;
    let bind_addr = format!("{}:{}", config.server.bind.trim(), config.server.port);
    let slot = ClientSlot::new(client);
    let state = GatewayState::new(config, SharedKey::new(key), slot.clone());

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    serve(listener, state, shutdown_signal(slot)).await?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Empties the client slot and disconnects the client, which also ends open live feeds.
async fn shutdown_signal(slot: ClientSlot) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, disconnecting telegram client");

    if let Some(client) = slot.take().await {
        client.disconnect().await;
    }
    log::info!("telegram client disconnected");
}
