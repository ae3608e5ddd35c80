//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.tgfeed/config.json`) and environment.
//! Environment variables (`SECRET_KEY`, `TELEGRAM_API_ID`, `TELEGRAM_API_HASH`,
//! `TELEGRAM_SESSION_STRING`) override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP/WebSocket server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// MTProto credentials and session.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Live feed defaults.
    #[serde(default)]
    pub live: LiveConfig,
}

/// Server bind, port, and shared key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for HTTP and WebSocket (default 8000).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,

    /// Shared secret every request must pass as `key`. Overridden by SECRET_KEY env.
    pub secret_key: Option<String>,
}

fn default_server_port() -> u16 {
    8000
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
            secret_key: None,
        }
    }
}

/// Telegram API credentials (from my.telegram.org) and the stored user session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,
    /// Base64-encoded session bytes. Overridden by TELEGRAM_SESSION_STRING env.
    pub session_string: Option<String>,
    /// Session file on disk; used when no session string is set.
    pub session_file: Option<PathBuf>,
    /// Flood waits up to this many seconds are slept through by the client (default 60).
    pub flood_sleep_threshold: Option<u32>,
}

/// Live feed settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    /// Also push message edits (`"type": "edit"`) unless the connection opts out.
    #[serde(default)]
    pub stream_edits: bool,
}

const DEFAULT_FLOOD_SLEEP_THRESHOLD: u32 = 60;

/// Where the client session comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSource {
    /// Base64-encoded session bytes.
    Encoded(String),
    File(PathBuf),
}

/// Everything the protocol adapter needs to connect.
#[derive(Debug, Clone)]
pub struct TelegramCredentials {
    pub api_id: i32,
    pub api_hash: String,
    pub session: SessionSource,
    pub flood_sleep_threshold: u32,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Trimmed env value when non-empty, else trimmed config value when non-empty.
fn first_nonempty(env: Option<String>, config: Option<&str>) -> Option<String> {
    env.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            config
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the shared key: env SECRET_KEY overrides config.
pub fn resolve_secret_key(config: &Config) -> Option<String> {
    first_nonempty(env_value("SECRET_KEY"), config.server.secret_key.as_deref())
}

/// Resolve the API id and hash (env over config). Enough to log in and create a session.
pub fn resolve_api_credentials(config: &Config) -> Result<(i32, String)> {
    let tg = &config.telegram;
    let api_id = match first_nonempty(env_value("TELEGRAM_API_ID"), None) {
        Some(s) => s
            .parse::<i32>()
            .with_context(|| format!("parsing TELEGRAM_API_ID {:?}", s))?,
        None => tg.api_id.unwrap_or(0),
    };
    if api_id == 0 {
        anyhow::bail!("telegram api id not configured (set TELEGRAM_API_ID or telegram.apiId)");
    }
    let api_hash = first_nonempty(env_value("TELEGRAM_API_HASH"), tg.api_hash.as_deref())
        .context("telegram api hash not configured (set TELEGRAM_API_HASH or telegram.apiHash)")?;
    Ok((api_id, api_hash))
}

/// Resolve Telegram credentials from env and config. Fails when any piece is missing.
pub fn resolve_telegram_credentials(config: &Config) -> Result<TelegramCredentials> {
    let tg = &config.telegram;
    let (api_id, api_hash) = resolve_api_credentials(config)?;
    let session = match first_nonempty(
        env_value("TELEGRAM_SESSION_STRING"),
        tg.session_string.as_deref(),
    ) {
        Some(s) => SessionSource::Encoded(s),
        None => match &tg.session_file {
            Some(p) if !p.as_os_str().is_empty() => SessionSource::File(p.clone()),
            _ => anyhow::bail!(
                "telegram session not configured (set TELEGRAM_SESSION_STRING, telegram.sessionString or telegram.sessionFile)"
            ),
        },
    };
    Ok(TelegramCredentials {
        api_id,
        api_hash,
        session,
        flood_sleep_threshold: tg
            .flood_sleep_threshold
            .unwrap_or(DEFAULT_FLOOD_SLEEP_THRESHOLD),
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TGFEED_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".tgfeed").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (TGFEED_CONFIG_PATH). Missing file =>
/// default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
