//! MTProto adapter: connects a stored user session through grammers and implements
//! [`TelegramClient`] for the gateway.
//!
//! A background task pulls updates from the connection and dispatches new-message and edit
//! events into the [`EventHub`]; live subscriptions are served from there. [`login`] creates
//! the session in the first place.

use async_trait::async_trait;
use base64::Engine;
use futures_util::StreamExt;
use grammers_client::types::{Chat, Message};
use grammers_client::{Client, Config, InitParams, InvocationError, SignInError, Update};
use grammers_session::{PackedChat, Session};
use std::sync::{Arc, Mutex, PoisonError};
use tgfeed::config::{SessionSource, TelegramCredentials};
use tgfeed::telegram::{
    normalize_handle, ChannelEvent, ChannelRef, ClientError, EventHub, EventKind, EventKinds,
    MessageStream, RawMessage, Subscription, TelegramClient,
};
use tokio::task::JoinHandle;

/// Shared MTProto connection for the whole process.
pub struct MtprotoClient {
    client: Client,
    session: SessionSource,
    hub: Arc<EventHub>,
    updates: Mutex<Option<JoinHandle<()>>>,
}

impl MtprotoClient {
    /// Connect with the stored session and verify it is authorized. Fails when the session is
    /// missing, unreadable, or no longer logged in.
    pub async fn connect(creds: &TelegramCredentials) -> Result<Self, ClientError> {
        let session = load_session(&creds.session)?;
        let params = InitParams {
            flood_sleep_threshold: creds.flood_sleep_threshold,
            ..InitParams::default()
        };
        let client = Client::connect(Config {
            session,
            api_id: creds.api_id,
            api_hash: creds.api_hash.clone(),
            params,
        })
        .await
        .map_err(|e| ClientError::Connection(e.to_string()))?;

        if !client.is_authorized().await.map_err(map_invocation)? {
            return Err(ClientError::Unauthorized);
        }
        log::info!("telegram: connected and authorized");

        let hub = Arc::new(EventHub::new());
        let updates = tokio::spawn(pump_updates(client.clone(), hub.clone()));
        Ok(Self {
            client,
            session: creds.session.clone(),
            hub,
            updates: Mutex::new(Some(updates)),
        })
    }
}

/// Base64 form of saved session bytes, as accepted in `TELEGRAM_SESSION_STRING`.
pub fn encode_session(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Log in with a phone number and return the saved session bytes.
///
/// `ask` is called for the login code and, when two-step verification is on, the password.
pub async fn login<F>(
    api_id: i32,
    api_hash: &str,
    phone: &str,
    mut ask: F,
) -> Result<Vec<u8>, ClientError>
where
    F: FnMut(&str) -> std::io::Result<String>,
{
    let client = Client::connect(Config {
        session: Session::new(),
        api_id,
        api_hash: api_hash.to_string(),
        params: InitParams::default(),
    })
    .await
    .map_err(|e| ClientError::Connection(e.to_string()))?;

    if !client.is_authorized().await.map_err(map_invocation)? {
        let token = client
            .request_login_code(phone.trim())
            .await
            .map_err(|e| ClientError::Request(format!("requesting login code: {}", e)))?;
        let code = ask("Enter the login code you received: ").map_err(prompt_error)?;
        match client.sign_in(&token, code.trim()).await {
            Ok(_) => {}
            Err(SignInError::PasswordRequired(password_token)) => {
                let password = ask("Two-step password: ").map_err(prompt_error)?;
                client
                    .check_password(password_token, password.trim())
                    .await
                    .map_err(|e| ClientError::Request(format!("checking password: {}", e)))?;
            }
            Err(e) => return Err(ClientError::Request(format!("signing in: {}", e))),
        }
    }
    log::info!("telegram: logged in");
    Ok(client.session().save())
}

fn prompt_error(err: std::io::Error) -> ClientError {
    ClientError::Request(format!("reading input: {}", err))
}

fn load_session(source: &SessionSource) -> Result<Session, ClientError> {
    match source {
        SessionSource::Encoded(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| ClientError::Connection(format!("invalid session string: {}", e)))?;
            Session::load(&bytes)
                .map_err(|e| ClientError::Connection(format!("invalid session string: {:?}", e)))
        }
        SessionSource::File(path) => Session::load_file(path).map_err(|e| {
            ClientError::Connection(format!("loading session {}: {}", path.display(), e))
        }),
    }
}

/// Pull updates until the connection fails, then close the hub so live feeds end.
async fn pump_updates(client: Client, hub: Arc<EventHub>) {
    loop {
        let update = match client.next_update().await {
            Ok(u) => u,
            Err(e) => {
                log::warn!("telegram: update stream ended: {}", e);
                break;
            }
        };
        let (kind, message) = match update {
            Update::NewMessage(m) => (EventKind::NewMessage, m),
            Update::MessageEdited(m) => (EventKind::Edit, m),
            _ => continue,
        };
        if hub.listener_count() == 0 {
            continue;
        }
        hub.dispatch(ChannelEvent {
            kind,
            channel: channel_ref(&message.chat()),
            message: raw_message(&message),
        });
    }
    hub.close();
}

fn channel_ref(chat: &Chat) -> ChannelRef {
    let title = chat.name().trim();
    ChannelRef {
        id: chat.id(),
        username: chat.username().map(str::to_string),
        title: (!title.is_empty()).then(|| title.to_string()),
        peer: chat.pack().to_bytes().to_vec(),
    }
}

fn raw_message(message: &Message) -> RawMessage {
    RawMessage {
        id: i64::from(message.id()),
        date: Some(message.date().into()),
        text: Some(message.text().to_string()),
    }
}

/// Map RPC error names to the error kinds callers distinguish. `None` for anything else.
fn classify_rpc(name: &str, value: Option<u32>) -> Option<ClientError> {
    match name {
        "FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT" | "SLOWMODE_WAIT" => Some(ClientError::FloodWait {
            seconds: value.unwrap_or(0),
        }),
        "CHANNEL_PRIVATE" | "CHAT_ADMIN_REQUIRED" | "CHANNEL_PUBLIC_GROUP_NA"
        | "USER_BANNED_IN_CHANNEL" | "CHAT_FORBIDDEN" => {
            Some(ClientError::AccessDenied(name.to_string()))
        }
        "USERNAME_INVALID" | "USERNAME_NOT_OCCUPIED" | "CHANNEL_INVALID" => {
            Some(ClientError::NotFound(name.to_string()))
        }
        "AUTH_KEY_UNREGISTERED" | "SESSION_REVOKED" | "SESSION_EXPIRED" | "USER_DEACTIVATED" => {
            Some(ClientError::Unauthorized)
        }
        _ => None,
    }
}

fn map_invocation(err: InvocationError) -> ClientError {
    if let InvocationError::Rpc(rpc) = &err {
        if let Some(mapped) = classify_rpc(&rpc.name, rpc.value) {
            return mapped;
        }
    }
    ClientError::Request(err.to_string())
}

#[async_trait]
impl TelegramClient for MtprotoClient {
    async fn resolve(&self, handle: &str) -> Result<ChannelRef, ClientError> {
        let username = normalize_handle(handle);
        if username.is_empty() {
            return Err(ClientError::NotFound(handle.to_string()));
        }
        match self
            .client
            .resolve_username(username)
            .await
            .map_err(map_invocation)?
        {
            Some(chat) => Ok(channel_ref(&chat)),
            None => Err(ClientError::NotFound(handle.to_string())),
        }
    }

    fn history(&self, channel: &ChannelRef, limit: Option<usize>) -> MessageStream {
        let Ok(packed) = PackedChat::from_bytes(&channel.peer) else {
            let err = ClientError::Request(format!("channel {} has no usable peer", channel.label()));
            return futures_util::stream::once(async move { Err(err) }).boxed();
        };
        let mut iter = self.client.iter_messages(packed);
        if let Some(n) = limit {
            iter = iter.limit(n);
        }
        futures_util::stream::unfold(Some(iter), |state| async move {
            let mut iter = state?;
            match iter.next().await {
                Ok(Some(m)) => Some((Ok(raw_message(&m)), Some(iter))),
                Ok(None) => None,
                Err(e) => Some((Err(map_invocation(e)), None)),
            }
        })
        .boxed()
    }

    fn subscribe(
        &self,
        channels: &[ChannelRef],
        kinds: EventKinds,
    ) -> Result<Subscription, ClientError> {
        self.hub.subscribe(channels, kinds)
    }

    async fn disconnect(&self) {
        let updates = self
            .updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = updates {
            handle.abort();
        }
        self.hub.close();
        if let SessionSource::File(path) = &self.session {
            if let Err(e) = self.client.session().save_to_file(path) {
                log::warn!("telegram: saving session to {}: {}", path.display(), e);
            }
        }
        log::info!("telegram: disconnected");
    }
}
