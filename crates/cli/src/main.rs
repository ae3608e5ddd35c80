use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use mtproto_channel::MtprotoClient;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "tgfeed")]
#[command(about = "Telegram channel feed: keyword-filtered fetch and live stream", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Connect the Telegram session and serve /fetch and /ws until Ctrl+C.
    Serve {
        /// Config file path (default: TGFEED_CONFIG_PATH or ~/.tgfeed/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP and WebSocket port (default from config or 8000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Log in to Telegram and create the session `serve` uses. Prints a
    /// TELEGRAM_SESSION_STRING value, or writes the session file when one is given or configured.
    Login {
        /// Config file path (default: TGFEED_CONFIG_PATH or ~/.tgfeed/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Phone number in international format (default: TELEGRAM_PHONE)
        #[arg(long, env = "TELEGRAM_PHONE")]
        phone: String,

        /// Write the session here instead of printing it (default: telegram.sessionFile)
        #[arg(long, value_name = "PATH")]
        session_file: Option<PathBuf>,
    },

    /// Open a live feed on a running gateway and print each frame as a JSON line.
    Watch {
        /// Config file path, used for the gateway address and key when not given here
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Gateway WebSocket URL (default ws://<server.bind>:<server.port>/ws)
        #[arg(long, value_name = "URL")]
        url: Option<String>,

        /// Channels to follow, comma separated (e.g. @a,@b)
        #[arg(long)]
        channels: String,

        /// Comma-separated search terms
        #[arg(long, short)]
        q: Option<String>,

        /// Shared key (default: SECRET_KEY or server.secretKey)
        #[arg(long)]
        key: Option<String>,

        /// Also stream message edits
        #[arg(long)]
        edits: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("tgfeed {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Login {
            config,
            phone,
            session_file,
        }) => {
            if let Err(e) = run_login(config, phone, session_file).await {
                log::error!("login failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Watch {
            config,
            url,
            channels,
            q,
            key,
            edits,
        }) => {
            if let Err(e) = run_watch(config, url, channels, q, key, edits).await {
                log::error!("watch failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = tgfeed::config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    if let Some(p) = port {
        config.server.port = p;
    }
    // Fail before connecting when the gateway could never start.
    if tgfeed::config::resolve_secret_key(&config).is_none() {
        anyhow::bail!("secret key not configured (set SECRET_KEY or server.secretKey)");
    }
    let creds = tgfeed::config::resolve_telegram_credentials(&config)?;
    let client = MtprotoClient::connect(&creds).await?;
    log::info!(
        "starting gateway on {}:{}",
        config.server.bind,
        config.server.port
    );
    tgfeed::gateway::run_gateway(config, Arc::new(client)).await
}

fn ask_line(question: &str) -> std::io::Result<String> {
    use std::io::Write;

    let mut stdout = std::io::stdout();
    write!(stdout, "{}", question)?;
    stdout.flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn run_login(
    config_path: Option<PathBuf>,
    phone: String,
    session_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (config, _) = tgfeed::config::load_config(config_path)?;
    let (api_id, api_hash) = tgfeed::config::resolve_api_credentials(&config)?;
    let bytes = mtproto_channel::login(api_id, &api_hash, &phone, ask_line).await?;

    match session_file.or_else(|| config.telegram.session_file.clone()) {
        Some(path) => {
            std::fs::write(&path, &bytes)
                .with_context(|| format!("writing session to {}", path.display()))?;
            println!("Session saved to {}", path.display());
        }
        None => {
            println!("Put this in your .env:\n");
            println!(
                "TELEGRAM_SESSION_STRING={}",
                mtproto_channel::encode_session(&bytes)
            );
        }
    }
    Ok(())
}

/// Build the `/ws` URL with the query params percent-encoded.
fn watch_url(
    base: &str,
    channels: &str,
    q: Option<&str>,
    key: &str,
    edits: bool,
) -> anyhow::Result<url::Url> {
    let mut url = url::Url::parse(base)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("channels", channels);
        if let Some(q) = q.filter(|s| !s.trim().is_empty()) {
            query.append_pair("q", q);
        }
        query.append_pair("key", key);
        if edits {
            query.append_pair("edits", "true");
        }
    }
    Ok(url)
}

async fn run_watch(
    config_path: Option<PathBuf>,
    url: Option<String>,
    channels: String,
    q: Option<String>,
    key: Option<String>,
    edits: bool,
) -> anyhow::Result<()> {
    let (config, _) = tgfeed::config::load_config(config_path)?;
    let base = url.unwrap_or_else(|| {
        format!(
            "ws://{}:{}/ws",
            config.server.bind.trim(),
            config.server.port
        )
    });
    let key = key
        .or_else(|| tgfeed::config::resolve_secret_key(&config))
        .ok_or_else(|| anyhow::anyhow!("no key given (use --key, SECRET_KEY or server.secretKey)"))?;
    let url = watch_url(&base, &channels, q.as_deref(), &key, edits)?;

    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    log::info!("watching {} on {}", channels, base);

    loop {
        tokio::select! {
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => println!("{}", text),
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(f) => log::info!("closed by gateway: {} {}", u16::from(f.code), f.reason),
                            None => log::info!("closed by gateway"),
                        }
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = ws.send(Message::Close(None)).await;
                break;
            }
        }
    }
    Ok(())
}
