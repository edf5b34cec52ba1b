//! `b0-chat` — line-oriented client for the B0 messaging core.
//!
//! Joins one conversation and bridges stdin/stdout to a [`ChatSession`]:
//! lines are sent as messages, inbound messages print as they arrive.
//! Configuration via CLI flags, environment variables, or a config file
//! (`~/.config/b0/config.toml`).
//!
//! ```bash
//! b0-chat --socket-url ws://localhost:9000/ws \
//!     --rest-url http://localhost:9000/api \
//!     --token "$B0_TOKEN" --room room-123
//! ```
//!
//! Commands: `/older` loads an older history page, `/reconnect` rebuilds
//! the connection, `/retry <temp-id>` retries a failed send, `/card <id>`
//! shares a conversation card, `/quit` exits.

use std::io;
use std::path::Path;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing_appender::non_blocking::WorkerGuard;
use url::Url;

use b0_client::cache::{CachedMessage, MessageCache, TempId};
use b0_client::channel::ws::WsConnector;
use b0_client::config::{CliArgs, ClientConfig};
use b0_client::members::Profile;
use b0_client::rest::RestClient;
use b0_client::session::{ChatSession, ConnectionStatus, SessionNotice};
use b0_client::AuthToken;
use b0_proto::ids::{CardId, UserId};
use b0_proto::message::MessageStatus;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("b0-chat starting");

    let Some(socket_url) = config.socket_url.as_deref() else {
        eprintln!("No socket URL configured (--socket-url or [api].socket_url)");
        return Err(io::Error::other("missing socket url"));
    };
    let socket_url = Url::parse(socket_url).map_err(io::Error::other)?;

    let Some(conversation) = config.conversation() else {
        eprintln!("No conversation selected (--room <id> or --dm <id>)");
        return Err(io::Error::other("missing conversation"));
    };

    let token = AuthToken::new(config.token.clone().unwrap_or_default());

    let rest = match config.rest_url.as_deref() {
        Some(rest_url) => {
            let url = Url::parse(rest_url).map_err(io::Error::other)?;
            Some(RestClient::new(&url, token.clone()).map_err(io::Error::other)?)
        }
        None => None,
    };

    // Identity comes from the profile service when available.
    let me = match &rest {
        Some(rest) => rest.fetch_me().await.map_err(io::Error::other)?,
        None => Profile {
            user_id: UserId::new("local-user"),
            nickname: None,
            profile_emoji: None,
        },
    };

    let connector = WsConnector::new(socket_url).with_connect_timeout(config.connect_timeout);
    let (session, mut notices) = ChatSession::open(
        connector,
        conversation,
        me,
        token,
        config.session.clone(),
        rest,
    )
    .map_err(io::Error::other)?;

    if session.load_initial_history().await.is_ok() {
        let _ = session.refresh_members().await;
    }

    run_loop(&session, &mut notices).await;

    session.disconnect();
    tracing::info!("b0-chat exiting");
    Ok(())
}

/// Initialize file-based logging.
///
/// Logs go to a file, never stdout — stdout belongs to the chat
/// transcript. Returns a [`WorkerGuard`] that must be held until shutdown
/// so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("b0-chat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Bridge stdin and the session until `/quit` or stdin closes.
async fn run_loop<C: b0_client::channel::Connector>(
    session: &ChatSession<C>,
    notices: &mut tokio::sync::mpsc::Receiver<SessionNotice>,
) {
    let mut messages = session.messages();
    let mut status = session.status();
    let mut printed = print_timeline(&messages.borrow_and_update(), 0);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            changed = messages.changed() => {
                if changed.is_err() {
                    return;
                }
                let cache = messages.borrow_and_update().clone();
                if cache.len() < printed {
                    // A retry removed an entry; re-render from scratch.
                    println!("--- timeline updated ---");
                    printed = print_timeline(&cache, 0);
                } else {
                    printed = print_timeline(&cache, printed);
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    return;
                }
                print_status(&status.borrow_and_update());
            }
            notice = notices.recv() => {
                match notice {
                    Some(n) => print_notice(&n),
                    None => return,
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_line(session, line.trim()).await {
                            return;
                        }
                    }
                    Ok(None) | Err(_) => return,
                }
            }
        }
    }
}

/// Dispatch one input line. Returns `false` to quit.
async fn handle_line<C: b0_client::channel::Connector>(
    session: &ChatSession<C>,
    line: &str,
) -> bool {
    match line {
        "" => {}
        "/quit" => return false,
        "/reconnect" => session.reconnect(),
        "/older" => match session.load_older_messages().await {
            Ok(true) => println!("(older messages loaded)"),
            Ok(false) => println!("(no more history)"),
            Err(e) => println!("(history load failed: {e})"),
        },
        _ => {
            if let Some(temp_id) = line.strip_prefix("/retry ") {
                println!("(retrying {temp_id})");
                // Temp ids print alongside failed messages.
                session
                    .retry_message(&find_temp_id(session, temp_id.trim()))
                    .await;
            } else if let Some(card_id) = line.strip_prefix("/card ") {
                session.share_card(CardId::new(card_id.trim())).await;
            } else {
                session.send_message(line).await;
            }
        }
    }
    true
}

/// Resolve a user-typed temp id against the timeline, falling back to the
/// raw string (the session no-ops with a notice on unknown ids).
fn find_temp_id<C: b0_client::channel::Connector>(session: &ChatSession<C>, typed: &str) -> TempId {
    session
        .messages()
        .borrow()
        .timeline()
        .filter_map(|m| m.temp_id().cloned())
        .find(|t| t.as_str() == typed)
        .unwrap_or_else(|| TempId::generate())
}

/// Print timeline entries from `from` onward; returns the new count.
fn print_timeline(cache: &MessageCache, from: usize) -> usize {
    let mut count = 0;
    for entry in cache.timeline() {
        if count >= from {
            println!("{}", format_entry(entry));
        }
        count += 1;
    }
    count
}

/// Render one timeline entry.
fn format_entry(entry: &CachedMessage) -> String {
    let time = entry.created_at.format("%H:%M");
    let name = entry
        .sender
        .as_ref()
        .and_then(|s| s.nickname.clone())
        .or_else(|| entry.sender_id.as_ref().map(|id| id.to_string()))
        .unwrap_or_else(|| "system".to_string());
    let marker = match entry.status {
        MessageStatus::Sending => " …".to_string(),
        MessageStatus::Failed => entry
            .temp_id()
            .map_or_else(|| " ✗".to_string(), |t| format!(" ✗ (/retry {t})")),
        MessageStatus::Sent => String::new(),
    };
    format!("[{time}] {name}: {}{marker}", entry.content)
}

/// Print a connection status transition.
fn print_status(status: &ConnectionStatus) {
    match status {
        ConnectionStatus::Disconnected => println!("* disconnected (/reconnect to retry)"),
        ConnectionStatus::Connecting => println!("* connecting..."),
        ConnectionStatus::Connected => println!("* connected"),
        ConnectionStatus::Error(e) => println!("* connection error: {e}"),
    }
}

/// Print a transient session notice.
fn print_notice(notice: &SessionNotice) {
    match notice {
        SessionNotice::SendRejected { reason } => println!("* send rejected: {reason}"),
        SessionNotice::SendFailed { temp_id } => {
            println!("* send failed (/retry {temp_id})");
        }
    }
}
