//! `DuoChat` — one-to-one messaging client.
//!
//! Line-oriented client: lists the user directory on startup, keeps the
//! notification channel alive in the background, and drives one
//! conversation at a time.
//!
//! ```bash
//! cargo run --bin duochat -- --server http://127.0.0.1:8000 --username alice
//!
//! # Or via environment variables
//! DUOCHAT_SERVER=http://127.0.0.1:8000 DUOCHAT_USER=alice cargo run
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing_appender::non_blocking::WorkerGuard;

use duochat::chat::history::HttpHistory;
use duochat::chat::upload::Uploader;
use duochat::chat::{ConversationSession, SessionEvent};
use duochat::config::{CliArgs, ClientConfig, Endpoints};
use duochat::directory::UserDirectory;
use duochat::notify::{NotificationTracker, NotifyEvent};
use duochat::transport::ws::WsDialer;
use duochat_proto::identity::UserId;
use duochat_proto::message::{ContentKind, Message};

type Session = ConversationSession<WsDialer, HttpHistory>;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("duochat starting");

    let Some(endpoints) = config.to_endpoints() else {
        eprintln!("Missing or invalid server/username; pass --server and --username");
        return std::process::ExitCode::from(2);
    };

    run(endpoints, &config).await;
    tracing::info!("duochat exiting");
    std::process::ExitCode::SUCCESS
}

/// Initialize logging. With `--log-file` logs go through a non-blocking
/// file appender (the returned guard must be held until shutdown so
/// buffered entries are flushed); otherwise they go to stderr.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match file_path {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name()?.to_str()?;
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_env_filter(env_filter)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(env_filter)
                .init();
            None
        }
    }
}

/// Main client loop: wires the collaborators together, then multiplexes
/// stdin commands, session events, and unread notifications.
async fn run(endpoints: Endpoints, config: &ClientConfig) {
    let http = reqwest::Client::new();
    let directory = UserDirectory::new(http.clone(), endpoints.http_base.clone());
    let history = Arc::new(HttpHistory::new(http.clone(), endpoints.http_base.clone()));
    let upload_endpoint = match endpoints.http_base.join("upload") {
        Ok(endpoint) => endpoint,
        Err(e) => {
            eprintln!("Invalid server URL: {e}");
            return;
        }
    };
    let uploader = Uploader::new(http, upload_endpoint);

    let dialer =
        WsDialer::new(endpoints.ws_base.clone()).with_connect_timeout(config.connect_timeout);
    let (tracker, mut notify_rx) = NotificationTracker::new(
        endpoints.username.clone(),
        dialer.clone(),
        config.to_notify_config(),
    );
    let notify_task = tracker.spawn();

    let mut session = ConversationSession::new(
        endpoints.username.clone(),
        dialer,
        history,
        Arc::clone(&tracker),
    );

    print_users(&directory, session.local()).await;
    println!("Commands: /open <user>, /users, /unread, /image <path>, /quit");

    let mut input = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        enum Turn {
            Line(Option<String>),
            Session(SessionEvent),
            Notify(Option<NotifyEvent>),
        }

        let turn = tokio::select! {
            line = input.next_line() => Turn::Line(line.unwrap_or(None)),
            event = session.next_event() => Turn::Session(event),
            event = notify_rx.recv() => Turn::Notify(event),
        };

        match turn {
            // EOF on stdin.
            Turn::Line(None) => break,
            Turn::Line(Some(line)) => {
                let quit =
                    handle_line(line.trim(), &mut session, &directory, &uploader, &tracker).await;
                if quit {
                    break;
                }
            }
            Turn::Session(event) => print_session_event(session.local(), &event),
            Turn::Notify(Some(event)) => print_notify_event(&event),
            Turn::Notify(None) => {}
        }
    }

    session.leave().await;
    notify_task.abort();
}

/// Handles one line of user input. Returns `true` to quit.
async fn handle_line(
    line: &str,
    session: &mut Session,
    directory: &UserDirectory,
    uploader: &Uploader,
    tracker: &NotificationTracker<WsDialer>,
) -> bool {
    if line.is_empty() {
        return false;
    }

    if let Some(peer) = line.strip_prefix("/open ") {
        let peer = UserId::new(peer.trim());
        match session.start_chat(peer.clone()).await {
            Ok(()) => println!("-- conversation with {peer} --"),
            Err(e) => eprintln!("Could not open conversation with {peer}: {e}"),
        }
        return false;
    }

    if let Some(path) = line.strip_prefix("/image ") {
        send_image(path.trim(), session, uploader).await;
        return false;
    }

    match line {
        "/quit" => return true,
        "/users" => print_users(directory, session.local()).await,
        "/unread" => {
            let unread = tracker.unread_peers();
            if unread.is_empty() {
                println!("No unread messages.");
            } else {
                for (peer, count) in unread {
                    println!("  {peer}: {count} unread");
                }
            }
        }
        _ if line.starts_with('/') => println!("Unknown command: {line}"),
        text => {
            if let Err(e) = session.send_message(text, ContentKind::Text).await {
                eprintln!("Not sent: {e}");
            }
        }
    }
    false
}

/// Uploads an image file and announces it in the current conversation.
async fn send_image(path: &str, session: &Session, uploader: &Uploader) {
    let Some(peer) = session.peer() else {
        eprintln!("No conversation open; /open someone first");
        return;
    };
    let Some(channel) = session.channel() else {
        eprintln!("Not connected; /open the conversation again");
        return;
    };

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Could not read {path}: {e}");
            return;
        }
    };
    let file_name = Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image");

    match uploader
        .upload_and_send(file_name, bytes, session.local(), peer, channel)
        .await
    {
        Ok(message) => println!("Sent image: {}", message.body),
        Err(e) => eprintln!("Upload failed: {e}"),
    }
}

/// Prints the user directory, minus ourselves.
async fn print_users(directory: &UserDirectory, local: &UserId) {
    match directory.peers(local).await {
        Ok(peers) if peers.is_empty() => println!("No other users registered yet."),
        Ok(peers) => {
            println!("Users:");
            for peer in peers {
                println!("  {peer}");
            }
        }
        Err(e) => eprintln!("Could not list users: {e}"),
    }
}

fn print_session_event(local: &UserId, event: &SessionEvent) {
    match event {
        SessionEvent::HistoryLoaded { peer, count } => {
            println!("-- {count} earlier messages with {peer} --");
        }
        SessionEvent::Message(message) => print_message(local, message),
        SessionEvent::Roster(users) => {
            let names: Vec<&str> = users.iter().map(UserId::as_str).collect();
            println!("-- online: {} --", names.join(", "));
        }
        SessionEvent::Disconnected => {
            println!("-- connection lost; /open the conversation again --");
        }
    }
}

fn print_message(local: &UserId, message: &Message) {
    let who = if message.sender == *local {
        "you"
    } else {
        message.sender.as_str()
    };
    let time = message.timestamp.format("%H:%M");
    match message.kind {
        ContentKind::Text => println!("[{time}] {who}: {}", message.body),
        ContentKind::Image => println!("[{time}] {who} sent an image: {}", message.body),
    }
}

fn print_notify_event(event: &NotifyEvent) {
    match event {
        NotifyEvent::Unread { from, count } => println!("* {from} ({count} unread)"),
        NotifyEvent::Disconnected => println!("* notification channel lost, reconnecting"),
        NotifyEvent::Connected => {}
    }
}
