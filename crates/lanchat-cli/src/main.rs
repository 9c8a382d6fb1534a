//! # lanchat
//!
//! Terminal client for local-network chat. Talks to a relay over WebSocket
//! or, with `LANCHAT_MODE=beacon`, straight to other peers over UDP
//! broadcast. Plain lines are chat; `/help` lists the commands.

mod commands;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lanchat_net::{BeaconConnector, Connector, HttpFileStore, WsConnector};
use lanchat_session::{
    BackendKind, ChatMessage, MessageKind, Session, SessionConfig, SessionEvent,
};
use lanchat_shared::{FileHandle, PeerId};
use lanchat_store::{Database, KeyValueStore, MemoryStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::{parse, resolve_peer, Command, HELP};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they never interleave with the chat on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,lanchat_session=debug,lanchat_net=debug")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting lanchat v{}", env!("CARGO_PKG_VERSION"));

    let config = SessionConfig::from_env();
    info!(?config, "Loaded configuration");

    let store = open_store(config.db_path.as_deref());
    let connector: Arc<dyn Connector> = match config.backend {
        BackendKind::Relay => Arc::new(WsConnector::new(config.relay_url.clone())),
        BackendKind::Beacon => Arc::new(BeaconConnector::new(
            config.beacon_bind,
            config.beacon_target,
        )),
    };
    let files = Arc::new(HttpFileStore::new(config.http_url.clone()));

    let max_file_size = config.max_file_size;
    let session = Session::start(config, connector, files, store);
    let me = session.local_user();
    println!("You are {} ({}). Type /help for commands.", me.name, me.id.short());

    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => run(&session, command, max_file_size).await,
                    Ok(None) => {}
                    Err(e) => println!("! {e}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => render(&session, event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Display fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.disconnect();
    info!("Bye");
    Ok(())
}

fn open_store(path: Option<&Path>) -> Box<dyn KeyValueStore> {
    let opened = match path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    };
    match opened {
        Ok(db) => Box::new(db),
        Err(e) => {
            warn!(error = %e, "Identity database unavailable, identity will not persist");
            Box::new(MemoryStore::new())
        }
    }
}

async fn run(session: &Session, command: Command, max_file_size: u64) {
    match command {
        Command::Say(text) => {
            if let Err(e) = session.send_text(&text) {
                println!("! {e}");
            }
        }
        Command::Name(name) => match session.rename(&name) {
            Ok(me) => println!("* you are now {}", me.name),
            Err(e) => println!("! {e}"),
        },
        Command::To(query) => match resolve_peer(&query, &session.online_devices()) {
            Ok(peer) => {
                let history = session.select_peer(Some(peer.clone()));
                println!("* talking to {}", peer_label(session, &peer));
                for message in &history {
                    print_message(session, message);
                }
            }
            Err(e) => println!("! {e}"),
        },
        Command::All => {
            session.select_peer(None);
            println!("* back in the room");
        }
        Command::File(path) => send_file(session, &path, max_file_size).await,
        Command::Get { handle, out } => {
            let out = out.unwrap_or_else(|| PathBuf::from(&handle));
            match session.download(&FileHandle(handle)).await {
                Ok(data) => match tokio::fs::write(&out, &data).await {
                    Ok(()) => println!("* saved {} bytes to {}", data.len(), out.display()),
                    Err(e) => println!("! could not write {}: {e}", out.display()),
                },
                Err(e) => println!("! {e}"),
            }
        }
        Command::Peers => {
            let peers = session.online_devices();
            if peers.is_empty() {
                println!("* nobody else is online");
            }
            for peer in peers {
                println!("  {} {}", peer.id.short(), peer.name);
            }
            let unread = session.unread_counts();
            if unread.total() > 0 {
                println!("* {} unread", unread.total());
            }
        }
        Command::Connect => session.connect(),
        Command::Disconnect => session.disconnect(),
        Command::Refresh => {
            if let Err(e) = session.refresh_devices() {
                println!("! {e}");
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

async fn send_file(session: &Session, path: &Path, max_file_size: u64) {
    // Check the size before reading anything into memory.
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > max_file_size => {
            println!("! file too large: {} bytes (max {max_file_size})", meta.len());
            return;
        }
        Ok(_) => {}
        Err(e) => {
            println!("! {}: {e}", path.display());
            return;
        }
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            println!("! {}: {e}", path.display());
            return;
        }
    };

    match session.send_file(&name, data).await {
        Ok(message) => {
            if let Some(handle) = message.file.and_then(|f| f.handle) {
                println!("* shared {name} as {handle}");
            }
        }
        Err(e) => println!("! {e}"),
    }
}

fn render(session: &Session, event: SessionEvent) {
    match event {
        SessionEvent::MessageReceived(message) => {
            let me = session.local_user().id;
            let selected = session.selected_peer();
            if message.visible_in(&me, selected.as_ref()) {
                print_message(session, &message);
                session.mark_read();
            } else {
                println!("* new message from {}", message.sender_name);
            }
        }
        SessionEvent::MessageRead(message) => {
            if message.sender_id == session.local_user().id {
                println!("* read: {}", preview(&message));
            }
        }
        SessionEvent::PresenceChanged(peers) => {
            println!("* {} peer(s) online", peers.len());
        }
        SessionEvent::ConnectionStateChanged(state) => println!("* {state}"),
        SessionEvent::UnreadChanged(_) => {}
    }
}

fn print_message(session: &Session, message: &ChatMessage) {
    let me = session.local_user().id;
    let who = if message.sender_id == me {
        "you".to_string()
    } else {
        message.sender_name.clone()
    };
    let tick = if message.sender_id == me && message.is_read {
        " (read)"
    } else {
        ""
    };
    println!("[{who}] {}{tick}", preview(message));
}

fn preview(message: &ChatMessage) -> String {
    match (&message.kind, &message.file) {
        (MessageKind::File, Some(file)) => {
            let handle = file.handle.as_ref().map(|h| h.as_str()).unwrap_or("?");
            format!("<file {} ({} bytes), /get {handle}>", file.name, file.size)
        }
        _ => message.content.clone(),
    }
}

fn peer_label(session: &Session, peer: &PeerId) -> String {
    session
        .online_devices()
        .into_iter()
        .find(|p| p.id == *peer)
        .map(|p| p.name)
        .unwrap_or_else(|| peer.short().to_string())
}
