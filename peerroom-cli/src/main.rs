use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use peerroom_core::config::Config;
use peerroom_core::core_session::{
    fingerprint, generate_room_id, ChatMessage, FileDescriptor, FingerprintStrategy, RoomKind,
    SessionConfig, SessionController, SessionEvent, SessionSettings,
};
use peerroom_core::core_transport::loopback::{LoopbackFileTransfer, LoopbackNetwork};
use peerroom_core::core_transport::OutgoingFile;
use peerroom_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "peerroom")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Override the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file; environment variables are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh room id
    NewRoom {
        /// Generate a four-digit id for a secret-protected room
        #[arg(long)]
        encrypted: bool,
    },

    /// Print the content fingerprint of a local file
    Fingerprint {
        path: PathBuf,

        /// Hash the descriptor with the fast non-cryptographic strategy
        #[arg(long)]
        fast: bool,
    },

    /// Run two in-process peers through a chat and file exchange
    Demo {
        /// Room to join; a public room id is generated when omitted
        #[arg(long)]
        room: Option<String>,

        /// Shared secret for four-digit rooms
        #[arg(long)]
        secret: Option<String>,

        /// File for the first peer to offer
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env().context("loading config from environment")?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let mut log_config = LogConfig::from_settings(&config.logging)?;
    if let Some(level) = &args.log_level {
        let level: LogLevel = level.parse()?;
        log_config.level = level;
    }
    init_logging_with_config(log_config.json_format(args.json_logs || config.logging.json_format))?;

    info!("PeerRoom CLI started");

    match args.command {
        Some(Command::NewRoom { encrypted }) => {
            let kind = if encrypted {
                RoomKind::Encrypted
            } else {
                RoomKind::Public
            };
            println!("{}", generate_room_id(kind));
        }
        Some(Command::Fingerprint { path, fast }) => {
            let descriptor = FileDescriptor::from_path(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let strategy = if fast {
                FingerprintStrategy::Fast
            } else {
                config.transfer.fingerprint
            };
            debug!(descriptor = %descriptor.descriptor_string(), "Fingerprinting");
            println!("{}  {}", fingerprint(&descriptor, strategy), descriptor.name);
        }
        Some(Command::Demo { room, secret, file }) => {
            run_demo(&config, room, secret, file).await?;
        }
        None => {
            info!("No command specified. Use --help for usage information.");
        }
    }

    info!("PeerRoom CLI finished");

    Ok(())
}

async fn run_demo(
    config: &Config,
    room: Option<String>,
    secret: Option<String>,
    file: Option<PathBuf>,
) -> Result<()> {
    let room = room.unwrap_or_else(|| generate_room_id(RoomKind::Public));
    let network = LoopbackNetwork::new();
    let files = LoopbackFileTransfer::new();
    let settings = SessionSettings::from_config(config);
    let namespace = config.session.app_namespace.clone();

    let session_config = |name: &str| {
        let base = SessionConfig::new(namespace.clone(), room.clone(), name);
        match &secret {
            Some(secret) => base.with_secret(secret.clone()),
            None => base,
        }
    };

    let (alice, alice_events) = SessionController::new(
        Arc::new(network.endpoint()),
        Arc::new(files.clone()),
        settings.clone(),
    );
    let (bob, mut bob_events) =
        SessionController::new(Arc::new(network.endpoint()), Arc::new(files), settings);
    let alice_log = tokio::spawn(print_events("alice", alice_events));

    alice.connect(session_config("alice")).await?;
    info!(room_id = %room, "alice joined");

    let greeting = alice.send_text("hello from before you arrived").await?;

    let outgoing = match &file {
        Some(path) => OutgoingFile::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => OutgoingFile::from_bytes("notes.txt", b"peer-to-peer notes\n".to_vec()),
    };
    let offer = match alice.send_file(outgoing).await? {
        ChatMessage::File(offer) => offer,
        other => bail!("unexpected message {:?}", other),
    };

    bob.connect(session_config("bob")).await?;
    info!(room_id = %room, "bob joined");

    // Bob backfills both messages from alice's history
    let mut seen = 0;
    while seen < 2 {
        match bob_events.recv().await {
            Some(SessionEvent::Message(message))
                if message.id() == greeting.id() || message.id() == &offer.id =>
            {
                print_message("bob", &message);
                seen += 1;
            }
            Some(event) => debug!(?event, "bob event"),
            None => bail!("bob's event stream ended early"),
        }
    }

    let downloaded = bob
        .download_file(&offer.transfer_descriptor, &offer.file_name)
        .await?;
    println!(
        "[bob] downloaded {} ({} bytes){}",
        downloaded.file_name,
        downloaded.bytes.len(),
        downloaded
            .saved_to
            .map(|p| format!(" to {}", p.display()))
            .unwrap_or_default()
    );

    bob.send_text("got it, thanks").await?;

    bob.disconnect().await;
    alice.disconnect().await;
    drop(alice);
    alice_log.abort();

    Ok(())
}

fn print_message(who: &str, message: &ChatMessage) {
    match message {
        ChatMessage::Text(text) => println!("[{}] {}: {}", who, text.sender_name, text.content),
        ChatMessage::File(file) => println!(
            "[{}] {} shared {} ({} bytes, {})",
            who, file.sender_name, file.file_name, file.file_size_bytes, file.mime_type
        ),
    }
}

async fn print_events(who: &'static str, mut events: UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Message(message) if !message.is_local() => print_message(who, &message),
            SessionEvent::PeerJoined(peer) => println!("[{}] {} joined", who, peer.display_name),
            SessionEvent::PeerLeft(peer_id) => println!("[{}] {} left", who, peer_id),
            SessionEvent::StatusChanged(status) => debug!(peer = who, %status, "status"),
            SessionEvent::Message(_) => {}
        }
    }
}
