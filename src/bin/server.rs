//! Sealed Chat server
//!
//! Accepts chat clients, hands each one the room key during the handshake and
//! relays every signed chat line to all connected users.
//!
//! Usage:
//!   sealed-chat-server [--port 2000] [--host 0.0.0.0] [--config server.toml]
//!                      [--per-session-keys]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sealed_chat::events::format_chat_line;
use sealed_chat::{ChatEvents, ChatServer, ServerConfig};
use tracing::info;

/// Sealed Chat server
#[derive(Parser)]
#[command(name = "sealed-chat-server")]
#[command(author, version, about = "Signed and encrypted multi-user chat server")]
struct Args {
    /// TOML config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Give every session its own symmetric key
    #[arg(long)]
    per_session_keys: bool,
}

/// Prints what the server relays
struct Console;

impl ChatEvents for Console {
    fn on_chat_received(&self, sender: Option<&str>, text: &str) {
        println!("{}", format_chat_line(sender, text));
    }

    fn on_roster_changed(&self, roster: &str, user_count: usize) {
        println!("--- {} user(s) online ---", user_count);
        print!("{}", roster);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sealed_chat=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.per_session_keys {
        config.shared_key_across_sessions = false;
    }

    let server = ChatServer::bind(config, Arc::new(Console))
        .await
        .context("Failed to start server")?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, disconnecting clients");
            shutdown.shutdown();
        }
    });

    server.run().await.context("Server failed")?;
    Ok(())
}
