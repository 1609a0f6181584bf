//! Sealed Chat terminal client
//!
//! Connects to a server, prints incoming chat and sends each line typed on
//! stdin as a signed, encrypted message.
//!
//! Commands:
//!   /users   show who is online
//!   /quit    leave the chat

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use sealed_chat::events::format_chat_line;
use sealed_chat::{ChatClient, ChatEvents, ClientConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;

/// Sealed Chat client
#[derive(Parser)]
#[command(name = "sealed-chat")]
#[command(author, version, about = "Signed and encrypted multi-user chat client")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = sealed_chat::config::DEFAULT_PORT)]
    port: u16,

    /// Name shown to other users (3 to 10 characters)
    #[arg(short, long)]
    username: String,
}

/// Terminal presentation: prints chat and remembers the last roster
#[derive(Default)]
struct Console {
    roster: Mutex<String>,
    ended: Notify,
}

impl Console {
    fn print_roster(&self) {
        match self.roster.lock() {
            Ok(roster) if !roster.is_empty() => print!("{}", roster),
            _ => println!("(no roster received yet)"),
        }
    }
}

impl ChatEvents for Console {
    fn on_chat_received(&self, sender: Option<&str>, text: &str) {
        println!("{}", format_chat_line(sender, text));
    }

    fn on_roster_changed(&self, roster: &str, user_count: usize) {
        if let Ok(mut last) = self.roster.lock() {
            *last = roster.to_string();
        }
        println!("--- {} user(s) online ---", user_count);
    }

    fn on_session_ended(&self) {
        println!("Disconnected.");
        self.ended.notify_one();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sealed_chat=warn")),
        )
        .init();

    let args = Args::parse();
    let username = ClientConfig::validate_username(&args.username)?;

    let config = ClientConfig {
        host: args.host,
        port: args.port,
        username,
        ..Default::default()
    };

    let console = Arc::new(Console::default());
    let client = ChatClient::connect(&config, console.clone())
        .await
        .with_context(|| format!("Could not join chat at {}", config.server_addr()))?;

    println!("=== Connected to {} as {} ===", config.server_addr(), client.username());
    println!("Server key: {}", client.server_key().fingerprint());
    println!("Type a message and press Enter. /users lists who is online, /quit leaves.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = console.ended.notified() => break,
            line = lines.next_line() => {
                let line = match line.context("Failed to read stdin")? {
                    Some(line) => line,
                    None => {
                        client.request_disconnect().await?;
                        break;
                    }
                };
                let line = line.trim();
                match line {
                    "" => continue,
                    "/quit" => {
                        client.request_disconnect().await?;
                        break;
                    }
                    "/users" => console.print_roster(),
                    text => client.send_chat(text).await?,
                }
            }
        }
    }

    client.wait().await;
    Ok(())
}
