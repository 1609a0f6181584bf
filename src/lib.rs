//! # Sealed Chat
//!
//! Multi-user chat over TCP where every message is signed by its sender and
//! encrypted under a key the server hands out during a public-key handshake.
//!
//! ## Features
//!
//! - **Authenticated messages**: Ed25519 signature on every chat line
//! - **Confidentiality**: ChaCha20-Poly1305 under a symmetric key delivered
//!   encrypted to each client's X25519 key
//! - **Broadcast relay**: the server re-signs and forwards each chat line to
//!   every established session
//! - **Pluggable transport**: TCP for real use, in-memory channels for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sealed_chat::{ChatClient, ChatServer, ClientConfig, LogEvents, ServerConfig};
//!
//! # async fn demo() -> Result<(), sealed_chat::SessionError> {
//! let server = ChatServer::bind(ServerConfig::default(), Arc::new(LogEvents)).await?;
//! tokio::spawn(server.run());
//!
//! let client = ChatClient::connect(&ClientConfig::new("alice"), Arc::new(LogEvents)).await?;
//! client.send_chat("hi").await?;
//! client.request_disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             PRESENTATION LAYER              │
//! │    ChatEvents  |  server & client binaries  │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │           SERVER  /  CLIENT                 │
//! │  accept loop | Registry | receive loops     │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               SESSION LAYER                 │
//! │  Handshake | Envelope codec | Payloads      │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               CRYPTO LAYER                  │
//! │  Ed25519 | X25519 | ChaCha20-Poly1305 | BLAKE3
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │             TRANSPORT LAYER                 │
//! │      Frame codec | TCP | in-memory          │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod crypto;
pub mod events;
pub mod server;
pub mod session;
pub mod transport;

// Re-export main types at crate root
pub use client::ChatClient;
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use crypto::{CryptoError, CryptoResult, Identity, PublicKey, SignatureBytes};
pub use events::{ChatEvents, LogEvents};
pub use server::{ChatServer, Registry, ShutdownHandle};
pub use session::{SessionError, SessionResult};
pub use transport::TransportError;
