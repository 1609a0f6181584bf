//! Chat server
//!
//! One task accepts connections; each accepted connection gets its own task
//! that runs the handshake, registers the session and relays its messages.
//! Everything a session writes to another client goes through the
//! [`Registry`].
//!
//! ```text
//!   accept loop ──spawn──▶ connection task ──▶ handshake ──▶ registry.add
//!                                │                               │
//!                                ▼                               ▼
//!                          receive loop ──── chat ────▶ registry.broadcast
//! ```

mod registry;
mod session;

pub use registry::{format_roster, Registry, RegistryError, SessionHandle};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::crypto::{Identity, PublicKey, SymmetricKey};
use crate::events::{ChatEvents, SERVER_GOODBYE};
use crate::session::{
    shutdown_requested, ChatMessage, ConnectionId, Payload, SessionResult, SessionWriter,
    SignedPayload,
};
use crate::transport::{tcp, FrameSink, FrameSource, TransportError};

/// State shared by every connection task
pub(crate) struct ServerState {
    pub(crate) identity: Arc<Identity>,
    pub(crate) shared_key: Option<SymmetricKey>,
    pub(crate) registry: Registry,
    pub(crate) events: Arc<dyn ChatEvents>,
    /// Flipped when shutdown starts
    shutdown: watch::Receiver<bool>,
    /// Flipped once registered sessions have been told; ends the rest
    pub(crate) stop_sessions: watch::Receiver<bool>,
    next_id: AtomicU64,
}

impl ServerState {
    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Requests a running server to shut down
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stop accepting, say goodbye to every client and close all sessions
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A bound chat server
pub struct ChatServer {
    listener: TcpListener,
    config: ServerConfig,
    state: Arc<ServerState>,
    shutdown: ShutdownHandle,
    stop_sessions: watch::Sender<bool>,
}

impl ChatServer {
    /// Bind the listening socket and generate the server identity
    pub async fn bind(config: ServerConfig, events: Arc<dyn ChatEvents>) -> SessionResult<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("bind {}: {}", addr, e)))?;

        let identity = Arc::new(Identity::generate());
        info!("Server public key {}", identity.public_key().fingerprint());

        let shared_key = if config.shared_key_across_sessions {
            Some(SymmetricKey::generate())
        } else {
            info!("Generating a fresh symmetric key for every session");
            None
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(ChatServer {
            listener,
            config,
            state: Arc::new(ServerState {
                identity,
                shared_key,
                registry: Registry::new(),
                events,
                shutdown: shutdown_rx,
                stop_sessions: stop_rx,
                next_id: AtomicU64::new(1),
            }),
            shutdown: ShutdownHandle {
                tx: Arc::new(shutdown_tx),
            },
            stop_sessions: stop_tx,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SessionResult<SocketAddr> {
        Ok(self.listener.local_addr().map_err(TransportError::Io)?)
    }

    /// The server's public key, as advertised to clients
    pub fn public_key(&self) -> &PublicKey {
        self.state.identity.public_key()
    }

    /// Established sessions
    pub fn registry(&self) -> &Registry {
        &self.state.registry
    }

    /// Handle for stopping [`Self::run`] from elsewhere
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serve a client over an already connected transport
    pub fn spawn_session<R, W>(
        &self,
        source: R,
        sink: W,
        peer: impl Into<String>,
    ) -> JoinHandle<()>
    where
        R: FrameSource + 'static,
        W: FrameSink + 'static,
    {
        let id = self.state.next_connection_id();
        tokio::spawn(session::serve_connection(
            self.state.clone(),
            id,
            peer.into(),
            source,
            SessionWriter::new(sink),
        ))
    }

    /// Accept connections until shutdown is requested, then close every
    /// session and wait for their tasks
    pub async fn run(self) -> SessionResult<()> {
        let addr = self.local_addr()?;
        info!("Chat server listening on {}", addr);

        let mut shutdown = self.shutdown.tx.subscribe();
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_requested(Some(&mut shutdown)) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let (source, sink) = tcp::split(stream, self.config.max_frame_len);
                        let id = self.state.next_connection_id();
                        sessions.spawn(session::serve_connection(
                            self.state.clone(),
                            id,
                            peer.to_string(),
                            source,
                            SessionWriter::new(sink),
                        ));
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        self.close_all(sessions).await;
        Ok(())
    }

    async fn close_all(&self, mut sessions: JoinSet<()>) {
        let farewell: Vec<SignedPayload> = [
            Payload::Chat(ChatMessage::system(SERVER_GOODBYE)),
            Payload::Disconnect,
        ]
        .iter()
        .filter_map(|payload| match SignedPayload::sign(&self.state.identity, payload) {
            Ok(signed) => Some(signed),
            Err(e) => {
                error!("Cannot sign farewell {}: {}", payload.kind_name(), e);
                None
            }
        })
        .collect();
        let closed = self.state.registry.shutdown(&farewell).await;
        info!("Shutting down, closed {} session(s)", closed);

        self.stop_sessions.send_replace(true);
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }
        info!("Server stopped");
    }
}
