//! Chat client
//!
//! [`ChatClient::connect`] opens the TCP connection, runs the handshake under
//! a fresh identity and spawns the receive loop. Everything the user should
//! see is reported through [`ChatEvents`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ClientConfig;
use crate::crypto::{Identity, PublicKey};
use crate::events::{ChatEvents, ERROR_EXIT_NOTICE, INVALID_SIGNATURE_NOTICE};
use crate::session::{
    drive_handshake, ChatMessage, EndReason, EnvelopeOpener, EnvelopeSealer, FrameReceiver,
    Handshake, Inbound, Opened, Payload, SessionResult, SessionWriter,
};
use crate::transport::{tcp, Frame, FrameSink, FrameSource};

/// An established connection to a chat server
pub struct ChatClient {
    username: String,
    server_key: PublicKey,
    writer: SessionWriter,
    sealer: Arc<EnvelopeSealer>,
    receive_task: JoinHandle<()>,
}

impl ChatClient {
    /// Connect over TCP and complete the handshake
    pub async fn connect(config: &ClientConfig, events: Arc<dyn ChatEvents>) -> SessionResult<Self> {
        let (source, sink) = tcp::connect(config.server_addr(), config.max_frame_len).await?;
        info!("Connected to {}", config.server_addr());
        Self::establish(source, sink, &config.username, events).await
    }

    /// Complete the handshake over an already connected transport
    pub async fn establish<R, W>(
        source: R,
        sink: W,
        username: &str,
        events: Arc<dyn ChatEvents>,
    ) -> SessionResult<Self>
    where
        R: FrameSource + 'static,
        W: FrameSink + 'static,
    {
        let identity = Arc::new(Identity::generate());
        let writer = SessionWriter::new(sink);
        let mut receiver = FrameReceiver::new(source, &writer);
        let mut handshake = Handshake::client(identity, username);

        let keys = match drive_handshake(&mut handshake, &mut receiver, &writer).await {
            Ok(keys) => keys,
            Err(reason) => {
                warn!("Handshake failed: {}", reason);
                if reason.should_notify_peer() {
                    writer.send_best_effort(&Frame::Disconnect).await;
                }
                writer.close().await;
                return Err(reason.into_error());
            }
        };

        info!(
            "Session established as {} (server key {})",
            username,
            keys.peer_public_key.fingerprint()
        );

        let sealer = Arc::new(keys.sealer);
        let receive_task = tokio::spawn(receive_loop(
            receiver,
            keys.opener,
            writer.clone(),
            sealer.clone(),
            events,
        ));

        Ok(ChatClient {
            username: username.to_string(),
            server_key: keys.peer_public_key,
            writer,
            sealer,
            receive_task,
        })
    }

    /// Username advertised to the server
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Public key the server advertised during the handshake
    pub fn server_key(&self) -> &PublicKey {
        &self.server_key
    }

    /// Whether the session is still open
    pub fn is_connected(&self) -> bool {
        !self.writer.is_closed() && !self.receive_task.is_finished()
    }

    /// Sign, encrypt and send a chat line
    pub async fn send_chat(&self, text: &str) -> SessionResult<()> {
        let frame = self
            .sealer
            .seal_frame(&Payload::Chat(ChatMessage::from_user(&self.username, text)))?;
        self.writer.send_frame(&frame).await?;
        Ok(())
    }

    /// Tell the server we are leaving, then close the connection
    ///
    /// The receive loop ends and reports `on_session_ended`.
    pub async fn request_disconnect(&self) -> SessionResult<()> {
        if self.writer.is_closed() {
            return Ok(());
        }
        let frame = self.sealer.seal_frame(&Payload::Disconnect)?;
        let sent = self.writer.send_frame(&frame).await;
        self.writer.close().await;
        sent?;
        Ok(())
    }

    /// Wait for the receive loop to finish
    pub async fn wait(self) {
        if let Err(e) = self.receive_task.await {
            error!("Receive loop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("username", &self.username)
            .field("server_key", &self.server_key)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn receive_loop<R: FrameSource>(
    mut receiver: FrameReceiver<R>,
    opener: EnvelopeOpener,
    writer: SessionWriter,
    sealer: Arc<EnvelopeSealer>,
    events: Arc<dyn ChatEvents>,
) {
    let reason = loop {
        let envelope = match receiver.next().await {
            Inbound::Frame(Frame::SecureEnvelope(envelope)) => envelope,
            Inbound::Frame(Frame::KeyAdvertisement(_)) => {
                warn!("Key advertisement after handshake ignored");
                continue;
            }
            Inbound::Frame(Frame::Disconnect) => break EndReason::PeerDisconnect,
            Inbound::End(reason) => break reason,
        };

        let signed = match opener.open(&envelope) {
            Ok(Opened::Verified(signed)) => signed,
            Ok(Opened::BadSignature(_)) => {
                warn!("Message with invalid signature dropped");
                events.on_chat_received(None, INVALID_SIGNATURE_NOTICE);
                continue;
            }
            Err(e) => break EndReason::Failed(e.into()),
        };

        match signed.payload() {
            Ok(Payload::Chat(message)) => {
                events.on_chat_received(message.sender.as_deref(), &message.text)
            }
            Ok(Payload::Roster(roster)) => {
                let count = roster
                    .text
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .count();
                events.on_roster_changed(&roster.text, count);
            }
            Ok(Payload::Disconnect) => break EndReason::PeerDisconnect,
            Err(e) => warn!("Undecodable payload dropped: {}", e),
        }
    };

    match &reason {
        EndReason::PeerDisconnect => info!("Server ended the session"),
        EndReason::LocalShutdown => info!("Session closed"),
        EndReason::PeerClosed => warn!("Connection lost: {}", reason),
        EndReason::Failed(e) => {
            error!("Session failed: {}", e);
            events.on_chat_received(None, ERROR_EXIT_NOTICE);
        }
    }

    if reason.should_notify_peer() && !writer.is_closed() {
        match sealer.seal_frame(&Payload::Disconnect) {
            Ok(frame) => writer.send_best_effort(&frame).await,
            Err(e) => warn!("Could not seal disconnect: {}", e),
        }
    }
    writer.close().await;
    events.on_session_ended();
}
