//! Per-connection task on the server

use std::sync::Arc;

use chrono::Local;
use tracing::{error, info, warn};

use crate::crypto::SymmetricKey;
use crate::session::{
    drive_handshake, ChatMessage, ConnectionId, EndReason, EnvelopeOpener, EnvelopeSealer,
    FrameReceiver, Handshake, Inbound, Opened, Payload, RosterUpdate, SessionWriter,
};
use crate::transport::{Frame, FrameSource};

use super::registry::SessionHandle;
use super::ServerState;

/// `HH:MM` stamp for system messages
pub(crate) fn timestamp() -> String {
    Local::now().format("%H:%M").to_string()
}

/// Serve one client from accept to close
pub(crate) async fn serve_connection<R: FrameSource>(
    state: Arc<ServerState>,
    id: ConnectionId,
    peer: String,
    source: R,
    writer: SessionWriter,
) {
    info!("Connection {} accepted from {}", id, peer);

    let mut receiver =
        FrameReceiver::new(source, &writer).with_shutdown(state.stop_sessions.clone());
    let key = match &state.shared_key {
        Some(key) => key.clone(),
        None => SymmetricKey::generate(),
    };
    let mut handshake = Handshake::server(state.identity.clone(), key);

    let keys = match drive_handshake(&mut handshake, &mut receiver, &writer).await {
        Ok(keys) => keys,
        Err(reason) => {
            log_end(id, &peer, &reason);
            if reason.should_notify_peer() {
                writer.send_best_effort(&Frame::Disconnect).await;
            }
            writer.close().await;
            return;
        }
    };

    let username = keys.username.unwrap_or_default();
    let sealer = Arc::new(keys.sealer);
    let opener = keys.opener;

    let handle = SessionHandle {
        id,
        username: username.clone(),
        writer: writer.clone(),
        sealer: sealer.clone(),
    };
    if let Err(e) = state.registry.add(handle).await {
        error!("Connection {}: {}", id, e);
        writer.close().await;
        return;
    }
    info!(
        "Connection {} established for {} (key {})",
        id,
        username,
        opener.peer().fingerprint()
    );

    announce(
        &state,
        &sealer,
        format!("{} CONNECTED {}", username, timestamp()),
    )
    .await;

    let reason = relay(&state, id, &username, &mut receiver, &sealer, &opener).await;

    state.registry.remove(id).await;
    log_end(id, &username, &reason);

    if reason.should_notify_peer() && !writer.is_closed() {
        match sealer.seal_frame(&Payload::Disconnect) {
            Ok(frame) => writer.send_best_effort(&frame).await,
            Err(e) => warn!("Connection {}: could not seal disconnect: {}", id, e),
        }
    }
    writer.close().await;

    if !state.is_shutting_down() {
        announce(
            &state,
            &sealer,
            format!("{} DISCONNECTED {}", username, timestamp()),
        )
        .await;
    }
}

/// Receive loop of an established session
async fn relay<R: FrameSource>(
    state: &ServerState,
    id: ConnectionId,
    username: &str,
    receiver: &mut FrameReceiver<R>,
    sealer: &EnvelopeSealer,
    opener: &EnvelopeOpener,
) -> EndReason {
    loop {
        let envelope = match receiver.next().await {
            Inbound::Frame(Frame::SecureEnvelope(envelope)) => envelope,
            Inbound::Frame(Frame::KeyAdvertisement(_)) => {
                warn!("Connection {}: key advertisement after handshake ignored", id);
                continue;
            }
            Inbound::Frame(Frame::Disconnect) => return EndReason::PeerDisconnect,
            Inbound::End(reason) => return reason,
        };

        let signed = match opener.open(&envelope) {
            Ok(Opened::Verified(signed)) => signed,
            Ok(Opened::BadSignature(_)) => {
                warn!(
                    "Connection {} ({}): message with invalid signature dropped",
                    id, username
                );
                continue;
            }
            Err(e) => {
                error!("Connection {} ({}): cannot open envelope: {}", id, username, e);
                return EndReason::Failed(e.into());
            }
        };

        match signed.payload() {
            Ok(Payload::Chat(message)) => {
                state
                    .events
                    .on_chat_received(message.sender.as_deref(), &message.text);
                match sealer.sign(&Payload::Chat(message)) {
                    Ok(relayed) => {
                        state.registry.broadcast(&relayed).await;
                    }
                    Err(e) => warn!("Connection {}: cannot relay chat line: {}", id, e),
                }
            }
            Ok(Payload::Disconnect) => return EndReason::PeerDisconnect,
            Ok(Payload::Roster(_)) => {
                warn!("Connection {}: roster update from a client dropped", id);
            }
            Err(e) => warn!("Connection {}: undecodable payload dropped: {}", id, e),
        }
    }
}

/// Show and broadcast a system line, then the new roster
async fn announce(state: &ServerState, signer: &EnvelopeSealer, text: String) {
    state.events.on_chat_received(None, &text);
    broadcast_signed(state, signer, Payload::Chat(ChatMessage::system(text))).await;

    let (roster, count) = state.registry.roster().await;
    state.events.on_roster_changed(&roster, count);
    broadcast_signed(state, signer, Payload::Roster(RosterUpdate { text: roster })).await;
}

async fn broadcast_signed(state: &ServerState, signer: &EnvelopeSealer, payload: Payload) {
    match signer.sign(&payload) {
        Ok(signed) => {
            state.registry.broadcast(&signed).await;
        }
        Err(e) => error!("Cannot sign {}: {}", payload.kind_name(), e),
    }
}

fn log_end(id: ConnectionId, who: &str, reason: &EndReason) {
    match reason {
        EndReason::PeerDisconnect => info!("Connection {} ({}) ended gracefully", id, who),
        EndReason::LocalShutdown => info!("Connection {} ({}) closed by server", id, who),
        EndReason::PeerClosed => warn!("Connection {} ({}) ended abruptly: {}", id, who, reason),
        EndReason::Failed(e) => error!("Connection {} ({}) ended abruptly: {}", id, who, e),
    }
}
