//! Registry of established sessions
//!
//! The list is locked for the whole of a broadcast, so every registered
//! session receives each broadcast exactly once and membership cannot change
//! mid-iteration.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::session::{ConnectionId, EnvelopeSealer, SessionWriter, SignedPayload};
use crate::transport::Frame;

/// Registry errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// A session with this id is already registered
    #[error("Connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
}

/// What the registry keeps per established session
#[derive(Clone, Debug)]
pub struct SessionHandle {
    /// Server-assigned connection id
    pub id: ConnectionId,
    /// Username advertised during the handshake
    pub username: String,
    /// Serialized writer to the client
    pub writer: SessionWriter,
    /// Encrypts broadcasts under this session's symmetric key
    pub sealer: Arc<EnvelopeSealer>,
}

/// Shared list of established sessions, in registration order
#[derive(Clone, Debug, Default)]
pub struct Registry {
    sessions: Arc<Mutex<Vec<SessionHandle>>>,
}

/// One roster line per user
pub fn format_roster<'a>(usernames: impl IntoIterator<Item = &'a str>) -> String {
    usernames
        .into_iter()
        .map(|name| format!(" {} \n", name))
        .collect()
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an established session
    pub async fn add(&self, handle: SessionHandle) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.iter().any(|s| s.id == handle.id) {
            return Err(RegistryError::DuplicateConnection(handle.id));
        }
        debug!("Registered connection {} ({})", handle.id, handle.username);
        sessions.push(handle);
        Ok(())
    }

    /// Unregister a session; a no-op if it is not present
    pub async fn remove(&self, id: ConnectionId) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        let index = sessions.iter().position(|s| s.id == id)?;
        Some(sessions.remove(index))
    }

    /// Send a signed payload to every registered session
    ///
    /// The wrapper is encrypted under each session's key; sessions sharing a
    /// key share one envelope. A failed write is logged and that session is
    /// closed, which ends its receive loop. Returns the number of successful
    /// writes.
    pub async fn broadcast(&self, signed: &SignedPayload) -> usize {
        let sessions = self.sessions.lock().await;
        let mut sealed: Option<(&EnvelopeSealer, Frame)> = None;
        let mut delivered = 0;

        for session in sessions.iter() {
            let reusable =
                matches!(&sealed, Some((sealer, _)) if sealer.shares_key_with(&session.sealer));
            if !reusable {
                match session.sealer.encrypt(signed) {
                    Ok(envelope) => {
                        sealed = Some((&*session.sealer, Frame::SecureEnvelope(envelope)));
                    }
                    Err(e) => {
                        warn!("Could not seal broadcast for connection {}: {}", session.id, e);
                        continue;
                    }
                }
            }
            let Some((_, frame)) = &sealed else {
                continue;
            };

            match session.writer.send_frame(frame).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "Broadcast to connection {} ({}) failed: {}",
                        session.id, session.username, e
                    );
                    session.writer.close().await;
                }
            }
        }

        delivered
    }

    /// Current roster text and user count
    pub async fn roster(&self) -> (String, usize) {
        let sessions = self.sessions.lock().await;
        let text = format_roster(sessions.iter().map(|s| s.username.as_str()));
        (text, sessions.len())
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no session is registered
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Empty the registry, sending each session `farewell` (best-effort)
    /// and then closing it
    pub async fn shutdown(&self, farewell: &[SignedPayload]) -> usize {
        let mut sessions = self.sessions.lock().await;
        let drained: Vec<SessionHandle> = sessions.drain(..).collect();

        for session in &drained {
            for signed in farewell {
                match session.sealer.encrypt(signed) {
                    Ok(envelope) => {
                        session
                            .writer
                            .send_best_effort(&Frame::SecureEnvelope(envelope))
                            .await
                    }
                    Err(e) => warn!("Could not seal farewell for {}: {}", session.id, e),
                }
            }
            session.writer.close().await;
        }

        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::crypto::{Identity, SymmetricKey};
    use crate::session::{ChatMessage, EnvelopeOpener, Opened, Payload};
    use crate::transport::memory::{self, MemoryReader, MemoryWriter};
    use crate::transport::{FrameSink, FrameSource, TransportResult};

    /// Sink whose first write parks until the test opens the gate
    struct GatedSink {
        inner: MemoryWriter,
        entered: Arc<Notify>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl FrameSink for GatedSink {
        async fn send(&mut self, data: &[u8]) -> TransportResult<()> {
            if let Some(gate) = self.gate.take() {
                self.entered.notify_one();
                gate.notified().await;
            }
            self.inner.send(data).await
        }

        async fn close(&mut self) -> TransportResult<()> {
            self.inner.close().await
        }
    }

    struct Peer {
        reader: MemoryReader,
    }

    fn session(
        id: ConnectionId,
        name: &str,
        sealer: &Arc<EnvelopeSealer>,
    ) -> (SessionHandle, Peer) {
        let (server_end, client_end) = memory::create_pair();
        let handle = SessionHandle {
            id,
            username: name.to_string(),
            writer: SessionWriter::new(server_end.writer),
            sealer: sealer.clone(),
        };
        (
            handle,
            Peer {
                reader: client_end.reader,
            },
        )
    }

    fn shared_sealer() -> (Arc<Identity>, SymmetricKey, Arc<EnvelopeSealer>) {
        let identity = Arc::new(Identity::generate());
        let key = SymmetricKey::generate();
        let sealer = Arc::new(EnvelopeSealer::new(identity.clone(), key.clone()));
        (identity, key, sealer)
    }

    #[tokio::test]
    async fn test_add_rejects_duplicates() {
        let (_, _, sealer) = shared_sealer();
        let registry = Registry::new();
        let (first, _p1) = session(1, "alice", &sealer);
        let (again, _p2) = session(1, "mallory", &sealer);

        registry.add(first).await.unwrap();
        assert_eq!(
            registry.add(again).await,
            Err(RegistryError::DuplicateConnection(1))
        );
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let registry = Registry::new();
        assert!(registry.remove(42).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_each_session_once() {
        let (identity, key, sealer) = shared_sealer();
        let registry = Registry::new();
        let mut peers = Vec::new();
        for (id, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
            let (handle, peer) = session(id, name, &sealer);
            registry.add(handle).await.unwrap();
            peers.push(peer);
        }

        let payload = Payload::Chat(ChatMessage::from_user("alice", "hi"));
        let delivered = registry.broadcast(&sealer.sign(&payload).unwrap()).await;
        assert_eq!(delivered, 3);

        let opener = EnvelopeOpener::new(*identity.public_key(), key);
        let mut received = Vec::new();
        for peer in &mut peers {
            let bytes = peer.reader.receive().await.unwrap();
            match Frame::from_bytes(&bytes).unwrap() {
                Frame::SecureEnvelope(envelope) => match opener.open(&envelope).unwrap() {
                    Opened::Verified(signed) => assert_eq!(signed.payload().unwrap(), payload),
                    Opened::BadSignature(_) => panic!("Broadcast signature rejected"),
                },
                other => panic!("Unexpected frame {:?}", other),
            }
            received.push(bytes);
        }

        // Shared key: one envelope for everybody
        assert!(received.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_broadcast_per_session_keys() {
        let identity = Arc::new(Identity::generate());
        let registry = Registry::new();
        let mut peers = Vec::new();
        for id in 1..=2 {
            let key = SymmetricKey::generate();
            let sealer = Arc::new(EnvelopeSealer::new(identity.clone(), key.clone()));
            let (handle, peer) = session(id, "user", &sealer);
            registry.add(handle).await.unwrap();
            peers.push((peer, EnvelopeOpener::new(*identity.public_key(), key)));
        }

        let signed = SignedPayload::sign(&identity, &Payload::Disconnect).unwrap();
        assert_eq!(registry.broadcast(&signed).await, 2);

        for (peer, opener) in &mut peers {
            let frame = Frame::from_bytes(&peer.reader.receive().await.unwrap()).unwrap();
            let Frame::SecureEnvelope(envelope) = frame else {
                panic!("Expected envelope");
            };
            assert!(matches!(opener.open(&envelope).unwrap(), Opened::Verified(_)));
        }
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_broadcast() {
        let (_, _, sealer) = shared_sealer();
        let registry = Registry::new();

        let (alice, mut alice_peer) = session(1, "alice", &sealer);
        let (bob, bob_peer) = session(2, "bob", &sealer);
        let (carol, mut carol_peer) = session(3, "carol", &sealer);
        let bob_writer = bob.writer.clone();
        for handle in [alice, bob, carol] {
            registry.add(handle).await.unwrap();
        }

        // Bob's connection is gone
        drop(bob_peer);

        let delivered = registry.broadcast(&sealer.sign(&Payload::Disconnect).unwrap()).await;
        assert_eq!(delivered, 2);
        assert!(bob_writer.is_closed());
        assert!(alice_peer.reader.receive().await.is_ok());
        assert!(carol_peer.reader.receive().await.is_ok());
    }

    #[tokio::test]
    async fn test_roster_in_registration_order() {
        let (_, _, sealer) = shared_sealer();
        let registry = Registry::new();
        let mut peers = Vec::new();
        for (id, name) in [(7, "zoe"), (2, "adam")] {
            let (handle, peer) = session(id, name, &sealer);
            registry.add(handle).await.unwrap();
            peers.push(peer);
        }

        let (text, count) = registry.roster().await;
        assert_eq!(text, " zoe \n adam \n");
        assert_eq!(count, 2);

        registry.remove(7).await.unwrap();
        assert_eq!(registry.roster().await, (" adam \n".to_string(), 1));
    }

    #[tokio::test]
    async fn test_shutdown_sends_farewell_and_closes() {
        let (_, _, sealer) = shared_sealer();
        let registry = Registry::new();
        let (handle, mut peer) = session(1, "alice", &sealer);
        let writer = handle.writer.clone();
        registry.add(handle).await.unwrap();

        let farewell = [
            sealer.sign(&Payload::Chat(ChatMessage::system("bye"))).unwrap(),
            sealer.sign(&Payload::Disconnect).unwrap(),
        ];
        assert_eq!(registry.shutdown(&farewell).await, 1);

        for _ in 0..2 {
            let frame = Frame::from_bytes(&peer.reader.receive().await.unwrap()).unwrap();
            assert!(matches!(frame, Frame::SecureEnvelope(_)));
        }
        assert!(peer.reader.receive().await.unwrap_err().is_closed());
        assert!(writer.is_closed());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_session_added_mid_broadcast_sees_only_later_broadcasts() {
        let (identity, key, sealer) = shared_sealer();
        let opener = EnvelopeOpener::new(*identity.public_key(), key);
        let registry = Registry::new();

        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let (server_end, mut alice_peer) = memory::create_pair();
        registry
            .add(SessionHandle {
                id: 1,
                username: "alice".to_string(),
                writer: SessionWriter::new(GatedSink {
                    inner: server_end.writer,
                    entered: entered.clone(),
                    gate: Some(gate.clone()),
                }),
                sealer: sealer.clone(),
            })
            .await
            .unwrap();

        let first = Payload::Chat(ChatMessage::from_user("alice", "first"));
        let second = Payload::Chat(ChatMessage::from_user("alice", "second"));

        let broadcast = tokio::spawn({
            let registry = registry.clone();
            let signed = sealer.sign(&first).unwrap();
            async move { registry.broadcast(&signed).await }
        });
        entered.notified().await;

        let (bob, mut bob_peer) = session(2, "bob", &sealer);
        let add = tokio::spawn({
            let registry = registry.clone();
            async move { registry.add(bob).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!broadcast.is_finished());
        assert!(!add.is_finished(), "add completed while a broadcast held the registry");

        gate.notify_one();
        assert_eq!(broadcast.await.unwrap(), 1);
        add.await.unwrap().unwrap();
        assert_eq!(registry.len().await, 2);

        assert_eq!(registry.broadcast(&sealer.sign(&second).unwrap()).await, 2);

        let open = |bytes: Vec<u8>| match Frame::from_bytes(&bytes).unwrap() {
            Frame::SecureEnvelope(envelope) => match opener.open(&envelope).unwrap() {
                Opened::Verified(signed) => signed.payload().unwrap(),
                Opened::BadSignature(_) => panic!("Broadcast signature rejected"),
            },
            other => panic!("Unexpected frame {:?}", other),
        };

        assert_eq!(open(alice_peer.reader.receive().await.unwrap()), first);
        assert_eq!(open(alice_peer.reader.receive().await.unwrap()), second);

        assert_eq!(open(bob_peer.reader.receive().await.unwrap()), second);
        let extra = tokio::time::timeout(Duration::from_millis(50), bob_peer.reader.receive()).await;
        assert!(extra.is_err(), "late joiner received an extra frame");
    }
}
