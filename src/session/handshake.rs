//! Key-establishment handshake
//!
//! Sans-IO: [`Handshake`] consumes inbound key advertisements and yields the
//! frames to write back. The caller owns the socket.
//!
//! ```text
//! Server                                   Client
//!   | -- KeyAdvertisement(PUBLIC_KEY) ----->  |  INIT -> AWAIT_PEER_PUBLIC_KEY
//!   |  <---- KeyAdvertisement(PUBLIC_KEY,     |  -> AWAIT_SYMMETRIC_KEY
//!   |                          owner=user) -  |
//!   | -- KeyAdvertisement(SECRET_KEY) ----->  |  -> ESTABLISHED
//!   |  ESTABLISHED                            |
//! ```
//!
//! The SECRET_KEY advertisement carries the symmetric key encrypted to the
//! client's public key. Any failure moves the machine to `Aborted`; it never
//! leaves a terminal state.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::debug;

use crate::crypto::{open_with, seal_to, CryptoError, Identity, PublicKey, SymmetricKey};
use crate::transport::{Frame, KeyAdvertisement, KeyKind};

use super::envelope::{EnvelopeOpener, EnvelopeSealer};
use super::{Role, SessionError, SessionResult};

/// Where a handshake currently stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing exchanged yet
    Init,
    /// Client waiting for the server's public key
    AwaitPeerPublicKey,
    /// Client waiting for the encrypted symmetric key
    AwaitSymmetricKey,
    /// Server waiting for the client's public key and username
    AwaitClientPublicKey,
    /// Keys agreed, envelopes may flow
    Established,
    /// Handshake failed; the connection must be dropped
    Aborted,
}

impl HandshakeState {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Established | HandshakeState::Aborted)
    }
}

/// Everything a session needs once keys are agreed
#[derive(Debug)]
pub struct SessionKeys {
    /// The peer's public key, used to verify its signatures
    pub peer_public_key: PublicKey,
    /// Symmetric key both ends now hold
    pub symmetric_key: SymmetricKey,
    /// Our outbound codec
    pub sealer: EnvelopeSealer,
    /// Inbound codec bound to the peer
    pub opener: EnvelopeOpener,
    /// Username the client advertised (server side only)
    pub username: Option<String>,
}

/// Result of feeding one advertisement to the handshake
#[derive(Debug)]
pub enum Step {
    /// Send this frame and keep waiting
    Send(Frame),
    /// Handshake complete; send `reply` if present, then switch to envelopes
    Established {
        /// Final frame to write before any envelope
        reply: Option<Frame>,
        /// Agreed session keys
        keys: SessionKeys,
    },
}

enum Side {
    Client { username: String },
    Server { symmetric_key: SymmetricKey },
}

/// Handshake state machine for one connection
pub struct Handshake {
    identity: Arc<Identity>,
    side: Side,
    state: HandshakeState,
    peer: Option<PublicKey>,
}

impl Handshake {
    /// Client handshake that will advertise `username`
    pub fn client(identity: Arc<Identity>, username: impl Into<String>) -> Self {
        Handshake {
            identity,
            side: Side::Client {
                username: username.into(),
            },
            state: HandshakeState::Init,
            peer: None,
        }
    }

    /// Server handshake that will hand out `symmetric_key`
    pub fn server(identity: Arc<Identity>, symmetric_key: SymmetricKey) -> Self {
        Handshake {
            identity,
            side: Side::Server { symmetric_key },
            state: HandshakeState::Init,
            peer: None,
        }
    }

    /// Which end of the connection this is
    pub fn role(&self) -> Role {
        match self.side {
            Side::Client { .. } => Role::Client,
            Side::Server { .. } => Role::Server,
        }
    }

    /// Current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Leave `Init`
    ///
    /// The server returns its public key advertisement, which must be the
    /// first frame on the wire. The client has nothing to send.
    pub fn start(&mut self) -> SessionResult<Option<Frame>> {
        if self.state != HandshakeState::Init {
            return Err(SessionError::InvalidState(self.state));
        }

        match &self.side {
            Side::Client { .. } => {
                self.state = HandshakeState::AwaitPeerPublicKey;
                Ok(None)
            }
            Side::Server { .. } => {
                self.state = HandshakeState::AwaitClientPublicKey;
                Ok(Some(Frame::KeyAdvertisement(KeyAdvertisement {
                    owner: None,
                    key: self.identity.encode_public_key(),
                    kind: KeyKind::PublicKey,
                })))
            }
        }
    }

    /// Mark the handshake failed
    pub fn abort(&mut self) {
        self.state = HandshakeState::Aborted;
    }

    /// Feed one inbound key advertisement
    ///
    /// Any error leaves the machine in `Aborted`. Input after a terminal
    /// state is rejected without changing it.
    pub fn handle(&mut self, advertisement: KeyAdvertisement) -> SessionResult<Step> {
        if self.state.is_terminal() {
            return Err(SessionError::InvalidState(self.state));
        }
        let result = self.transition(advertisement);
        match &result {
            Ok(Step::Established { .. }) => self.state = HandshakeState::Established,
            Ok(Step::Send(_)) => {}
            Err(_) => self.state = HandshakeState::Aborted,
        }
        result
    }

    fn transition(&mut self, adv: KeyAdvertisement) -> SessionResult<Step> {
        match (self.state, adv.kind) {
            (HandshakeState::AwaitPeerPublicKey, KeyKind::PublicKey) => {
                let server_key = PublicKey::from_base64(&adv.key)?;
                debug!("Server public key {}", server_key.fingerprint());
                let username = match &self.side {
                    Side::Client { username } => username.clone(),
                    Side::Server { .. } => return Err(SessionError::InvalidState(self.state)),
                };
                self.peer = Some(server_key);
                self.state = HandshakeState::AwaitSymmetricKey;
                Ok(Step::Send(Frame::KeyAdvertisement(KeyAdvertisement {
                    owner: Some(username),
                    key: self.identity.encode_public_key(),
                    kind: KeyKind::PublicKey,
                })))
            }

            (HandshakeState::AwaitSymmetricKey, KeyKind::SecretKey) => {
                let sealed = BASE64
                    .decode(adv.key.trim())
                    .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
                let raw = open_with(&self.identity, &sealed)?;
                let symmetric_key = SymmetricKey::from_bytes(&raw)?;
                let peer = self
                    .peer
                    .ok_or(SessionError::InvalidState(self.state))?;

                Ok(Step::Established {
                    reply: None,
                    keys: SessionKeys {
                        peer_public_key: peer,
                        sealer: EnvelopeSealer::new(self.identity.clone(), symmetric_key.clone()),
                        opener: EnvelopeOpener::new(peer, symmetric_key.clone()),
                        symmetric_key,
                        username: None,
                    },
                })
            }

            (HandshakeState::AwaitClientPublicKey, KeyKind::PublicKey) => {
                let username = match adv.owner {
                    Some(owner) if !owner.is_empty() => owner,
                    _ => {
                        return Err(SessionError::ProtocolViolation(
                            "client public key carries no username".to_string(),
                        ))
                    }
                };
                let client_key = PublicKey::from_base64(&adv.key)?;
                let symmetric_key = match &self.side {
                    Side::Server { symmetric_key } => symmetric_key.clone(),
                    Side::Client { .. } => return Err(SessionError::InvalidState(self.state)),
                };
                let sealed = seal_to(&client_key, symmetric_key.as_bytes())?;
                debug!(
                    "Client {} public key {}",
                    username,
                    client_key.fingerprint()
                );

                self.peer = Some(client_key);
                Ok(Step::Established {
                    reply: Some(Frame::KeyAdvertisement(KeyAdvertisement {
                        owner: None,
                        key: BASE64.encode(sealed),
                        kind: KeyKind::SecretKey,
                    })),
                    keys: SessionKeys {
                        peer_public_key: client_key,
                        sealer: EnvelopeSealer::new(self.identity.clone(), symmetric_key.clone()),
                        opener: EnvelopeOpener::new(client_key, symmetric_key.clone()),
                        symmetric_key,
                        username: Some(username),
                    },
                })
            }

            (HandshakeState::Init, _) => Err(SessionError::InvalidState(self.state)),

            (state, kind) => Err(SessionError::ProtocolViolation(format!(
                "unexpected {:?} advertisement in state {:?}",
                kind, state
            ))),
        }
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("role", &self.role())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::payload::{ChatMessage, Payload};
    use crate::session::Opened;

    fn advertisement(frame: Frame) -> KeyAdvertisement {
        match frame {
            Frame::KeyAdvertisement(adv) => adv,
            other => panic!("Expected key advertisement, got {:?}", other),
        }
    }

    fn run_handshake(
        username: &str,
    ) -> (Handshake, SessionKeys, Handshake, SessionKeys) {
        let mut server = Handshake::server(Arc::new(Identity::generate()), SymmetricKey::generate());
        let mut client = Handshake::client(Arc::new(Identity::generate()), username);

        let server_hello = server.start().unwrap().unwrap();
        assert!(client.start().unwrap().is_none());
        assert_eq!(client.state(), HandshakeState::AwaitPeerPublicKey);
        assert_eq!(server.state(), HandshakeState::AwaitClientPublicKey);

        let client_hello = match client.handle(advertisement(server_hello)).unwrap() {
            Step::Send(frame) => frame,
            other => panic!("Unexpected step {:?}", other),
        };
        assert_eq!(client.state(), HandshakeState::AwaitSymmetricKey);

        let (reply, server_keys) = match server.handle(advertisement(client_hello)).unwrap() {
            Step::Established { reply, keys } => (reply.unwrap(), keys),
            other => panic!("Unexpected step {:?}", other),
        };

        let client_keys = match client.handle(advertisement(reply)).unwrap() {
            Step::Established { reply, keys } => {
                assert!(reply.is_none());
                keys
            }
            other => panic!("Unexpected step {:?}", other),
        };

        (server, server_keys, client, client_keys)
    }

    #[test]
    fn test_full_handshake() {
        let (server, server_keys, client, client_keys) = run_handshake("alice");

        assert_eq!(server.state(), HandshakeState::Established);
        assert_eq!(client.state(), HandshakeState::Established);
        assert_eq!(server_keys.username.as_deref(), Some("alice"));
        assert!(client_keys.username.is_none());
        assert_eq!(server_keys.symmetric_key, client_keys.symmetric_key);

        // Both directions work under the transported key
        let payload = Payload::Chat(ChatMessage::from_user("alice", "hi"));
        let envelope = client_keys.sealer.seal(&payload).unwrap();
        match server_keys.opener.open(&envelope).unwrap() {
            Opened::Verified(signed) => assert_eq!(signed.payload().unwrap(), payload),
            Opened::BadSignature(_) => panic!("Valid signature rejected"),
        }

        let envelope = server_keys.sealer.seal(&Payload::Disconnect).unwrap();
        assert!(matches!(
            client_keys.opener.open(&envelope).unwrap(),
            Opened::Verified(_)
        ));
    }

    #[test]
    fn test_client_advertises_username() {
        let mut server = Handshake::server(Arc::new(Identity::generate()), SymmetricKey::generate());
        let mut client = Handshake::client(Arc::new(Identity::generate()), "bob");

        let hello = server.start().unwrap().unwrap();
        client.start().unwrap();
        match client.handle(advertisement(hello)).unwrap() {
            Step::Send(Frame::KeyAdvertisement(adv)) => {
                assert_eq!(adv.owner.as_deref(), Some("bob"));
                assert_eq!(adv.kind, KeyKind::PublicKey);
            }
            other => panic!("Unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_malformed_server_key_aborts() {
        let mut client = Handshake::client(Arc::new(Identity::generate()), "alice");
        client.start().unwrap();

        let err = client
            .handle(KeyAdvertisement {
                owner: None,
                key: "%%% not a key %%%".to_string(),
                kind: KeyKind::PublicKey,
            })
            .unwrap_err();

        assert!(matches!(err, SessionError::KeyFormat(_)));
        assert_eq!(client.state(), HandshakeState::Aborted);
    }

    #[test]
    fn test_missing_username_aborts() {
        for owner in [None, Some(String::new())] {
            let mut server =
                Handshake::server(Arc::new(Identity::generate()), SymmetricKey::generate());
            server.start().unwrap();
            let err = server
                .handle(KeyAdvertisement {
                    owner,
                    key: Identity::generate().encode_public_key(),
                    kind: KeyKind::PublicKey,
                })
                .unwrap_err();
            assert!(matches!(err, SessionError::ProtocolViolation(_)));
            assert_eq!(server.state(), HandshakeState::Aborted);
        }
    }

    #[test]
    fn test_server_accepts_any_non_empty_username() {
        for name in [" ", "  x  ", "a-very-long-name-beyond-client-limits"] {
            let (server, server_keys, _, _) = run_handshake(name);
            assert_eq!(server.state(), HandshakeState::Established);
            assert_eq!(server_keys.username.as_deref(), Some(name));
        }
    }

    #[test]
    fn test_wrong_kind_aborts() {
        let mut server = Handshake::server(Arc::new(Identity::generate()), SymmetricKey::generate());
        server.start().unwrap();

        assert!(server
            .handle(KeyAdvertisement {
                owner: Some("alice".to_string()),
                key: "AAAA".to_string(),
                kind: KeyKind::SecretKey,
            })
            .is_err());
        assert_eq!(server.state(), HandshakeState::Aborted);
    }

    #[test]
    fn test_symmetric_key_for_someone_else_aborts() {
        let mut client = Handshake::client(Arc::new(Identity::generate()), "alice");
        client.start().unwrap();
        client
            .handle(KeyAdvertisement {
                owner: None,
                key: Identity::generate().encode_public_key(),
                kind: KeyKind::PublicKey,
            })
            .unwrap();

        let stranger = Identity::generate();
        let sealed = seal_to(stranger.public_key(), SymmetricKey::generate().as_bytes()).unwrap();
        let err = client
            .handle(KeyAdvertisement {
                owner: None,
                key: BASE64.encode(sealed),
                kind: KeyKind::SecretKey,
            })
            .unwrap_err();

        assert!(matches!(err, SessionError::Crypto(CryptoError::DecryptionFailed)));
        assert_eq!(client.state(), HandshakeState::Aborted);
    }

    #[test]
    fn test_terminal_states_reject_input() {
        let (mut server, _, _, _) = run_handshake("alice");
        let err = server
            .handle(KeyAdvertisement {
                owner: Some("mallory".to_string()),
                key: Identity::generate().encode_public_key(),
                kind: KeyKind::PublicKey,
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(HandshakeState::Established)));
        assert_eq!(server.state(), HandshakeState::Established);

        let mut client = Handshake::client(Arc::new(Identity::generate()), "alice");
        assert!(client.start().is_ok());
        assert!(client.start().is_err());
    }
}
