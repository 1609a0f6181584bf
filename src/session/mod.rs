//! Secure chat sessions
//!
//! A session is one TCP connection after (or during) key establishment:
//! - `handshake`: the key-advertisement state machine
//! - `envelope`: sign-then-encrypt codec bound to the agreed keys
//! - `payload`: chat, roster and disconnect messages carried in envelopes
//! - `connection`: serialized writer and cancellable receive side

mod connection;
mod envelope;
mod handshake;
mod payload;

pub use connection::{drive_handshake, EndReason, FrameReceiver, Inbound, SessionWriter};
pub(crate) use connection::shutdown_requested;
pub use envelope::{EnvelopeOpener, EnvelopeSealer, Opened, SignedPayload};
pub use handshake::{Handshake, HandshakeState, SessionKeys, Step};
pub use payload::{ChatMessage, Payload, RosterUpdate};

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::transport::TransportError;

/// Identifier the server assigns to each accepted connection
pub type ConnectionId = u64;

/// Which end of a connection a session runs on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Initiates the TCP connection and receives the symmetric key
    Client,
    /// Accepts connections and hands out the symmetric key
    Server,
}

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Advertised key material could not be decoded
    #[error("Key format error: {0}")]
    KeyFormat(CryptoError),

    /// Encryption, decryption or envelope failure
    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    /// Peer sent something that does not fit the protocol
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Underlying transport failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Peer went away or refused before keys were agreed
    #[error("Handshake aborted: {0}")]
    HandshakeAborted(String),

    /// Operation not allowed in the current handshake state
    #[error("Invalid state: {0:?}")]
    InvalidState(HandshakeState),
}

impl From<CryptoError> for SessionError {
    fn from(e: CryptoError) -> Self {
        if e.is_key_format() {
            SessionError::KeyFormat(e)
        } else {
            SessionError::Crypto(e)
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
