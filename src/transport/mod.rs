//! Transport layer abstraction
//!
//! This module provides the byte-moving half of the protocol:
//! - TCP connections with length-prefixed framing (the real transport)
//! - In-memory channels (for testing)
//! - The versioned [`Frame`] codec that rides on top of both
//!
//! # Design
//!
//! A connection is split into a [`FrameSource`] owned by the receive loop and
//! a [`FrameSink`] shared by everything that writes to the peer. The transport
//! only moves bytes; signing and encryption are handled by the session layer.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub mod frame;
pub mod tcp;

pub use frame::{Frame, KeyAdvertisement, KeyKind, SecureEnvelope, WIRE_VERSION};
pub use tcp::{TcpFrameReader, TcpFrameWriter};

/// Default upper bound on a single frame body (1 MiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed by the peer or locally
    #[error("Connection closed")]
    Disconnected,

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error means the stream simply ended (EOF, reset or a
    /// closed channel) rather than carrying garbage
    pub fn is_closed(&self) -> bool {
        match self {
            TransportError::Disconnected => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Writing half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame body to the peer
    async fn send(&mut self, data: &[u8]) -> TransportResult<()>;

    /// Close the writing half; the peer observes end-of-stream
    async fn close(&mut self) -> TransportResult<()>;
}

/// Reading half of a connection
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame body
    ///
    /// Blocks until data is available or the connection is closed.
    async fn receive(&mut self) -> TransportResult<Vec<u8>>;
}

/// Write a length-prefixed frame body
pub async fn write_length_prefixed<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> TransportResult<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| TransportError::SendFailed(format!("frame too large: {} bytes", data.len())))?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed frame body, rejecting bodies over `max_len`
pub async fn read_length_prefixed<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> TransportResult<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > max_len {
        return Err(TransportError::InvalidData(format!(
            "frame too large: {} bytes (max {})",
            len, max_len
        )));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

/// In-memory transport for testing
///
/// Uses channels to simulate a connection between two endpoints.
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;

    /// One side of an in-memory connection
    pub struct MemoryEndpoint {
        /// Reading half
        pub reader: MemoryReader,
        /// Writing half
        pub writer: MemoryWriter,
    }

    /// Create a pair of connected in-memory endpoints
    pub fn create_pair() -> (MemoryEndpoint, MemoryEndpoint) {
        let (tx1, rx1) = mpsc::channel(100);
        let (tx2, rx2) = mpsc::channel(100);

        let first = MemoryEndpoint {
            reader: MemoryReader { rx: rx2 },
            writer: MemoryWriter { tx: Some(tx1) },
        };
        let second = MemoryEndpoint {
            reader: MemoryReader { rx: rx1 },
            writer: MemoryWriter { tx: Some(tx2) },
        };

        (first, second)
    }

    /// In-memory reading half
    pub struct MemoryReader {
        rx: mpsc::Receiver<Vec<u8>>,
    }

    /// In-memory writing half
    pub struct MemoryWriter {
        tx: Option<mpsc::Sender<Vec<u8>>>,
    }

    #[async_trait]
    impl FrameSink for MemoryWriter {
        async fn send(&mut self, data: &[u8]) -> TransportResult<()> {
            let tx = self.tx.as_ref().ok_or(TransportError::Disconnected)?;
            tx.send(data.to_vec())
                .await
                .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
        }

        async fn close(&mut self) -> TransportResult<()> {
            // Dropping the sender ends the peer's stream
            self.tx = None;
            Ok(())
        }
    }

    #[async_trait]
    impl FrameSource for MemoryReader {
        async fn receive(&mut self) -> TransportResult<Vec<u8>> {
            self.rx.recv().await.ok_or(TransportError::Disconnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_transport() {
        let (mut alice, mut bob) = memory::create_pair();

        alice.writer.send(b"Hello Bob").await.unwrap();
        assert_eq!(bob.reader.receive().await.unwrap(), b"Hello Bob");

        bob.writer.send(b"Hello Alice").await.unwrap();
        assert_eq!(alice.reader.receive().await.unwrap(), b"Hello Alice");
    }

    #[tokio::test]
    async fn test_memory_transport_close() {
        let (mut alice, mut bob) = memory::create_pair();

        alice.writer.close().await.unwrap();
        assert!(alice.writer.send(b"test").await.is_err());

        let err = bob.reader.receive().await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_length_prefixed_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_length_prefixed(&mut client, b"frame one").await.unwrap();
        write_length_prefixed(&mut client, b"").await.unwrap();

        let first = read_length_prefixed(&mut server, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap();
        let second = read_length_prefixed(&mut server, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap();
        assert_eq!(first, b"frame one");
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_length_prefixed(&mut client, &[0u8; 64]).await.unwrap();
        let err = read_length_prefixed(&mut server, 32).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_eof_is_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = read_length_prefixed(&mut server, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }
}
