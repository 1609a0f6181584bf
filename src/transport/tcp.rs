//! TCP transport for chat connections.
//!
//! Wraps a tokio `TcpStream`, split into owned halves so the receive loop and
//! the writers never contend on the same object.

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use super::{
    read_length_prefixed, write_length_prefixed, FrameSink, FrameSource, TransportError,
    TransportResult,
};

/// Reading half of a TCP connection
pub struct TcpFrameReader {
    reader: BufReader<OwnedReadHalf>,
    max_frame_len: usize,
}

/// Writing half of a TCP connection
pub struct TcpFrameWriter {
    writer: OwnedWriteHalf,
    closed: bool,
}

/// Split an accepted or connected stream into framed halves
pub fn split(stream: TcpStream, max_frame_len: usize) -> (TcpFrameReader, TcpFrameWriter) {
    // Chat frames are small and latency matters more than batching
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    (
        TcpFrameReader {
            reader: BufReader::new(read_half),
            max_frame_len,
        },
        TcpFrameWriter {
            writer: write_half,
            closed: false,
        },
    )
}

/// Connect to a remote address and split the stream
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    max_frame_len: usize,
) -> TransportResult<(TcpFrameReader, TcpFrameWriter)> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    Ok(split(stream, max_frame_len))
}

#[async_trait]
impl FrameSink for TcpFrameWriter {
    async fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }
        write_length_prefixed(&mut self.writer, data).await
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl FrameSource for TcpFrameReader {
    async fn receive(&mut self) -> TransportResult<Vec<u8>> {
        read_length_prefixed(&mut self.reader, self.max_frame_len).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Frame, DEFAULT_MAX_FRAME_LEN};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let (mut reader, mut writer) = connect(addr, DEFAULT_MAX_FRAME_LEN).await.unwrap();

            writer.send(&Frame::Disconnect.to_bytes().unwrap()).await.unwrap();
            let reply = reader.receive().await.unwrap();
            assert_eq!(reply, b"ack");

            writer.close().await.unwrap();
            assert!(writer.send(b"late").await.is_err());
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (mut reader, mut writer) = split(stream, DEFAULT_MAX_FRAME_LEN);

        let frame = Frame::from_bytes(&reader.receive().await.unwrap()).unwrap();
        assert_eq!(frame, Frame::Disconnect);
        writer.send(b"ack").await.unwrap();

        // Client shut down its write half
        let err = reader.receive().await.unwrap_err();
        assert!(err.is_closed());

        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_multiple_frames_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let (_reader, mut writer) = connect(addr, DEFAULT_MAX_FRAME_LEN).await.unwrap();
            for i in 0..10u8 {
                writer.send(&[i; 3]).await.unwrap();
            }
            writer.close().await.unwrap();
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (mut reader, _writer) = split(stream, DEFAULT_MAX_FRAME_LEN);

        for i in 0..10u8 {
            assert_eq!(reader.receive().await.unwrap(), vec![i; 3]);
        }

        client_task.await.unwrap();
    }
}
