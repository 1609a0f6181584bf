//! Per-connection plumbing shared by client and server
//!
//! [`SessionWriter`] serializes every write to one peer and carries a
//! close flag; [`FrameReceiver`] owns the reading half and turns socket
//! events, local close and server shutdown into a single stream of
//! [`Inbound`] items.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::transport::{Frame, FrameSink, FrameSource, TransportError, TransportResult};

use super::handshake::{Handshake, SessionKeys, Step};
use super::SessionError;

/// Why a session's receive loop stopped
#[derive(Debug)]
pub enum EndReason {
    /// Peer sent a Disconnect (plain or sealed)
    PeerDisconnect,
    /// Stream ended without a Disconnect
    PeerClosed,
    /// Closed from this side: explicit close, broken write or server shutdown
    LocalShutdown,
    /// Unrecoverable protocol, crypto or I/O failure
    Failed(SessionError),
}

impl EndReason {
    /// A termination the peer asked for
    pub fn is_graceful(&self) -> bool {
        matches!(self, EndReason::PeerDisconnect)
    }

    /// Whether the peer should be told we are leaving
    pub fn should_notify_peer(&self) -> bool {
        matches!(self, EndReason::LocalShutdown | EndReason::Failed(_))
    }

    /// Error to report when a session ends before it was established
    pub fn into_error(self) -> SessionError {
        match self {
            EndReason::Failed(e) => e,
            other => SessionError::HandshakeAborted(other.to_string()),
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::PeerDisconnect => f.write_str("peer disconnected"),
            EndReason::PeerClosed => f.write_str("connection closed by peer"),
            EndReason::LocalShutdown => f.write_str("closed locally"),
            EndReason::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Serialized, closeable writing half of a connection
///
/// Cloned into the registry and the receive loop; all clones write through
/// the same lock, so frames from concurrent broadcasts never interleave.
#[derive(Clone)]
pub struct SessionWriter {
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl SessionWriter {
    /// Wrap a transport sink
    pub fn new<S: FrameSink + 'static>(sink: S) -> Self {
        let (closed, _) = watch::channel(false);
        SessionWriter {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            closed: Arc::new(closed),
        }
    }

    /// Write one frame
    pub async fn send_frame(&self, frame: &Frame) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Disconnected);
        }
        let bytes = frame.to_bytes()?;
        let mut sink = self.sink.lock().await;
        sink.send(&bytes).await
    }

    /// Write a frame, logging instead of failing
    pub async fn send_best_effort(&self, frame: &Frame) {
        if let Err(e) = self.send_frame(frame).await {
            debug!("Dropped {} frame: {}", frame.kind_name(), e);
        }
    }

    /// Close the connection from this side
    ///
    /// Idempotent. Wakes the receive loop, which then ends with
    /// [`EndReason::LocalShutdown`].
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!("Error closing connection: {}", e);
        }
    }

    /// Whether [`Self::close`] has been called
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn close_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

impl std::fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWriter")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// One item from the receive side
#[derive(Debug)]
pub enum Inbound {
    /// A decoded frame
    Frame(Frame),
    /// The connection is over
    End(EndReason),
}

/// Reading half of a connection, cancellable from the writer or by a
/// server-wide shutdown signal
pub struct FrameReceiver<R> {
    source: R,
    closed: watch::Receiver<bool>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<R: FrameSource> FrameReceiver<R> {
    /// Reader that stops when `writer` is closed
    pub fn new(source: R, writer: &SessionWriter) -> Self {
        FrameReceiver {
            source,
            closed: writer.close_signal(),
            shutdown: None,
        }
    }

    /// Also stop when `shutdown` flips to `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn stopped(&self) -> bool {
        *self.closed.borrow() || self.shutdown.as_ref().map_or(false, |s| *s.borrow())
    }

    /// Wait for the next frame or the end of the connection
    pub async fn next(&mut self) -> Inbound {
        if self.stopped() {
            return Inbound::End(EndReason::LocalShutdown);
        }

        let FrameReceiver {
            source,
            closed,
            shutdown,
        } = self;

        tokio::select! {
            _ = raised(closed) => Inbound::End(EndReason::LocalShutdown),
            _ = shutdown_requested(shutdown.as_mut()) => Inbound::End(EndReason::LocalShutdown),
            received = source.receive() => match received {
                Ok(bytes) => match Frame::from_bytes(&bytes) {
                    Ok(frame) => Inbound::Frame(frame),
                    Err(e) => Inbound::End(EndReason::Failed(e.into())),
                },
                Err(e) if e.is_closed() => Inbound::End(EndReason::PeerClosed),
                Err(e) => Inbound::End(EndReason::Failed(e.into())),
            },
        }
    }
}

/// Resolves once the flag reads `true`; pends forever if every writer is gone
async fn raised(flag: &mut watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        if flag.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Resolves once shutdown is requested or the server has gone away
pub(crate) async fn shutdown_requested(signal: Option<&mut watch::Receiver<bool>>) {
    let Some(signal) = signal else {
        return std::future::pending().await;
    };
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}

/// Run a handshake over a live connection until keys are agreed
///
/// Envelopes that arrive early are logged and dropped. On failure the
/// handshake is left `Aborted` and the caller decides whether to tell the
/// peer (see [`EndReason::should_notify_peer`]).
pub async fn drive_handshake<R: FrameSource>(
    handshake: &mut Handshake,
    receiver: &mut FrameReceiver<R>,
    writer: &SessionWriter,
) -> Result<SessionKeys, EndReason> {
    let send_failed = |e: TransportError| EndReason::Failed(e.into());

    if let Some(hello) = handshake.start().map_err(EndReason::Failed)? {
        writer.send_frame(&hello).await.map_err(send_failed)?;
    }

    loop {
        match receiver.next().await {
            Inbound::Frame(Frame::KeyAdvertisement(adv)) => match handshake.handle(adv) {
                Ok(Step::Send(frame)) => writer.send_frame(&frame).await.map_err(send_failed)?,
                Ok(Step::Established { reply, keys }) => {
                    if let Some(reply) = reply {
                        writer.send_frame(&reply).await.map_err(send_failed)?;
                    }
                    return Ok(keys);
                }
                Err(e) => return Err(EndReason::Failed(e)),
            },
            Inbound::Frame(Frame::SecureEnvelope(_)) => {
                warn!(
                    "Envelope received in handshake state {:?}, dropped",
                    handshake.state()
                );
            }
            Inbound::Frame(Frame::Disconnect) => {
                handshake.abort();
                return Err(EndReason::PeerDisconnect);
            }
            Inbound::End(reason) => {
                handshake.abort();
                return Err(reason);
            }
        }
    }
}
