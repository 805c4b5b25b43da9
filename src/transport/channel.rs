//! In-memory transport.
//!
//! [`ChannelConnector`] hands every opened connection's far end to the
//! caller as a [`ChannelPeer`], which plays the backend: it pushes frames,
//! closes the stream, and inspects what the controller sent. Tests use it as
//! a scripted backend; embedders can bridge their own I/O through it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::{Connection, Connector, Inbound, OpenFuture, OpenRequest, FRAME_BUFFER};
use crate::{AppError, Result};

/// Connector whose connections are backed by in-memory channels.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    peers: mpsc::UnboundedSender<ChannelPeer>,
    failures: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
    receive_only: bool,
}

/// Receiving side for peers created by a [`ChannelConnector`].
#[derive(Debug)]
pub struct ChannelPeers {
    rx: mpsc::UnboundedReceiver<ChannelPeer>,
}

impl ChannelConnector {
    /// Bidirectional connector and the receiver for its peers.
    #[must_use]
    pub fn new() -> (Self, ChannelPeers) {
        Self::build(false)
    }

    /// Connector whose connections reject [`Connection::send`], like a
    /// chunked HTTP response.
    #[must_use]
    pub fn receive_only() -> (Self, ChannelPeers) {
        Self::build(true)
    }

    fn build(receive_only: bool) -> (Self, ChannelPeers) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                failures: Arc::new(AtomicUsize::new(0)),
                opened: Arc::new(AtomicUsize::new(0)),
                receive_only,
            },
            ChannelPeers { rx },
        )
    }

    /// Make the next `count` open attempts fail with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of open attempts so far, failed ones included.
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Connector for ChannelConnector {
    fn open(&self, request: OpenRequest) -> OpenFuture<'_> {
        Box::pin(async move {
            self.opened.fetch_add(1, Ordering::SeqCst);

            let refused = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                debug!(path = %request.path, "channel transport: refusing connection");
                return Err(AppError::Transport("connection refused".into()));
            }

            let (inbound_tx, inbound_rx) = mpsc::channel(FRAME_BUFFER);
            let cancel = CancellationToken::new();
            let (outbound_tx, sent) = if self.receive_only {
                (None, None)
            } else {
                let (tx, rx) = mpsc::channel(FRAME_BUFFER);
                (Some(tx), Some(rx))
            };

            let peer = ChannelPeer {
                request,
                frames: inbound_tx,
                sent,
                cancel: cancel.clone(),
            };
            self.peers
                .send(peer)
                .map_err(|_| AppError::Transport("channel peer receiver dropped".into()))?;

            Ok(Connection::new(outbound_tx, inbound_rx, cancel))
        })
    }
}

impl ChannelPeers {
    /// Wait for the next opened connection's peer.
    pub async fn next(&mut self) -> Option<ChannelPeer> {
        self.rx.recv().await
    }

    /// The next opened connection's peer, if one is ready.
    pub fn try_next(&mut self) -> Option<ChannelPeer> {
        self.rx.try_recv().ok()
    }
}

/// The backend end of one in-memory connection.
#[derive(Debug)]
pub struct ChannelPeer {
    /// The request the connection was opened with.
    pub request: OpenRequest,
    frames: mpsc::Sender<Inbound>,
    sent: Option<mpsc::Receiver<String>>,
    cancel: CancellationToken,
}

impl ChannelPeer {
    /// Deliver a raw frame to the controller.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the connection is gone or its
    /// buffer is full.
    pub fn push(&self, frame: impl Into<String>) -> Result<()> {
        self.frames
            .try_send(Inbound::Frame(frame.into()))
            .map_err(|e| AppError::Transport(format!("channel peer push failed: {e}")))
    }

    /// Deliver a JSON frame to the controller.
    ///
    /// # Errors
    ///
    /// Same as [`push`](Self::push).
    pub fn push_json(&self, frame: &serde_json::Value) -> Result<()> {
        self.push(frame.to_string())
    }

    /// Report a transport close to the controller.
    ///
    /// # Errors
    ///
    /// Same as [`push`](Self::push).
    pub fn close(&self, reason: &str) -> Result<()> {
        self.frames
            .try_send(Inbound::Closed {
                reason: reason.to_owned(),
            })
            .map_err(|e| AppError::Transport(format!("channel peer close failed: {e}")))
    }

    /// Next frame the controller sent, if one is queued.
    pub fn try_sent(&mut self) -> Option<String> {
        self.sent.as_mut().and_then(|rx| rx.try_recv().ok())
    }

    /// Wait for the next frame the controller sent.
    pub async fn next_sent(&mut self) -> Option<String> {
        match self.sent.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Drain and parse every queued outbound frame.
    pub fn drain_sent_json(&mut self) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Some(raw) = self.try_sent() {
            if let Ok(value) = serde_json::from_str(&raw) {
                frames.push(value);
            }
        }
        frames
    }

    /// Whether the controller aborted or closed the connection.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
