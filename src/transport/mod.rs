//! Transport adapters shared by every controller.
//!
//! A [`Connector`] opens a [`Connection`] to a named endpoint. Whatever the
//! wire (WebSocket, chunked HTTP, or an in-memory channel), a connection
//! yields raw frames in arrival order followed by exactly one
//! [`Inbound::Closed`], and accepts outbound frames through
//! [`Connection::send`] unless it is receive-only.
//!
//! Background reader/writer tasks own the socket halves and communicate with
//! the connection through tokio [`mpsc`] channels. A per-connection
//! [`CancellationToken`] aborts them cooperatively.
//!
//! Submodules:
//! - `codec`: `data: <json>` line framing for chunked responses.
//! - `websocket`: persistent bidirectional socket.
//! - `http`: chunked POST response stream.
//! - `channel`: in-memory peer, used by tests and embedders.

pub mod channel;
pub mod codec;
pub mod http;
pub mod websocket;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{AppError, Result};

/// Capacity of the inbound and outbound frame channels.
pub const FRAME_BUFFER: usize = 256;

/// Boxed future returned by [`Connector::open`].
pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = Result<Connection>> + Send + 'a>>;

/// One item read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A raw frame payload (one JSON document).
    Frame(String),
    /// The connection ended; no further items follow.
    Closed {
        /// Human-readable close reason.
        reason: String,
    },
}

/// Parameters for opening a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Endpoint path relative to the backend base URL.
    pub path: String,
    /// Initial payload: the POST body for chunked transports, the first
    /// frame for sockets.
    pub body: Option<String>,
}

impl OpenRequest {
    /// Request without an initial payload.
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            body: None,
        }
    }

    /// Request carrying an initial payload.
    #[must_use]
    pub fn with_body(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            body: Some(body.into()),
        }
    }
}

/// Opens connections to backend endpoints.
pub trait Connector: Send + Sync {
    /// Open a connection described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the endpoint refuses the
    /// connection or the handshake fails.
    fn open(&self, request: OpenRequest) -> OpenFuture<'_>;
}

/// A live connection to one endpoint.
///
/// Dropping a connection aborts its background tasks.
pub struct Connection {
    outbound: Option<mpsc::Sender<String>>,
    inbound: mpsc::Receiver<Inbound>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    finished: bool,
}

impl Connection {
    /// Assemble a connection from its channels.
    ///
    /// `outbound` is `None` for receive-only transports.
    #[must_use]
    pub fn new(
        outbound: Option<mpsc::Sender<String>>,
        inbound: mpsc::Receiver<Inbound>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            inbound,
            cancel,
            tasks: Vec::new(),
            finished: false,
        }
    }

    /// Attach a background task joined on [`close`](Self::close).
    #[must_use]
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Whether [`send`](Self::send) is unsupported on this connection.
    #[must_use]
    pub fn is_receive_only(&self) -> bool {
        self.outbound.is_none()
    }

    /// Queue an outbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the connection is receive-only,
    /// aborted, or its writer has stopped.
    pub async fn send(&self, frame: String) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Transport("connection aborted".into()));
        }
        let Some(outbound) = self.outbound.as_ref() else {
            return Err(AppError::Transport("connection is receive-only".into()));
        };
        outbound
            .send(frame)
            .await
            .map_err(|_| AppError::Transport("connection writer closed".into()))
    }

    /// Wait for the next inbound item.
    ///
    /// Cancel-safe: dropping the future loses nothing, so callers may race it
    /// against other events in `tokio::select!`. After an abort this yields
    /// `Closed { reason: "aborted" }` without draining buffered frames.
    pub async fn recv(&mut self) -> Inbound {
        if self.finished {
            return Inbound::Closed {
                reason: "connection closed".into(),
            };
        }

        let item = tokio::select! {
            biased;

            () = self.cancel.cancelled() => Inbound::Closed { reason: "aborted".into() },

            item = self.inbound.recv() => item.unwrap_or_else(|| Inbound::Closed {
                reason: "stream ended".into(),
            }),
        };

        if matches!(item, Inbound::Closed { .. }) {
            self.finished = true;
        }
        item
    }

    /// Ask the transport to stop; the next [`recv`](Self::recv) reports the close.
    pub fn abort(&self) {
        debug!("transport abort requested");
        self.cancel.cancel();
    }

    /// Whether [`abort`](Self::abort) or [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the transport and wait for its background tasks to exit.
    pub async fn close(mut self) {
        self.cancel.cancel();
        self.outbound.take();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Rewrite an `http(s)` base URL to its `ws(s)` equivalent.
#[must_use]
pub fn websocket_base(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_owned()
    }
}

/// Rewrite a `ws(s)` base URL to its `http(s)` equivalent.
#[must_use]
pub fn http_base(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        base_url.to_owned()
    }
}
