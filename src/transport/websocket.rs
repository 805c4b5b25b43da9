//! Persistent WebSocket transport.
//!
//! Each text message is one frame. A reader task forwards inbound messages
//! and a writer task drains the outbound queue; both stop when the
//! connection's cancellation token fires.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::transport::{
    websocket_base, Connection, Connector, Inbound, OpenFuture, OpenRequest, FRAME_BUFFER,
};

/// Opens WebSocket connections against a backend base URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: String,
}

impl WebSocketConnector {
    /// Create a connector for `base_url` (any of `http`, `https`, `ws`, `wss`).
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: websocket_base(base_url),
        }
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, request: OpenRequest) -> OpenFuture<'_> {
        Box::pin(async move {
            let url = format!("{}{}", self.base_url, request.path);
            let (socket, _) = connect_async(url.as_str()).await?;
            info!(url, "websocket connected");

            let (mut sink, stream) = socket.split();
            if let Some(body) = request.body {
                sink.send(Message::Text(body.into())).await?;
            }

            let (outbound_tx, outbound_rx) = mpsc::channel(FRAME_BUFFER);
            let (inbound_tx, inbound_rx) = mpsc::channel(FRAME_BUFFER);
            let cancel = CancellationToken::new();

            let reader = tokio::spawn(
                run_reader(stream, inbound_tx, cancel.clone())
                    .instrument(info_span!("websocket_reader", path = %request.path)),
            );
            let writer = tokio::spawn(
                run_writer(sink, outbound_rx, cancel.clone())
                    .instrument(info_span!("websocket_writer", path = %request.path)),
            );

            Ok(Connection::new(Some(outbound_tx), inbound_rx, cancel)
                .with_task(reader)
                .with_task(writer))
        })
    }
}

/// Forward inbound text messages as frames until close, error, or cancellation.
async fn run_reader<S>(
    mut stream: S,
    inbound_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("websocket reader: cancellation received, stopping");
                break "aborted".to_owned();
            }

            item = stream.next() => {
                let frame = match item {
                    None => break "stream ended".to_owned(),
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket reader: socket error, stopping");
                        break format!("socket error: {e}");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map_or_else(
                            || "closed by peer".to_owned(),
                            |f| {
                                let code = u16::from(f.code);
                                format!("closed by peer: {code} {}", f.reason.as_str())
                            },
                        );
                    }
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "websocket reader: non-utf8 binary frame, skipping");
                            continue;
                        }
                    },
                    Some(Ok(_)) => continue,
                };

                if inbound_tx.send(Inbound::Frame(frame)).await.is_err() {
                    debug!("websocket reader: receiver dropped, stopping");
                    return;
                }
            }
        }
    };

    let _ = inbound_tx.send(Inbound::Closed { reason }).await;
}

/// Drain the outbound queue into the socket; sends a close frame on exit.
async fn run_writer<S>(
    mut sink: S,
    mut outbound_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("websocket writer: cancellation received, stopping");
                break;
            }

            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    debug!("websocket writer: outbound channel closed, stopping");
                    break;
                };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    warn!(error = %e, "websocket writer: send failed, stopping");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}
