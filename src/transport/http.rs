//! Chunked HTTP POST transport.
//!
//! The request body is posted once; the response body is read as a
//! `data: <json>` event stream until the `[DONE]` sentinel or EOF. The
//! connection is receive-only, so cancellation is an abort of the
//! underlying request rather than an explicit cancel frame.

use bytes::BytesMut;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::transport::codec::{EventStreamCodec, StreamLine};
use crate::transport::{
    http_base, Connection, Connector, Inbound, OpenFuture, OpenRequest, FRAME_BUFFER,
};
use crate::AppError;

/// Opens chunked POST streams against a backend base URL.
#[derive(Debug, Clone)]
pub struct HttpStreamConnector {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStreamConnector {
    /// Create a connector for `base_url` (any of `http`, `https`, `ws`, `wss`).
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: http_base(base_url),
        }
    }
}

impl Connector for HttpStreamConnector {
    fn open(&self, request: OpenRequest) -> OpenFuture<'_> {
        Box::pin(async move {
            let body = request.body.ok_or_else(|| {
                AppError::Transport("chunked transport requires a request body".into())
            })?;
            let url = format!("{}{}", self.base_url, request.path);

            let response = self
                .client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .body(body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(AppError::Transport(format!(
                    "{url} returned {status}: {text}"
                )));
            }

            let (inbound_tx, inbound_rx) = mpsc::channel(FRAME_BUFFER);
            let cancel = CancellationToken::new();
            let task = tokio::spawn(
                run_reader(response.bytes_stream(), inbound_tx, cancel.clone())
                    .instrument(info_span!("http_stream_reader", path = %request.path)),
            );

            Ok(Connection::new(None, inbound_rx, cancel).with_task(task))
        })
    }
}

/// Read a chunked body, forwarding each data payload as a frame.
///
/// Oversized lines are logged and skipped. Always finishes by sending a
/// single [`Inbound::Closed`] unless the receiver is gone.
pub async fn run_reader<S, B, E>(
    body: S,
    inbound_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    tokio::pin!(body);
    let mut codec = EventStreamCodec::new();
    let mut buffer = BytesMut::new();

    let reason = 'read: loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("http stream: cancellation received, stopping");
                break 'read "aborted".to_owned();
            }

            chunk = body.next() => {
                let eof = match chunk {
                    None => true,
                    Some(Err(e)) => {
                        warn!(error = %e, "http stream: body error, stopping");
                        break 'read format!("stream error: {e}");
                    }
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(bytes.as_ref());
                        false
                    }
                };

                loop {
                    let decoded = if eof {
                        codec.decode_eof(&mut buffer)
                    } else {
                        codec.decode(&mut buffer)
                    };
                    match decoded {
                        Ok(Some(StreamLine::Data(payload))) => {
                            if inbound_tx.send(Inbound::Frame(payload)).await.is_err() {
                                debug!("http stream: receiver dropped, stopping");
                                return;
                            }
                        }
                        Ok(Some(StreamLine::Done)) => break 'read "done".to_owned(),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "http stream: framing error, skipping");
                            if eof {
                                break;
                            }
                        }
                    }
                }

                if eof {
                    break 'read "stream ended".to_owned();
                }
            }
        }
    };

    let _ = inbound_tx.send(Inbound::Closed { reason }).await;
}
