//! Tests for the chunked HTTP body reader, fed from in-memory byte streams.

use futures_util::stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_console::transport::http::run_reader;
use agent_console::transport::Inbound;

type Chunk = Result<Vec<u8>, String>;

async fn read_all(chunks: Vec<Chunk>) -> Vec<Inbound> {
    let (tx, mut rx) = mpsc::channel(64);
    run_reader(stream::iter(chunks), tx, CancellationToken::new()).await;
    let mut items = Vec::new();
    while let Some(item) = rx.recv().await {
        items.push(item);
    }
    items
}

fn ok(text: &str) -> Chunk {
    Ok(text.as_bytes().to_vec())
}

fn frame(raw: &str) -> Inbound {
    Inbound::Frame(raw.to_owned())
}

fn closed(reason: &str) -> Inbound {
    Inbound::Closed {
        reason: reason.to_owned(),
    }
}

#[tokio::test]
async fn done_sentinel_ends_stream() {
    let items = read_all(vec![
        ok("data: {\"type\":\"content\",\"content\":\"Hi\"}\n\n"),
        ok("data: [DONE]\n\n"),
        ok("data: {\"type\":\"content\",\"content\":\"late\"}\n"),
    ])
    .await;
    assert_eq!(
        items,
        vec![frame(r#"{"type":"content","content":"Hi"}"#), closed("done")]
    );
}

#[tokio::test]
async fn payload_split_across_chunks_is_reassembled() {
    let items = read_all(vec![
        ok("data: {\"type\":\"con"),
        ok("tent\",\"content\":\"a\"}\n"),
        ok(": keep-alive\n\nevent: message\ndata: {\"type\":\"done\"}"),
    ])
    .await;
    assert_eq!(
        items,
        vec![
            frame(r#"{"type":"content","content":"a"}"#),
            frame(r#"{"type":"done"}"#),
            closed("stream ended"),
        ]
    );
}

#[tokio::test]
async fn ndjson_lines_are_accepted() {
    let items = read_all(vec![ok("{\"type\":\"done\"}\r\n")]).await;
    assert_eq!(items, vec![frame(r#"{"type":"done"}"#), closed("stream ended")]);
}

#[tokio::test]
async fn body_error_closes_with_reason() {
    let items = read_all(vec![
        ok("data: {\"type\":\"thinking\",\"content\":\"x\"}\n"),
        Err("connection reset".to_owned()),
    ])
    .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[1], closed("stream error: connection reset"));
}

#[tokio::test]
async fn cancellation_aborts_reader() {
    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    cancel.cancel();
    run_reader(stream::pending::<Chunk>(), tx, cancel).await;
    assert_eq!(rx.recv().await, Some(closed("aborted")));
    assert_eq!(rx.recv().await, None);
}
