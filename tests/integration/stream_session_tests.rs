//! Integration tests for the stream session controller.

use serde_json::json;

use agent_console::models::message::{Role, ToolStatus};
use agent_console::stream::{StreamSession, StreamStatus, StreamUpdate};
use agent_console::AppError;

use super::test_helpers::{next_peer, receive_only_session, sent_json, stream_session, WAIT};

async fn pump(session: &mut StreamSession, count: usize) -> Vec<StreamUpdate> {
    let mut updates = Vec::with_capacity(count);
    for _ in 0..count {
        let update = tokio::time::timeout(WAIT, session.next_update())
            .await
            .expect("update should arrive in time")
            .expect("session should still have work");
        updates.push(update);
    }
    updates
}

fn streaming_content(session: &StreamSession, id: &str) -> String {
    session.message(id).expect("assistant message").content.clone()
}

#[tokio::test]
async fn hello_scenario() {
    let (mut session, _connector, mut peers) = stream_session();
    assert_eq!(session.status(), StreamStatus::Idle);

    let assistant_id = session.send_message("hello").await.expect("send");
    assert_eq!(session.status(), StreamStatus::Connecting);

    let mut peer = next_peer(&mut peers).await;
    assert_eq!(peer.request.path, "/ws/chat");
    let body: serde_json::Value =
        serde_json::from_str(peer.request.body.as_deref().expect("request body")).unwrap();
    assert_eq!(body["type"], "request");
    assert_eq!(body["model"], "m1");
    assert_eq!(body["messages"], json!([{"role": "user", "content": "hello"}]));

    for delta in ["He", "llo", "!"] {
        peer.push_json(&json!({"type": "content", "content": delta})).unwrap();
    }
    pump(&mut session, 1).await;
    assert_eq!(session.status(), StreamStatus::Streaming);
    pump(&mut session, 2).await;
    assert_eq!(streaming_content(&session, &assistant_id), "Hello!");

    peer.push_json(&json!({"type": "done", "output_tokens": 3})).unwrap();
    let updates = pump(&mut session, 1).await;
    assert_eq!(
        updates[0],
        StreamUpdate::Completed {
            message_id: assistant_id.clone(),
            cancelled: false
        }
    );

    assert_eq!(session.status(), StreamStatus::Idle);
    let message = session.message(&assistant_id).unwrap();
    assert!(!message.is_streaming);
    assert_eq!(message.output_tokens, Some(3));
    assert_eq!(message.content, "Hello!");
    assert!(peer.is_aborted(), "terminal frame should release the transport");
    assert!(peer.try_sent().is_none());
}

#[tokio::test]
async fn content_is_concatenated_in_delivery_order() {
    let (mut session, _connector, mut peers) = stream_session();
    let id = session.send_message("count").await.unwrap();
    let peer = next_peer(&mut peers).await;

    let deltas: Vec<String> = (0..50).map(|i| format!("{i},")).collect();
    for delta in &deltas {
        peer.push_json(&json!({"type": "content", "content": delta})).unwrap();
    }
    pump(&mut session, deltas.len()).await;
    assert_eq!(streaming_content(&session, &id), deltas.concat());
}

#[tokio::test]
async fn thinking_is_kept_apart_from_content() {
    let (mut session, _connector, mut peers) = stream_session();
    let id = session.send_message("why").await.unwrap();
    let peer = next_peer(&mut peers).await;

    peer.push_json(&json!({"type": "thinking", "content": "considering"})).unwrap();
    peer.push_json(&json!({"type": "content", "content": "because"})).unwrap();
    pump(&mut session, 2).await;

    let message = session.message(&id).unwrap();
    assert_eq!(message.thinking.as_deref(), Some("considering"));
    assert_eq!(message.content, "because");
}

#[tokio::test]
async fn connected_captures_session_id_for_next_request() {
    let (mut session, _connector, mut peers) = stream_session();
    session.send_message("one").await.unwrap();
    let peer = next_peer(&mut peers).await;
    peer.push_json(&json!({"type": "connected", "session_id": "sess-9"})).unwrap();
    peer.push_json(&json!({"type": "content", "content": "A"})).unwrap();
    peer.push_json(&json!({"type": "done"})).unwrap();
    pump(&mut session, 3).await;
    assert_eq!(session.session_id(), Some("sess-9"));

    session.send_message("two").await.unwrap();
    let peer = next_peer(&mut peers).await;
    let body: serde_json::Value =
        serde_json::from_str(peer.request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["session_id"], "sess-9");
    assert_eq!(
        body["messages"],
        json!([
            {"role": "user", "content": "one"},
            {"role": "assistant", "content": "A"},
            {"role": "user", "content": "two"},
        ])
    );
}

#[tokio::test]
async fn tool_records_update_in_place() {
    let (mut session, _connector, mut peers) = stream_session();
    let id = session.send_message("list files").await.unwrap();
    let peer = next_peer(&mut peers).await;

    peer.push_json(&json!({"type": "tool_use", "id": "t1", "name": "ls", "input": {"dir": "."}}))
        .unwrap();
    peer.push_json(&json!({"type": "tool_use", "id": "t2", "name": "cat", "input": {}}))
        .unwrap();
    peer.push_json(&json!({"type": "tool_result", "id": "t2", "result": "nope", "is_error": true}))
        .unwrap();
    peer.push_json(&json!({"type": "tool_result", "id": "t1", "result": ["a.rs"]}))
        .unwrap();
    peer.push_json(&json!({"type": "tool_result", "id": "t9", "result": null}))
        .unwrap();
    let updates = pump(&mut session, 5).await;
    assert_eq!(updates[4], StreamUpdate::Skipped);

    let tools = &session.message(&id).unwrap().tool_executions;
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].status, ToolStatus::Complete);
    assert_eq!(tools[0].result, Some(json!(["a.rs"])));
    assert_eq!(tools[1].status, ToolStatus::Error);
}

#[tokio::test]
async fn malformed_frames_are_skipped() {
    let (mut session, _connector, mut peers) = stream_session();
    let id = session.send_message("x").await.unwrap();
    let peer = next_peer(&mut peers).await;

    peer.push_json(&json!({"type": "content", "content": "a"})).unwrap();
    peer.push("{not json").unwrap();
    peer.push_json(&json!({"type": "content"})).unwrap();
    peer.push_json(&json!({"type": "mystery"})).unwrap();
    peer.push_json(&json!({"type": "content", "content": "b"})).unwrap();
    pump(&mut session, 5).await;

    assert_eq!(session.status(), StreamStatus::Streaming);
    assert_eq!(streaming_content(&session, &id), "ab");
}

#[tokio::test]
async fn error_frame_moves_to_error_until_cleared() {
    let (mut session, _connector, mut peers) = stream_session();
    let id = session.send_message("x").await.unwrap();
    let peer = next_peer(&mut peers).await;
    peer.push_json(&json!({"type": "error", "message": "quota exceeded"})).unwrap();
    pump(&mut session, 1).await;

    assert_eq!(session.status(), StreamStatus::Error);
    assert_eq!(session.error(), Some(&AppError::Backend("quota exceeded".into())));
    assert!(session.message(&id).is_none(), "empty reply should be dropped");

    let err = session.send_message("again").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    session.clear_error();
    assert_eq!(session.status(), StreamStatus::Idle);
    assert!(session.error().is_none());
    session.send_message("again").await.expect("send after clear");
}

#[tokio::test]
async fn failed_exchange_leaves_no_empty_assistant_turn() {
    let (mut session, _connector, mut peers) = stream_session();
    session.send_message("first").await.unwrap();
    let peer = next_peer(&mut peers).await;
    peer.push_json(&json!({"type": "error", "message": "quota"})).unwrap();
    pump(&mut session, 1).await;
    assert_eq!(session.messages().len(), 1);

    session.clear_error();
    session.send_message("second").await.unwrap();
    let peer = next_peer(&mut peers).await;
    let body: serde_json::Value =
        serde_json::from_str(peer.request.body.as_deref().unwrap()).unwrap();
    assert_eq!(
        body["messages"],
        json!([
            {"role": "user", "content": "first"},
            {"role": "user", "content": "second"}
        ])
    );
}

#[tokio::test]
async fn failed_exchange_keeps_partial_reply() {
    let (mut session, _connector, mut peers) = stream_session();
    let id = session.send_message("x").await.unwrap();
    let peer = next_peer(&mut peers).await;
    peer.push_json(&json!({"type": "content", "content": "half"})).unwrap();
    peer.push_json(&json!({"type": "error", "message": "boom"})).unwrap();
    pump(&mut session, 2).await;

    let message = session.message(&id).expect("partial reply kept");
    assert_eq!(message.content, "half");
    assert!(!message.is_streaming);
}

#[tokio::test]
async fn refused_connection_moves_to_error() {
    let (mut session, connector, _peers) = stream_session();
    connector.fail_next(1);
    let err = session.send_message("x").await.unwrap_err();
    assert!(matches!(err, AppError::Transport(_)));
    assert_eq!(session.status(), StreamStatus::Error);
    assert!(session.messages().iter().all(|m| !m.is_streaming));
    assert_eq!(session.messages().len(), 1);
}

#[tokio::test]
async fn close_while_connecting_is_an_error() {
    let (mut session, _connector, mut peers) = stream_session();
    session.send_message("x").await.unwrap();
    let peer = next_peer(&mut peers).await;
    peer.close("server restart").unwrap();
    pump(&mut session, 1).await;

    assert_eq!(session.status(), StreamStatus::Error);
    assert!(matches!(
        session.error(),
        Some(AppError::Transport(msg)) if msg.contains("server restart")
    ));
}

#[tokio::test]
async fn close_while_streaming_falls_back_to_idle() {
    let (mut session, _connector, mut peers) = stream_session();
    let id = session.send_message("x").await.unwrap();
    let peer = next_peer(&mut peers).await;
    peer.push_json(&json!({"type": "content", "content": "partial"})).unwrap();
    peer.close("reset").unwrap();
    pump(&mut session, 2).await;

    assert_eq!(session.status(), StreamStatus::Idle);
    let message = session.message(&id).unwrap();
    assert!(!message.is_streaming);
    assert!(!message.cancelled);
    assert_eq!(message.content, "partial");
    assert!(session.next_update().await.is_none());
}

#[tokio::test]
async fn cancel_sends_cancel_frame_and_waits_for_terminal() {
    let (mut session, _connector, mut peers) = stream_session();
    let id = session.send_message("long story").await.unwrap();
    let mut peer = next_peer(&mut peers).await;
    peer.push_json(&json!({"type": "connected", "session_id": "s1"})).unwrap();
    pump(&mut session, 1).await;

    session.cancel_stream().await.unwrap();
    assert_eq!(session.status(), StreamStatus::Cancelling);
    assert_eq!(sent_json(&mut peer), json!({"type": "cancel", "session_id": "s1"}));

    peer.push_json(&json!({"type": "content", "content": "tail"})).unwrap();
    peer.push_json(&json!({"type": "cancelled"})).unwrap();
    pump(&mut session, 2).await;

    assert_eq!(session.status(), StreamStatus::Idle);
    let message = session.message(&id).unwrap();
    assert!(message.cancelled);
    assert_eq!(message.content, "tail");
}

#[tokio::test]
async fn done_before_cancelled_still_ends_idle() {
    let (mut session, _connector, mut peers) = stream_session();
    let id = session.send_message("x").await.unwrap();
    let peer = next_peer(&mut peers).await;
    peer.push_json(&json!({"type": "content", "content": "a"})).unwrap();
    pump(&mut session, 1).await;

    session.cancel_stream().await.unwrap();
    let done = session.handle_raw(&json!({"type": "done"}).to_string());
    assert!(matches!(done, StreamUpdate::Completed { cancelled: false, .. }));
    let late = session.handle_raw(&json!({"type": "cancelled"}).to_string());
    assert_eq!(late, StreamUpdate::Skipped);

    assert_eq!(session.status(), StreamStatus::Idle);
    assert!(!session.message(&id).unwrap().cancelled);
}

#[tokio::test]
async fn cancel_is_only_legal_while_streaming() {
    let (mut session, _connector, mut peers) = stream_session();
    assert!(matches!(
        session.cancel_stream().await.unwrap_err(),
        AppError::InvalidState(_)
    ));

    session.send_message("x").await.unwrap();
    let _peer = next_peer(&mut peers).await;
    assert!(matches!(
        session.cancel_stream().await.unwrap_err(),
        AppError::InvalidState(_)
    ));
}

#[tokio::test]
async fn receive_only_cancel_aborts_transport() {
    let (mut session, mut peers) = receive_only_session();
    let id = session.send_message("x").await.unwrap();
    let peer = next_peer(&mut peers).await;
    peer.push_json(&json!({"type": "content", "content": "a"})).unwrap();
    pump(&mut session, 1).await;

    session.cancel_stream().await.unwrap();
    assert!(peer.is_aborted());
    assert_eq!(session.status(), StreamStatus::Cancelling);

    let updates = pump(&mut session, 1).await;
    assert_eq!(
        updates[0],
        StreamUpdate::Closed {
            reason: "aborted".into()
        }
    );
    assert_eq!(session.status(), StreamStatus::Idle);
    assert!(session.message(&id).unwrap().cancelled);
}

#[tokio::test]
async fn send_message_requires_idle() {
    let (mut session, _connector, mut peers) = stream_session();
    session.send_message("first").await.unwrap();
    let _peer = next_peer(&mut peers).await;
    let err = session.send_message("second").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(session.messages().len(), 2);
}

#[tokio::test]
async fn edits_keep_history_and_skip_streaming_messages() {
    let (mut session, _connector, mut peers) = stream_session();
    let id = session.send_message("x").await.unwrap();
    let peer = next_peer(&mut peers).await;

    let err = session.edit_message(&id, "nope").unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    peer.push_json(&json!({"type": "content", "content": "v0"})).unwrap();
    peer.push_json(&json!({"type": "done"})).unwrap();
    pump(&mut session, 2).await;

    for n in 1..=3 {
        session.edit_message(&id, &format!("v{n}")).unwrap();
    }
    let message = session.message(&id).unwrap();
    assert_eq!(message.content, "v3");
    assert_eq!(message.previous_versions.len(), 3);
    assert_eq!(message.previous_versions.last().map(String::as_str), Some("v2"));
    assert!(message.edited);

    assert!(matches!(
        session.edit_message("missing", "x").unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn regenerate_truncates_and_resends() {
    let (mut session, _connector, mut peers) = stream_session();

    for (prompt, reply) in [("q1", "a1"), ("q2", "a2")] {
        session.send_message(prompt).await.unwrap();
        let peer = next_peer(&mut peers).await;
        peer.push_json(&json!({"type": "content", "content": reply})).unwrap();
        peer.push_json(&json!({"type": "done"})).unwrap();
        pump(&mut session, 2).await;
    }
    let first_answer = session.messages()[1].id.clone();

    let new_id = session.regenerate_message(&first_answer).await.unwrap();
    let peer = next_peer(&mut peers).await;
    let body: serde_json::Value =
        serde_json::from_str(peer.request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["messages"], json!([{"role": "user", "content": "q1"}]));

    let transcript: Vec<(Role, &str)> = session
        .messages()
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(transcript, vec![(Role::User, "q1"), (Role::Assistant, "")]);
    assert_ne!(new_id, first_answer);
    assert!(session.message(&first_answer).is_none());
}

#[tokio::test]
async fn regenerate_requires_idle_and_known_message() {
    let (mut session, _connector, mut peers) = stream_session();
    assert!(matches!(
        session.regenerate_message("missing").await.unwrap_err(),
        AppError::NotFound(_)
    ));

    let id = session.send_message("x").await.unwrap();
    let _peer = next_peer(&mut peers).await;
    assert!(matches!(
        session.regenerate_message(&id).await.unwrap_err(),
        AppError::InvalidState(_)
    ));
}

#[tokio::test]
async fn regenerate_with_blank_user_turn_keeps_transcript() {
    let (mut session, _connector, mut peers) = stream_session();
    let answer = session.send_message("q").await.unwrap();
    let peer = next_peer(&mut peers).await;
    peer.push_json(&json!({"type": "content", "content": "a"})).unwrap();
    peer.push_json(&json!({"type": "done"})).unwrap();
    pump(&mut session, 2).await;

    let question = session.messages()[0].id.clone();
    session.edit_message(&question, "   ").unwrap();
    let err = session.regenerate_message(&answer).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    assert_eq!(session.messages().len(), 2);
    assert!(session.message(&answer).is_some());
    assert_eq!(session.status(), StreamStatus::Idle);
}

#[tokio::test]
async fn new_send_tears_down_previous_connection() {
    let (mut session, _connector, mut peers) = stream_session();
    session.send_message("one").await.unwrap();
    let first = next_peer(&mut peers).await;
    first.push_json(&json!({"type": "content", "content": "a"})).unwrap();
    pump(&mut session, 1).await;
    session.close().await;
    assert!(first.is_aborted());
    assert_eq!(session.status(), StreamStatus::Idle);

    session.send_message("two").await.unwrap();
    let second = next_peer(&mut peers).await;
    assert!(!second.is_aborted());
}
