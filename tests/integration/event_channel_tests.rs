//! Integration tests for the session events channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use agent_console::events::{ChannelStatus, ChannelUpdate, EventChannel, EventFilters};
use agent_console::models::event::{EventData, EventType};
use agent_console::AppError;

use super::test_helpers::{event_channel, next_peer, sent_json, WAIT};

async fn pump(channel: &mut EventChannel, count: usize) -> Vec<ChannelUpdate> {
    let mut updates = Vec::with_capacity(count);
    for _ in 0..count {
        let update = tokio::time::timeout(WAIT, channel.next_update())
            .await
            .expect("update should arrive in time")
            .expect("channel should still have work");
        updates.push(update);
    }
    updates
}

fn event(session: &str, event_type: &str, data: serde_json::Value) -> serde_json::Value {
    json!({
        "event_type": event_type,
        "session_id": session,
        "timestamp": "2026-10-16T09:30:00Z",
        "data": data,
    })
}

fn message_event(session: &str, content: &str) -> serde_json::Value {
    event(session, "message", json!({"role": "assistant", "content": content}))
}

#[tokio::test]
async fn connect_subscribes_with_filters() {
    let (channel, _connector, mut peers) = event_channel();
    let mut channel = channel.with_filters(
        EventFilters::all()
            .with_sessions(["s1"])
            .with_types([EventType::ToolUse, EventType::Error]),
    );
    channel.connect().await.unwrap();
    assert_eq!(channel.status(), ChannelStatus::Connected);

    let mut peer = next_peer(&mut peers).await;
    assert_eq!(peer.request.path, "/ws/events");
    assert_eq!(
        sent_json(&mut peer),
        json!({
            "type": "subscribe",
            "session_ids": ["s1"],
            "event_types": ["tool_use", "error"],
        })
    );
}

#[tokio::test]
async fn unfiltered_subscribe_omits_filter_fields() {
    let (mut channel, _connector, mut peers) = event_channel();
    channel.connect().await.unwrap();
    let mut peer = next_peer(&mut peers).await;
    assert_eq!(sent_json(&mut peer), json!({"type": "subscribe"}));
}

#[tokio::test]
async fn events_are_recorded_and_observed_in_order() {
    let (mut channel, _connector, mut peers) = event_channel();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    channel.set_observer(move |event| {
        sink.lock().unwrap().push(event.session_id.clone());
    });
    channel.connect().await.unwrap();
    let peer = next_peer(&mut peers).await;

    peer.push_json(&event("s1", "session_start", json!({"model": "m1"}))).unwrap();
    peer.push_json(&event("s2", "tool_use", json!({"tool_name": "ls", "input": {}})))
        .unwrap();
    peer.push_json(&event("s1", "complete", json!(null))).unwrap();
    pump(&mut channel, 3).await;

    let history: Vec<(&str, EventType)> = channel
        .history()
        .iter()
        .map(|e| (e.session_id.as_str(), e.event_type()))
        .collect();
    assert_eq!(
        history,
        vec![
            ("s1", EventType::SessionStart),
            ("s2", EventType::ToolUse),
            ("s1", EventType::Complete),
        ]
    );
    assert_eq!(*seen.lock().unwrap(), vec!["s1", "s2", "s1"]);
    assert!(matches!(
        &channel.history()[0].data,
        EventData::SessionStart(start) if start.model.as_deref() == Some("m1")
    ));
}

#[tokio::test]
async fn local_filters_drop_non_matching_events() {
    let (channel, _connector, mut peers) = event_channel();
    let mut channel = channel.with_filters(EventFilters::all().with_sessions(["s1"]));
    let observed = Arc::new(Mutex::new(0_usize));
    let counter = Arc::clone(&observed);
    channel.set_observer(move |_| *counter.lock().unwrap() += 1);
    channel.connect().await.unwrap();
    let peer = next_peer(&mut peers).await;

    peer.push_json(&message_event("s2", "other")).unwrap();
    peer.push_json(&message_event("s1", "mine")).unwrap();
    let updates = pump(&mut channel, 2).await;

    assert_eq!(updates[0], ChannelUpdate::Filtered);
    assert!(matches!(updates[1], ChannelUpdate::Event(_)));
    assert_eq!(channel.history().len(), 1);
    assert_eq!(*observed.lock().unwrap(), 1);
}

#[tokio::test]
async fn history_keeps_the_most_recent_events() {
    let (mut channel, _connector, mut peers) = event_channel();
    channel.connect().await.unwrap();
    let peer = next_peer(&mut peers).await;

    for i in 0..105 {
        peer.push_json(&message_event("s1", &format!("m{i}"))).unwrap();
    }
    pump(&mut channel, 105).await;

    let history = channel.history();
    assert_eq!(history.len(), 100);
    let content = |index: usize| match &history[index].data {
        EventData::Message(message) => message.content.clone(),
        other => panic!("unexpected payload: {other:?}"),
    };
    assert_eq!(content(0), "m5");
    assert_eq!(content(99), "m104");
}

#[tokio::test]
async fn undecodable_and_unknown_frames_are_skipped() {
    let (mut channel, _connector, mut peers) = event_channel();
    channel.connect().await.unwrap();
    let peer = next_peer(&mut peers).await;

    peer.push("not json").unwrap();
    peer.push_json(&event("s1", "telepathy", json!({}))).unwrap();
    peer.push_json(&event("s1", "message", json!({"role": "user"}))).unwrap();
    peer.push_json(&json!({"hello": "world"})).unwrap();
    let updates = pump(&mut channel, 4).await;

    assert!(updates.iter().all(|u| *u == ChannelUpdate::Skipped));
    assert!(channel.history().is_empty());
    assert_eq!(channel.status(), ChannelStatus::Connected);
}

#[tokio::test]
async fn acknowledgements_track_subscription() {
    let (mut channel, _connector, mut peers) = event_channel();
    channel.connect().await.unwrap();
    let peer = next_peer(&mut peers).await;

    peer.push_json(&json!({"type": "subscribed", "subscription_id": "sub-1"})).unwrap();
    peer.push_json(&json!({"type": "error", "message": "bad filter"})).unwrap();
    pump(&mut channel, 2).await;

    assert_eq!(channel.subscription_id(), Some("sub-1"));
    assert_eq!(
        channel.last_error(),
        Some(&AppError::Backend("bad filter".into()))
    );
}

#[tokio::test]
async fn update_filters_sends_update_when_connected() {
    let (mut channel, _connector, mut peers) = event_channel();
    channel.update_filters(Some(vec!["s0".into()]), None).await.unwrap();

    channel.connect().await.unwrap();
    let mut peer = next_peer(&mut peers).await;
    assert_eq!(
        sent_json(&mut peer),
        json!({"type": "subscribe", "session_ids": ["s0"]})
    );

    channel
        .update_filters(None, Some(vec![EventType::ToolUse]))
        .await
        .unwrap();
    assert_eq!(
        sent_json(&mut peer),
        json!({"type": "update", "event_types": ["tool_use"]})
    );

    peer.push_json(&message_event("s9", "dropped")).unwrap();
    peer.push_json(&event("s9", "tool_use", json!({"tool_name": "ls"}))).unwrap();
    let updates = pump(&mut channel, 2).await;
    assert_eq!(updates[0], ChannelUpdate::Filtered);
    assert!(matches!(updates[1], ChannelUpdate::Event(_)));
}

#[tokio::test(start_paused = true)]
async fn failed_connect_retries_with_backoff() {
    let (mut channel, connector, mut peers) = event_channel();
    connector.fail_next(3);

    let err = channel.connect().await.unwrap_err();
    assert!(matches!(err, AppError::Transport(_)));
    assert_eq!(channel.last_error(), Some(&err));
    assert_eq!(channel.status(), ChannelStatus::Reconnecting);
    assert!(channel.reconnect_at().is_some());

    let mut delays = Vec::new();
    loop {
        match channel.next_update().await {
            Some(ChannelUpdate::ReconnectFailed { retry_in, .. }) => delays.push(retry_in),
            Some(ChannelUpdate::Reconnected) => break,
            other => panic!("unexpected update: {other:?}"),
        }
    }
    assert_eq!(delays, vec![Duration::from_secs(2), Duration::from_secs(4)]);
    assert_eq!(channel.status(), ChannelStatus::Connected);
    assert_eq!(connector.open_attempts(), 4);

    let mut peer = next_peer(&mut peers).await;
    assert_eq!(sent_json(&mut peer), json!({"type": "subscribe"}));
}

#[tokio::test]
async fn failed_connect_without_auto_reconnect_gives_up() {
    let (mut channel, connector, _peers) = event_channel();
    channel.set_auto_reconnect(false);
    connector.fail_next(1);

    let err = channel.connect().await.unwrap_err();
    assert!(matches!(err, AppError::Transport(_)));
    assert_eq!(channel.status(), ChannelStatus::Disconnected);
    assert!(channel.reconnect_at().is_none());
    assert!(channel.next_update().await.is_none());
    assert_eq!(connector.open_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_backs_off_exponentially_and_resets() {
    let (mut channel, connector, mut peers) = event_channel();
    channel.connect().await.unwrap();
    let first = next_peer(&mut peers).await;
    let started = Instant::now();

    connector.fail_next(6);
    first.close("server restart").unwrap();

    let mut delays = Vec::new();
    match channel.next_update().await {
        Some(ChannelUpdate::Closed { retry_in, .. }) => delays.push(retry_in.unwrap()),
        other => panic!("expected close, got {other:?}"),
    }
    assert_eq!(channel.status(), ChannelStatus::Reconnecting);

    loop {
        match channel.next_update().await {
            Some(ChannelUpdate::ReconnectFailed { retry_in, .. }) => delays.push(retry_in),
            Some(ChannelUpdate::Reconnected) => break,
            other => panic!("unexpected update: {other:?}"),
        }
    }

    let secs: Vec<u64> = delays.iter().map(Duration::as_secs).collect();
    assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
    assert!(started.elapsed() >= Duration::from_secs(91));
    assert_eq!(channel.status(), ChannelStatus::Connected);
    assert_eq!(connector.open_attempts(), 8);

    let mut second = next_peer(&mut peers).await;
    assert_eq!(sent_json(&mut second), json!({"type": "subscribe"}));

    second.close("again").unwrap();
    match channel.next_update().await {
        Some(ChannelUpdate::Closed { retry_in, .. }) => {
            assert_eq!(retry_in, Some(Duration::from_secs(1)));
        }
        other => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_unsubscribes_and_stops_reconnecting() {
    let (mut channel, connector, mut peers) = event_channel();
    channel.connect().await.unwrap();
    let mut peer = next_peer(&mut peers).await;
    let _subscribe = sent_json(&mut peer);

    channel.disconnect().await;
    assert_eq!(sent_json(&mut peer), json!({"type": "unsubscribe"}));
    assert!(peer.is_aborted());
    assert_eq!(channel.status(), ChannelStatus::Disconnected);
    assert!(channel.next_update().await.is_none());
    assert_eq!(connector.open_attempts(), 1);
}

#[tokio::test]
async fn close_without_auto_reconnect_disconnects() {
    let (mut channel, connector, mut peers) = event_channel();
    channel.set_auto_reconnect(false);
    channel.connect().await.unwrap();
    let peer = next_peer(&mut peers).await;
    peer.close("bye").unwrap();

    let updates = pump(&mut channel, 1).await;
    assert_eq!(
        updates[0],
        ChannelUpdate::Closed {
            reason: "bye".into(),
            retry_in: None
        }
    );
    assert_eq!(channel.status(), ChannelStatus::Disconnected);
    assert!(channel.next_update().await.is_none());
    assert_eq!(connector.open_attempts(), 1);
}
