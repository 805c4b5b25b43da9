//! Shared helpers for integration tests.
//!
//! Every controller runs against [`ChannelConnector`], with the test playing
//! the backend through the [`ChannelPeer`] handed out for each connection.

use std::sync::Arc;
use std::time::Duration;

use agent_console::events::EventChannel;
use agent_console::roundtable::Roundtable;
use agent_console::stream::{StreamOptions, StreamSession};
use agent_console::transport::channel::{ChannelConnector, ChannelPeer, ChannelPeers};

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Stream session on a bidirectional in-memory transport, model `m1`.
pub fn stream_session() -> (StreamSession, ChannelConnector, ChannelPeers) {
    let (connector, peers) = ChannelConnector::new();
    let session = StreamSession::new(
        Arc::new(connector.clone()),
        StreamOptions::new("/ws/chat", "m1"),
    );
    (session, connector, peers)
}

/// Stream session on a receive-only in-memory transport.
pub fn receive_only_session() -> (StreamSession, ChannelPeers) {
    let (connector, peers) = ChannelConnector::receive_only();
    let session = StreamSession::new(Arc::new(connector), StreamOptions::new("/api/chat", "m1"));
    (session, peers)
}

/// Roundtable on an in-memory transport.
pub fn roundtable() -> (Roundtable, ChannelPeers) {
    let (connector, peers) = ChannelConnector::new();
    (Roundtable::new(Arc::new(connector), "/ws/roundtable"), peers)
}

/// Event channel on an in-memory transport.
pub fn event_channel() -> (EventChannel, ChannelConnector, ChannelPeers) {
    let (connector, peers) = ChannelConnector::new();
    let channel = EventChannel::new(Arc::new(connector.clone()), "/ws/events");
    (channel, connector, peers)
}

/// The backend end of the next opened connection.
pub async fn next_peer(peers: &mut ChannelPeers) -> ChannelPeer {
    tokio::time::timeout(WAIT, peers.next())
        .await
        .expect("connection should open in time")
        .expect("connector should still be alive")
}

/// Parse one outbound frame sent by a controller.
pub fn sent_json(peer: &mut ChannelPeer) -> serde_json::Value {
    let raw = peer.try_sent().expect("controller should have sent a frame");
    serde_json::from_str(&raw).expect("outbound frame should be json")
}
