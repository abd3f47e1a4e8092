//! Relay module
//!
//! Tracks connected websocket clients and fans every inbound message out
//! to all of them, the sender included.

mod connection_set;
mod peer;
mod server;

use std::sync::Arc;
use tracing::{debug, info};

pub use connection_set::{BroadcastReport, ConnectionSet};
pub use peer::{ChannelPeer, ConnectionId, Payload, Peer, ReadyState};
pub use server::RelayServer;

/// Event handlers the transport drives for every connection.
#[derive(Default)]
pub struct Relay {
    connections: ConnectionSet,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn on_connect(&self, peer: Arc<dyn Peer>) {
        let id = peer.id();
        self.connections.insert(peer).await;
        info!("Connection {} joined the relay", id);
    }

    pub async fn on_message(&self, from: ConnectionId, payload: Payload) -> BroadcastReport {
        let report = self.connections.broadcast(&payload).await;
        debug!(
            "Relayed {} bytes from {}: delivered={} skipped={} failed={}",
            payload.len(),
            from,
            report.delivered,
            report.skipped,
            report.failed
        );
        report
    }

    /// Idempotent; returns whether the connection was still registered.
    pub async fn on_close(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).await;
        if removed {
            info!("Connection {} left the relay", id);
        }
        removed
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.len().await
    }

    pub async fn shutdown(&self) {
        info!(
            "Closing {} remaining connections",
            self.connections.len().await
        );
        self.connections.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    struct TestClient {
        peer: Arc<ChannelPeer>,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl TestClient {
        async fn connect(relay: &Relay) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let peer = Arc::new(ChannelPeer::new(tx));
            relay.on_connect(peer.clone()).await;
            Self { peer, rx }
        }

        fn id(&self) -> ConnectionId {
            self.peer.id()
        }

        fn received(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                if let Message::Text(text) = message {
                    out.push(text);
                }
            }
            out
        }
    }

    #[tokio::test]
    async fn test_every_client_including_sender_receives_once() {
        let relay = Relay::new();
        let mut c1 = TestClient::connect(&relay).await;
        let mut c2 = TestClient::connect(&relay).await;
        let mut c3 = TestClient::connect(&relay).await;

        let report = relay.on_message(c1.id(), Payload::from("hello")).await;
        assert_eq!(report.delivered, 3);

        assert_eq!(c1.received(), vec!["hello"]);
        assert_eq!(c2.received(), vec!["hello"]);
        assert_eq!(c3.received(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_closed_client_is_not_a_recipient() {
        let relay = Relay::new();
        let mut c1 = TestClient::connect(&relay).await;
        let mut c2 = TestClient::connect(&relay).await;
        let mut c3 = TestClient::connect(&relay).await;

        assert!(relay.on_close(c2.id()).await);
        let report = relay.on_message(c1.id(), Payload::from("ping")).await;
        assert_eq!(report.delivered, 2);

        assert_eq!(c1.received(), vec!["ping"]);
        assert!(c2.received().is_empty());
        assert_eq!(c3.received(), vec!["ping"]);
    }

    #[tokio::test]
    async fn test_double_close_removes_once() {
        let relay = Relay::new();
        let c1 = TestClient::connect(&relay).await;
        let c2 = TestClient::connect(&relay).await;
        assert_eq!(relay.connection_count().await, 2);

        assert!(relay.on_close(c1.id()).await);
        assert!(!relay.on_close(c1.id()).await);
        assert_eq!(relay.connection_count().await, 1);

        let report = relay.on_message(c2.id(), Payload::from("after")).await;
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_per_sender_order_is_preserved() {
        let relay = Relay::new();
        let sender = TestClient::connect(&relay).await;
        let mut listener = TestClient::connect(&relay).await;

        for i in 0..50 {
            relay
                .on_message(sender.id(), Payload::from(format!("msg-{i}")))
                .await;
        }

        let expected: Vec<String> = (0..50).map(|i| format!("msg-{i}")).collect();
        assert_eq!(listener.received(), expected);
    }

    #[tokio::test]
    async fn test_message_from_unregistered_sender_is_still_relayed() {
        let relay = Relay::new();
        let mut c1 = TestClient::connect(&relay).await;

        relay.on_message(ConnectionId::new(), Payload::from("stray")).await;
        assert_eq!(c1.received(), vec!["stray"]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_members() {
        let relay = Relay::new();
        let mut c1 = TestClient::connect(&relay).await;

        relay.shutdown().await;
        assert_eq!(c1.peer.ready_state(), ReadyState::Closing);
        assert_eq!(c1.rx.try_recv().unwrap(), Message::Close(None));
    }
}
