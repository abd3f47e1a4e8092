use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::peer::{ConnectionId, Payload, Peer, ReadyState};

/// Outcome of one fan-out, for diagnostics only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Live connections keyed by id. A single lock serializes membership changes
/// and broadcast iteration, so every recipient observes one global order.
#[derive(Default)]
pub struct ConnectionSet {
    connections: Mutex<HashMap<ConnectionId, Arc<dyn Peer>>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, peer: Arc<dyn Peer>) {
        self.connections.lock().await.insert(peer.id(), peer);
    }

    /// Returns whether `id` was present. Removing an absent id is a no-op.
    pub async fn remove(&self, id: &ConnectionId) -> bool {
        self.connections.lock().await.remove(id).is_some()
    }

    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Sends `payload` to every open member, the originator included.
    pub async fn broadcast(&self, payload: &Payload) -> BroadcastReport {
        let connections = self.connections.lock().await;
        let mut report = BroadcastReport::default();

        for (id, peer) in connections.iter() {
            if peer.ready_state() != ReadyState::Open {
                report.skipped += 1;
                continue;
            }

            // Delivery failures stay local to the recipient; the transport's
            // own close signal is what removes it from the set.
            match peer.send(payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!("Dropped message for connection {}: {}", id, e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    pub async fn close_all(&self) {
        let connections = self.connections.lock().await;
        for peer in connections.values() {
            peer.close();
        }
    }
}
