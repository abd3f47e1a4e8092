use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::error::DeliveryError;

/// Identity of one accepted connection. A reconnecting client gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Transport-reported readiness of a connection. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Message body as received from a client. Never inspected by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Text rendition used on the wire; invalid UTF-8 is replaced lossily.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

/// Outbound half of a client connection as seen by the relay.
#[cfg_attr(test, mockall::automock)]
pub trait Peer: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn ready_state(&self) -> ReadyState;

    /// Queues `payload` as a text frame. Must not block.
    fn send(&self, payload: &Payload) -> Result<(), DeliveryError>;

    /// Queues a close frame and marks the peer as closing.
    fn close(&self);
}

/// Peer backed by the writer task of a tungstenite connection.
#[derive(Debug)]
pub struct ChannelPeer {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
    state: AtomicU8,
}

impl ChannelPeer {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
            state: AtomicU8::new(ReadyState::Open as u8),
        }
    }

    /// Advances the readiness state; attempts to move backwards are ignored.
    pub fn advance(&self, next: ReadyState) {
        self.state.fetch_max(next as u8, Ordering::AcqRel);
    }
}

impl Peer for ChannelPeer {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn send(&self, payload: &Payload) -> Result<(), DeliveryError> {
        self.tx
            .send(Message::Text(payload.to_text()))
            .map_err(|_| DeliveryError::Closed(self.id))
    }

    fn close(&self) {
        self.advance(ReadyState::Closing);
        // The writer may already be gone; nothing left to close in that case.
        let _ = self.tx.send(Message::Close(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_state_only_moves_forward() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = ChannelPeer::new(tx);
        assert_eq!(peer.ready_state(), ReadyState::Open);

        peer.advance(ReadyState::Closed);
        peer.advance(ReadyState::Open);
        assert_eq!(peer.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn test_send_queues_text_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = ChannelPeer::new(tx);

        assert_ok!(peer.send(&Payload::from("hello")));
        assert_eq!(rx.try_recv().unwrap(), Message::Text("hello".to_string()));

        assert_ok!(peer.send(&Payload::from(vec![0x68, 0x69])));
        assert_eq!(rx.try_recv().unwrap(), Message::Text("hi".to_string()));
    }

    #[test]
    fn test_send_after_writer_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = ChannelPeer::new(tx);
        drop(rx);

        let err = assert_err!(peer.send(&Payload::from("lost")));
        assert_eq!(err, DeliveryError::Closed(peer.id()));
    }

    #[test]
    fn test_close_queues_close_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = ChannelPeer::new(tx);

        peer.close();
        assert_eq!(peer.ready_state(), ReadyState::Closing);
        assert_eq!(rx.try_recv().unwrap(), Message::Close(None));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let payload = Payload::from(vec![b'o', 0xff, b'k']);
        assert_eq!(payload.len(), 3);
        assert_eq!(payload.to_text(), "o\u{fffd}k");
    }
}
