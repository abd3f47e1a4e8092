use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{ChannelPeer, Payload, Peer, ReadyState, Relay};
use crate::error::BindError;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Accept loop feeding tungstenite connection events into a [`Relay`].
pub struct RelayServer {
    listener: TcpListener,
    relay: Arc<Relay>,
}

impl RelayServer {
    /// Binds the listening socket. Any failure here is fatal for the process.
    pub async fn start(host: &str, port: i64) -> Result<Self, BindError> {
        let port = u16::try_from(port).map_err(|_| BindError::InvalidPort(port))?;
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| BindError::Unavailable {
                host: host.to_string(),
                port,
                source,
            })?;

        Ok(Self {
            listener,
            relay: Arc::new(Relay::new()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn relay(&self) -> Arc<Relay> {
        self.relay.clone()
    }

    /// Accepts connections until `shutdown` resolves, then closes every client.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer { listener, relay } = self;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Relay shutting down");
                    relay.shutdown().await;
                    drain(&relay).await;
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let relay = relay.clone();
                        tokio::spawn(handle_connection(relay, stream, addr));
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        }
    }

    pub async fn run_until_ctrl_c(self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install ctrl-c handler: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

/// Gives writer tasks a moment to flush their close frames.
async fn drain(relay: &Relay) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while relay.connection_count().await > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn handle_connection(relay: Arc<Relay>, raw_stream: TcpStream, addr: SocketAddr) {
    // Connecting: invisible to the relay until the handshake completes.
    let ws_stream = match tokio_tungstenite::accept_async(raw_stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Websocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let (ws_sink, ws_stream) = ws_stream.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let peer = Arc::new(ChannelPeer::new(tx));
    let connection_id = peer.id();

    relay.on_connect(peer.clone()).await;
    info!("Connection {} opened from {}", connection_id, addr);

    // Forward queued frames from rx to the socket
    let writer_peer = Arc::downgrade(&peer);
    let mut send_task = tokio::spawn(async move {
        let mut ws_sink = ws_sink;
        let mut rx = rx;

        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = ws_sink.send(message).await {
                // Socket-level failure: the transport is gone, unlike a DeliveryError.
                debug!("Write to connection {} failed: {}", connection_id, e);
                if let Some(peer) = writer_peer.upgrade() {
                    peer.advance(ReadyState::Closing);
                }
                return;
            }
            if closing {
                break;
            }
        }

        if let Err(e) = ws_sink.close().await {
            debug!("Error closing connection {}: {}", connection_id, e);
        }
    });

    // Relay inbound frames one at a time to keep per-sender order
    let reader_relay = relay.clone();
    let reader_peer = peer.clone();
    let mut receive_task = tokio::spawn(async move {
        let mut ws_stream = ws_stream;

        while let Some(message) = ws_stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    reader_relay
                        .on_message(connection_id, Payload::from(text))
                        .await;
                }
                Ok(Message::Binary(bytes)) => {
                    reader_relay
                        .on_message(connection_id, Payload::from(bytes))
                        .await;
                }
                Ok(Message::Close(frame)) => {
                    debug!("Client closed connection {}: {:?}", connection_id, frame);
                    reader_peer.advance(ReadyState::Closing);
                    break;
                }
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => {}
                Err(e) => {
                    debug!("Read from connection {} failed: {}", connection_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            receive_task.abort();
        }
        _ = &mut receive_task => {}
    }

    peer.advance(ReadyState::Closed);
    relay.on_close(connection_id).await;
    info!("Connection {} from {} closed", connection_id, addr);
}
