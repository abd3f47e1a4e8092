use thiserror::Error;

use crate::relay::ConnectionId;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Bind error: {0}")]
    Bind(#[from] BindError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement conversion from config::ConfigError
impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Internal(err.to_string())
    }
}

/// The listening socket could not be acquired. Always fatal at startup.
#[derive(Error, Debug)]
pub enum BindError {
    #[error("port {0} is out of range (expected 0-65535)")]
    InvalidPort(i64),

    #[error("port {port} is unavailable on {host}: {source}")]
    Unavailable {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl BindError {
    pub fn port(&self) -> i64 {
        match self {
            BindError::InvalidPort(port) => *port,
            BindError::Unavailable { port, .. } => i64::from(*port),
        }
    }
}

/// Sending to a single recipient failed. Never propagated past the broadcast.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection {0} is no longer accepting frames")]
    Closed(ConnectionId),

    #[error("transport write failed: {0}")]
    Transport(String),
}
