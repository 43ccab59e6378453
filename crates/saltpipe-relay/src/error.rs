//! Error types for the relay crate.

use thiserror::Error;

/// Errors that can occur while setting up or running a relay.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connect timeout to {0}")]
    ConnectTimeout(String),
}

impl From<saltpipe_transport::TransportError> for RelayError {
    fn from(err: saltpipe_transport::TransportError) -> Self {
        match err {
            saltpipe_transport::TransportError::Io(e) => RelayError::Io(e),
            saltpipe_transport::TransportError::Handshake(s) => RelayError::Handshake(s),
        }
    }
}
