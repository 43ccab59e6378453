//! Error types for the transport crate.

use thiserror::Error;

/// Errors that can occur while establishing a leg transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Record-level failures on an established sealed channel.
///
/// Every variant is fatal to the session that hits it; a sealed stream is
/// never resynchronized after corruption.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealError {
    #[error("record length {0} out of bounds")]
    FrameLength(usize),

    #[error("record sequence mismatch: expected {expected}, got {got}")]
    Sequence { expected: u64, got: u64 },

    #[error("record authentication failed")]
    Auth,

    #[error("record encryption failed")]
    Encrypt,

    #[error("record sequence space exhausted")]
    SequenceExhausted,

    #[error("record payload size {0} out of range")]
    RecordSize(usize),
}

impl From<SealError> for std::io::Error {
    fn from(e: SealError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    }
}
