//! Transport error types.

use thiserror::Error;

/// The request never produced a status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid probe address: {0}")]
    InvalidAddress(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("no reply within the transport deadline")]
    Deadline,
}

impl TransportError {
    /// Short classifier stored in `Outcome::NetworkError`.
    pub fn classifier(&self) -> &'static str {
        match self {
            TransportError::InvalidAddress(_) => "invalid-address",
            TransportError::Connect(_) => "connect",
            TransportError::Handshake(_) => "handshake",
            TransportError::Request(_) => "request",
            TransportError::Deadline => "deadline",
        }
    }
}
