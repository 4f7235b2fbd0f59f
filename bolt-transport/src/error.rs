//! Transport error types.

use crate::config::ConfigError;
use bolt_protocol::{DecodeError, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection closed with {buffered} bytes of an incomplete packet")]
    UnexpectedEof { buffered: usize },

    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

impl TransportError {
    /// Returns true if reconnecting and retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_)
                | TransportError::ConnectionClosed
                | TransportError::UnexpectedEof { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(TransportError::ConnectionClosed.is_retryable());
        assert!(TransportError::UnexpectedEof { buffered: 3 }.is_retryable());
        assert!(!TransportError::Protocol(ProtocolError::UnknownProtocol(9)).is_retryable());
    }

    #[test]
    fn test_decode_error_is_transparent() {
        let err = TransportError::from(DecodeError {
            source: ProtocolError::UnknownProtocol(9),
            raw: bytes::Bytes::from_static(&[9]),
        });
        assert_eq!(
            err.to_string(),
            "failed to decode packet: Unknown protocol type:9 (1 buffered bytes)"
        );
    }
}
