//! Protocol error types and response status codes.

use bolt_hessian::HessianError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while framing, encoding or decoding Bolt packets.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown protocol type:{0}")]
    UnknownProtocol(u8),

    #[error("unknown rpc type: {0}")]
    UnknownRpcType(u8),

    #[error("unknown command code: {0}")]
    UnknownCommand(u16),

    #[error("unknown codec: {0}")]
    UnknownCodec(u8),

    #[error("CRC check failed! expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("truncated packet: need {needed} more bytes")]
    Truncated { needed: usize },

    #[error("{field} too large: {size} bytes (max {max})")]
    FrameTooLarge {
        field: &'static str,
        size: usize,
        max: usize,
    },

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("malformed header block")]
    MalformedHeader,

    #[error("malformed content: {0}")]
    MalformedContent(String),

    #[error("hessian error: {0}")]
    Hessian(#[from] HessianError),

    #[error("no such Method '{method}' in Service '{service}'")]
    UnknownMethod { service: String, method: String },

    #[error("protobuf codec requested but no protobuf context is configured")]
    ProtobufUnavailable,

    #[error("protobuf error: {0}")]
    Protobuf(String),

    #[error("not found req for res#{0}")]
    SentRequestNotFound(u32),

    #[error("service:{service} spends {elapsed_ms}(ms), and exceed the {limit_ms}(ms) limit.")]
    ResponseTimeout {
        service: String,
        elapsed_ms: u64,
        limit_ms: u64,
    },
}

impl ProtocolError {
    /// Result code reported alongside the error, when it has one.
    pub fn result_code(&self) -> Option<&'static str> {
        match self {
            ProtocolError::ResponseTimeout { .. } => Some("03"),
            _ => None,
        }
    }
}

/// A fatal stream decode failure. Carries the bytes that were buffered when
/// decoding failed so the caller can inspect or log them.
#[derive(Debug, Error)]
#[error("failed to decode packet: {source} ({} buffered bytes)", .raw.len())]
pub struct DecodeError {
    #[source]
    pub source: ProtocolError,
    pub raw: Bytes,
}

/// Response status carried in the 16-bit status field.
///
/// Codes are part of the wire contract and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Error,
    ServerException,
    Unknown,
    ServerThreadpoolBusy,
    ErrorComm,
    NoProcessor,
    Timeout,
    ClientSendError,
    CodecException,
    ConnectionClosed,
    /// Any code not in the table above.
    Other(u16),
}

impl ResponseStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => ResponseStatus::Success,
            1 => ResponseStatus::Error,
            2 => ResponseStatus::ServerException,
            3 => ResponseStatus::Unknown,
            4 => ResponseStatus::ServerThreadpoolBusy,
            5 => ResponseStatus::ErrorComm,
            6 => ResponseStatus::NoProcessor,
            7 => ResponseStatus::Timeout,
            8 => ResponseStatus::ClientSendError,
            9 => ResponseStatus::CodecException,
            16 => ResponseStatus::ConnectionClosed,
            other => ResponseStatus::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            ResponseStatus::Success => 0,
            ResponseStatus::Error => 1,
            ResponseStatus::ServerException => 2,
            ResponseStatus::Unknown => 3,
            ResponseStatus::ServerThreadpoolBusy => 4,
            ResponseStatus::ErrorComm => 5,
            ResponseStatus::NoProcessor => 6,
            ResponseStatus::Timeout => 7,
            ResponseStatus::ClientSendError => 8,
            ResponseStatus::CodecException => 9,
            ResponseStatus::ConnectionClosed => 16,
            ResponseStatus::Other(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseStatus::Success)
    }

    /// Returns whether a call failing with this status may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResponseStatus::ServerThreadpoolBusy
                | ResponseStatus::Timeout
                | ResponseStatus::ConnectionClosed
                | ResponseStatus::ErrorComm
        )
    }

    /// Message used when the peer sent no usable error payload.
    pub fn default_message(&self) -> String {
        match self {
            ResponseStatus::Timeout => "Invoke timeout when invoke with callback.".to_string(),
            ResponseStatus::ConnectionClosed => {
                "Connection closed when invoke with callback.".to_string()
            }
            ResponseStatus::ServerThreadpoolBusy => {
                "Server thread pool busy when invoke with callback.".to_string()
            }
            other => format!(
                "Exception caught in invocation. responseStatus: {}",
                other.code()
            ),
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseStatus::Success => "SUCCESS",
            ResponseStatus::Error => "ERROR",
            ResponseStatus::ServerException => "SERVER_EXCEPTION",
            ResponseStatus::Unknown => "UNKNOWN",
            ResponseStatus::ServerThreadpoolBusy => "SERVER_THREADPOOL_BUSY",
            ResponseStatus::ErrorComm => "ERROR_COMM",
            ResponseStatus::NoProcessor => "NO_PROCESSOR",
            ResponseStatus::Timeout => "TIMEOUT",
            ResponseStatus::ClientSendError => "CLIENT_SEND_ERROR",
            ResponseStatus::CodecException => "CODEC_EXCEPTION",
            ResponseStatus::ConnectionClosed => "CONNECTION_CLOSED",
            ResponseStatus::Other(code) => return write!(f, "STATUS_{code}"),
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_roundtrip() {
        for code in [0u16, 1, 2, 3, 4, 5, 6, 7, 8, 9, 16, 42] {
            assert_eq!(ResponseStatus::from_code(code).code(), code);
        }
        assert_eq!(ResponseStatus::from_code(16), ResponseStatus::ConnectionClosed);
        assert_eq!(ResponseStatus::from_code(42), ResponseStatus::Other(42));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ResponseStatus::Success.to_string(), "SUCCESS");
        assert_eq!(
            ResponseStatus::ServerThreadpoolBusy.to_string(),
            "SERVER_THREADPOOL_BUSY"
        );
        assert_eq!(ResponseStatus::Other(12).to_string(), "STATUS_12");
    }

    #[test]
    fn test_status_retryable() {
        assert!(ResponseStatus::Timeout.is_retryable());
        assert!(ResponseStatus::ConnectionClosed.is_retryable());
        assert!(!ResponseStatus::ServerException.is_retryable());
        assert!(!ResponseStatus::Success.is_retryable());
    }

    #[test]
    fn test_default_messages() {
        assert_eq!(
            ResponseStatus::Timeout.default_message(),
            "Invoke timeout when invoke with callback."
        );
        assert_eq!(
            ResponseStatus::NoProcessor.default_message(),
            "Exception caught in invocation. responseStatus: 6"
        );
    }

    #[test]
    fn test_response_timeout_message() {
        let err = ProtocolError::ResponseTimeout {
            service: "com.demo.Svc:1.0#plus".into(),
            elapsed_ms: 250,
            limit_ms: 100,
        };
        assert_eq!(
            err.to_string(),
            "service:com.demo.Svc:1.0#plus spends 250(ms), and exceed the 100(ms) limit."
        );
        assert_eq!(err.result_code(), Some("03"));
        assert_eq!(ProtocolError::MalformedHeader.result_code(), None);
    }
}
