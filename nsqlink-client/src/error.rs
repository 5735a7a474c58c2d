//! Client error types.

use crate::address::ServerAddress;
use crate::correlation::Stage;
use nsqlink_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// An error reported by nsqd in an `Error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} {message}")]
pub struct ServerError {
    /// Error code, e.g. `E_BAD_TOPIC`.
    pub code: String,
    /// Human-readable detail, possibly empty.
    pub message: String,
}

impl ServerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to {address}: {source}")]
    ConnectionFailure {
        address: ServerAddress,
        #[source]
        source: std::io::Error,
    },

    #[error("IDENTIFY with {address} timed out after {timeout:?}")]
    HandshakeTimeout {
        address: ServerAddress,
        timeout: Duration,
    },

    #[error("command {command} timed out waiting for {stage}")]
    CommandTimeout { command: String, stage: Stage },

    #[error("server error: {0}")]
    Protocol(ServerError),

    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),

    #[error("wait for {0} was interrupted")]
    InterruptedWait(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("{0} handler already attached")]
    AlreadyAttached(&'static str),

    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionFailure { .. }
                | ClientError::HandshakeTimeout { .. }
                | ClientError::CommandTimeout { .. }
                | ClientError::ConnectionClosed
                | ClientError::Io(_)
        )
    }

    /// Returns whether the connection that produced this error is unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionFailure { .. }
                | ClientError::HandshakeTimeout { .. }
                | ClientError::InterruptedWait(_)
                | ClientError::ConnectionClosed
                | ClientError::NotConnected
        )
    }
}

impl From<ServerError> for ClientError {
    fn from(error: ServerError) -> Self {
        ClientError::Protocol(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::new("E_BAD_TOPIC", "SUB topic name is not valid");
        assert_eq!(err.to_string(), "E_BAD_TOPIC SUB topic name is not valid");

        let err: ClientError = err.into();
        assert!(err.to_string().starts_with("server error: E_BAD_TOPIC"));
    }

    #[test]
    fn test_command_timeout_is_recoverable() {
        let err = ClientError::CommandTimeout {
            command: "SUB".to_string(),
            stage: Stage::Response,
        };
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("SUB"));
        assert!(err.to_string().contains("response"));
    }

    #[test]
    fn test_fatal_errors() {
        let address = ServerAddress::new("127.0.0.1", 4150);
        assert!(ClientError::HandshakeTimeout {
            address: address.clone(),
            timeout: Duration::from_secs(15),
        }
        .is_fatal());
        assert!(ClientError::ConnectionFailure {
            address,
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        }
        .is_fatal());
        assert!(ClientError::InterruptedWait("IDENTIFY".to_string()).is_fatal());
        assert!(ClientError::ConnectionClosed.is_fatal());

        assert!(!ClientError::Protocol(ServerError::new("E_INVALID", "")).is_fatal());
        assert!(!ClientError::UnexpectedFrame("OK".to_string()).is_fatal());
    }

    #[test]
    fn test_server_errors_are_not_retryable() {
        assert!(!ClientError::Protocol(ServerError::new("E_INVALID", "")).is_retryable());
        assert!(!ClientError::AlreadyAttached("message").is_retryable());
    }
}
