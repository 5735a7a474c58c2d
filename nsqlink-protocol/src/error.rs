//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur while framing or encoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("frame too small: size field {0} cannot hold a frame type")]
    FrameTooSmall(u32),

    #[error("message frame too short: {0} bytes")]
    MessageTooShort(usize),

    #[error("unknown frame type: {0}")]
    UnknownFrameType(u32),

    #[error("invalid message id length: {0}")]
    InvalidMessageId(usize),

    #[error("invalid UTF-8 in frame data")]
    InvalidUtf8,

    #[error("invalid command argument: {0:?}")]
    InvalidArgument(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the decoder can keep going after this error.
    ///
    /// Unknown frame types are consumed whole, so the stream stays aligned.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::UnknownFrameType(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::FrameTooSmall(2);
        assert!(err.to_string().contains('2'));

        let err = ProtocolError::MessageTooShort(12);
        assert!(err.to_string().contains("12"));

        let err = ProtocolError::UnknownFrameType(7);
        assert!(err.to_string().contains('7'));

        let err = ProtocolError::InvalidUtf8;
        assert!(err.to_string().contains("UTF-8"));

        let err = ProtocolError::InvalidArgument("a b".to_string());
        assert!(err.to_string().contains("a b"));
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(ProtocolError::UnknownFrameType(9).is_recoverable());
        assert!(!ProtocolError::FrameTooSmall(0).is_recoverable());
        assert!(!ProtocolError::InvalidUtf8.is_recoverable());
        assert!(!ProtocolError::MessageTooShort(3).is_recoverable());
    }
}
