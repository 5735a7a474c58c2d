//! Inbound frame format for the nsqd V2 protocol.
//!
//! Frame layout (8 bytes header + data):
//!
//! ```text
//! +---------+------------+----------------------+
//! |  size   | frame_type |         data         |
//! | 4 bytes |  4 bytes   |   size - 4 bytes     |
//! +---------+------------+----------------------+
//! ```
//!
//! Message frames carry a fixed prefix inside `data`:
//!
//! ```text
//! +-----------+----------+------------+------------------+
//! | timestamp | attempts | message id |       body       |
//! |  8 bytes  | 2 bytes  |  16 bytes  |  remaining bytes |
//! +-----------+----------+------------+------------------+
//! ```

use crate::error::ProtocolError;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Response text nsqd sends to check liveness.
pub const HEARTBEAT_RESPONSE: &str = "_heartbeat_";

/// Size of the big-endian size prefix.
const SIZE_PREFIX_LEN: usize = 4;

/// Size of the frame type field.
const FRAME_TYPE_LEN: usize = 4;

/// Length of a message id on the wire.
pub const MESSAGE_ID_LEN: usize = 16;

/// Fixed prefix of message frame data (8 + 2 + 16 = 26).
const MESSAGE_HEADER_LEN: usize = 8 + 2 + MESSAGE_ID_LEN;

/// Frame type discriminants as sent by nsqd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Response,
    Error,
    Message,
}

impl FrameType {
    pub fn from_u32(value: u32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(FrameType::Response),
            1 => Ok(FrameType::Error),
            2 => Ok(FrameType::Message),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            FrameType::Response => 0,
            FrameType::Error => 1,
            FrameType::Message => 2,
        }
    }
}

/// Opaque 16-byte message identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MESSAGE_ID_LEN]);

impl MessageId {
    pub fn new(bytes: [u8; MESSAGE_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let id: [u8; MESSAGE_ID_LEN] = bytes
            .try_into()
            .map_err(|_| ProtocolError::InvalidMessageId(bytes.len()))?;
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({self})")
    }
}

/// A decoded server-to-client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Control acknowledgment, or a heartbeat.
    Response { message: String },
    /// Server-reported error, e.g. `E_INVALID`.
    Error { code: String, message: String },
    /// Message pushed by the server, unrelated to any outstanding command.
    Message {
        id: MessageId,
        body: Bytes,
        timestamp_nanos: i64,
        attempts: u16,
    },
}

impl Frame {
    pub fn response(message: impl Into<String>) -> Self {
        Frame::Response {
            message: message.into(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Frame::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Response { .. } => FrameType::Response,
            Frame::Error { .. } => FrameType::Error,
            Frame::Message { .. } => FrameType::Message,
        }
    }

    /// Returns whether this is the server's heartbeat.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response { message } if message == HEARTBEAT_RESPONSE)
    }

    /// Encodes the frame as a server would send it.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut data = BytesMut::new();
        match self {
            Frame::Response { message } => data.put_slice(message.as_bytes()),
            Frame::Error { code, message } => {
                data.put_slice(code.as_bytes());
                if !message.is_empty() {
                    data.put_u8(b' ');
                    data.put_slice(message.as_bytes());
                }
            }
            Frame::Message {
                id,
                body,
                timestamp_nanos,
                attempts,
            } => {
                data.put_i64(*timestamp_nanos);
                data.put_u16(*attempts);
                data.put_slice(id.as_bytes());
                data.put_slice(body);
            }
        }

        let size = (FRAME_TYPE_LEN + data.len()) as u32;
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(SIZE_PREFIX_LEN + size as usize);
        buf.put_u32(size);
        buf.put_u32(self.frame_type().as_u32());
        buf.put_slice(&data);
        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// A frame of unknown type is removed from `buf` before the error is
    /// returned.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < SIZE_PREFIX_LEN {
            return Ok(None);
        }

        let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if (size as usize) < FRAME_TYPE_LEN {
            return Err(ProtocolError::FrameTooSmall(size));
        }
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        if buf.len() < SIZE_PREFIX_LEN + size as usize {
            return Ok(None);
        }

        buf.advance(SIZE_PREFIX_LEN);
        let raw_type = buf.get_u32();
        let data = buf.split_to(size as usize - FRAME_TYPE_LEN).freeze();

        let frame = match FrameType::from_u32(raw_type)? {
            FrameType::Response => Frame::Response {
                message: utf8(&data)?.to_string(),
            },
            FrameType::Error => {
                let text = utf8(&data)?;
                let (code, message) = text.split_once(' ').unwrap_or((text, ""));
                Frame::error(code, message)
            }
            FrameType::Message => decode_message(data)?,
        };

        Ok(Some(frame))
    }
}

fn utf8(data: &[u8]) -> Result<&str, ProtocolError> {
    std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)
}

fn decode_message(mut data: Bytes) -> Result<Frame, ProtocolError> {
    if data.len() < MESSAGE_HEADER_LEN {
        return Err(ProtocolError::MessageTooShort(data.len()));
    }

    let timestamp_nanos = data.get_i64();
    let attempts = data.get_u16();
    let id = MessageId::from_slice(&data.split_to(MESSAGE_ID_LEN))?;

    Ok(Frame::Message {
        id,
        body: data,
        timestamp_nanos,
        attempts,
    })
}
