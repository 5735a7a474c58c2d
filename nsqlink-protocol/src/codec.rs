//! Encoder and decoder for commands and frames.

use crate::command::Command;
use crate::error::ProtocolError;
use crate::frame::Frame;
use bytes::BytesMut;

const DEFAULT_CAPACITY: usize = 8 * 1024;

/// Encodes commands (client side) and frames (server side).
pub struct Encoder;

impl Encoder {
    /// Encodes a command into its wire bytes.
    pub fn encode_command(command: &Command) -> Result<BytesMut, ProtocolError> {
        command.encode()
    }

    /// Encodes a frame as nsqd would send it.
    pub fn encode_frame(frame: &Frame) -> Result<BytesMut, ProtocolError> {
        frame.encode()
    }
}

/// Buffers raw socket bytes and yields frames in arrival order.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a decoder sized for reads of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends bytes read from the socket.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Takes the next complete frame, if one is buffered.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
