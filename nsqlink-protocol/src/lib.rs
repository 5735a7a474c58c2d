//! # nsqlink-protocol
//!
//! Wire protocol implementation for the nsqd TCP protocol (V2).
//!
//! This crate provides:
//! - Size-prefixed inbound frame decoding (response, error, message)
//! - Outgoing command encoding with optional length-prefixed payloads
//! - The JSON document sent with IDENTIFY
//! - Protocol constants

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod identify;

pub use codec::{Decoder, Encoder};
pub use command::Command;
pub use error::ProtocolError;
pub use frame::{Frame, FrameType, MessageId, HEARTBEAT_RESPONSE};
pub use identify::{Compression, IdentifyParams};

/// Magic bytes written once, right after connecting, to select protocol V2.
pub const MAGIC_V2: &[u8; 4] = b"  V2";

/// Maximum accepted frame size (16 MiB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;
