//! Outgoing commands.
//!
//! Wire layout:
//!
//! ```text
//! VERB[ arg]*\n[size: u32 BE][payload]
//! ```
//!
//! The size and payload are only present for commands that carry a body,
//! such as IDENTIFY.

use crate::error::ProtocolError;
use crate::frame::MessageId;
use crate::identify::IdentifyParams;
use crate::MAX_FRAME_SIZE;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::time::Duration;

/// An immutable command sent from the client to nsqd.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    verb: String,
    args: Vec<Bytes>,
    payload: Option<Bytes>,
}

impl Command {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            args: Vec::new(),
            payload: None,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// IDENTIFY with the JSON-encoded client configuration as its body.
    pub fn identify(params: &IdentifyParams) -> Result<Self, ProtocolError> {
        let body = serde_json::to_vec(params)?;
        Ok(Self::new("IDENTIFY").with_payload(body))
    }

    /// No-op, used to answer heartbeats.
    pub fn nop() -> Self {
        Self::new("NOP")
    }

    /// Subscribes to `topic` on `channel`.
    pub fn subscribe(topic: &str, channel: &str) -> Self {
        Self::new("SUB")
            .with_arg(Bytes::copy_from_slice(topic.as_bytes()))
            .with_arg(Bytes::copy_from_slice(channel.as_bytes()))
    }

    /// Updates the number of messages the server may send in flight.
    pub fn ready(count: u32) -> Self {
        Self::new("RDY").with_arg(count.to_string())
    }

    /// Marks a message as successfully processed.
    pub fn finish(id: &MessageId) -> Self {
        Self::new("FIN").with_arg(Bytes::copy_from_slice(id.as_bytes()))
    }

    /// Re-queues a message after `delay`.
    pub fn requeue(id: &MessageId, delay: Duration) -> Self {
        Self::new("REQ")
            .with_arg(Bytes::copy_from_slice(id.as_bytes()))
            .with_arg(delay.as_millis().to_string())
    }

    /// Resets the server-side timeout of an in-flight message.
    pub fn touch(id: &MessageId) -> Self {
        Self::new("TOUCH").with_arg(Bytes::copy_from_slice(id.as_bytes()))
    }

    /// Asks the server to stop sending messages before closing.
    pub fn start_close() -> Self {
        Self::new("CLS")
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Encodes the command into its exact wire bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        check_token(self.verb.as_bytes())?;
        for arg in &self.args {
            check_token(arg)?;
        }

        let args_len: usize = self.args.iter().map(|a| a.len() + 1).sum();
        let payload_len = self.payload.as_ref().map_or(0, |p| p.len() + 4);
        let mut buf = BytesMut::with_capacity(self.verb.len() + args_len + 1 + payload_len);

        buf.put_slice(self.verb.as_bytes());
        for arg in &self.args {
            buf.put_u8(b' ');
            buf.put_slice(arg);
        }
        buf.put_u8(b'\n');

        if let Some(payload) = &self.payload {
            let size = u32::try_from(payload.len()).unwrap_or(u32::MAX);
            if size > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge {
                    size,
                    max: MAX_FRAME_SIZE,
                });
            }
            buf.put_u32(size);
            buf.put_slice(payload);
        }

        Ok(buf)
    }
}

/// Verbs and arguments must not contain the separators of the line format.
fn check_token(token: &[u8]) -> Result<(), ProtocolError> {
    if token.is_empty() || token.iter().any(|b| matches!(b, b' ' | b'\n' | b'\r')) {
        return Err(ProtocolError::InvalidArgument(
            String::from_utf8_lossy(token).into_owned(),
        ));
    }
    Ok(())
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        if let Some(payload) = &self.payload {
            write!(f, " [{} bytes]", payload.len())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("verb", &self.verb)
            .field(
                "args",
                &self
                    .args
                    .iter()
                    .map(|a| String::from_utf8_lossy(a))
                    .collect::<Vec<_>>(),
            )
            .field("payload_len", &self.payload.as_ref().map(|p| p.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_without_payload() {
        let encoded = Command::subscribe("orders", "billing").encode().unwrap();
        assert_eq!(&encoded[..], b"SUB orders billing\n");

        let encoded = Command::nop().encode().unwrap();
        assert_eq!(&encoded[..], b"NOP\n");
    }

    #[test]
    fn test_encode_with_payload() {
        let encoded = Command::new("IDENTIFY")
            .with_payload(&b"{}"[..])
            .encode()
            .unwrap();
        assert_eq!(&encoded[..], b"IDENTIFY\n\x00\x00\x00\x02{}");
    }

    #[test]
    fn test_message_commands() {
        let id = MessageId::new(*b"0123456789abcdef");

        let encoded = Command::finish(&id).encode().unwrap();
        assert_eq!(&encoded[..], b"FIN 0123456789abcdef\n");

        let encoded = Command::requeue(&id, Duration::from_secs(2)).encode().unwrap();
        assert_eq!(&encoded[..], b"REQ 0123456789abcdef 2000\n");

        let encoded = Command::touch(&id).encode().unwrap();
        assert_eq!(&encoded[..], b"TOUCH 0123456789abcdef\n");

        let encoded = Command::ready(25).encode().unwrap();
        assert_eq!(&encoded[..], b"RDY 25\n");

        let encoded = Command::start_close().encode().unwrap();
        assert_eq!(&encoded[..], b"CLS\n");
    }

    #[test]
    fn test_identify_carries_json_payload() {
        let params = IdentifyParams::new("client", "client.local", "test");
        let command = Command::identify(&params).unwrap();
        assert_eq!(command.verb(), "IDENTIFY");

        let payload = command.payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(value["client_id"], "client");
        assert_eq!(value["user_agent"], "test");
    }

    #[test]
    fn test_rejects_separator_in_argument() {
        let result = Command::subscribe("bad topic", "channel").encode();
        assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));

        let result = Command::new("SUB").with_arg("a\nb").encode();
        assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));

        let result = Command::new("SUB").with_arg("").encode();
        assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));
    }

    #[test]
    fn test_display_hides_payload_bytes() {
        let command = Command::new("IDENTIFY").with_payload(&b"secret"[..]);
        assert_eq!(command.to_string(), "IDENTIFY [6 bytes]");

        let debug = format!("{:?}", command);
        assert!(debug.contains("payload_len"));
        assert!(!debug.contains("secret"));

        assert_eq!(Command::subscribe("t", "c").to_string(), "SUB t c");
    }
}
