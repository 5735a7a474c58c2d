//! JSON document sent with IDENTIFY.

use serde::{Deserialize, Serialize};

/// Compression the client asks nsqd to negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Deflate,
    Snappy,
}

/// Client capabilities declared during the handshake.
///
/// Optional settings are omitted from the JSON unless set, and boolean
/// capabilities are omitted unless enabled. Field order is the
/// serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyParams {
    pub client_id: String,
    pub hostname: String,
    /// Always sent as `true`; nsqd then answers IDENTIFY with its settings.
    #[serde(serialize_with = "always_true")]
    feature_negotiation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_buffer_size: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_buffer_timeout: Option<i32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub tls_v1: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub snappy: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deflate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deflate_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_timeout: Option<u32>,
    pub user_agent: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn always_true<S: serde::Serializer>(_: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bool(true)
}

impl IdentifyParams {
    pub fn new(
        client_id: impl Into<String>,
        hostname: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            hostname: hostname.into(),
            feature_negotiation: true,
            heartbeat_interval: None,
            output_buffer_size: None,
            output_buffer_timeout: None,
            tls_v1: false,
            snappy: false,
            deflate: false,
            deflate_level: None,
            sample_rate: None,
            msg_timeout: None,
            user_agent: user_agent.into(),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.snappy = compression == Compression::Snappy;
        self.deflate = compression == Compression::Deflate;
        self
    }
}
