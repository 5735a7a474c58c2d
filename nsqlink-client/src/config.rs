//! Connection configuration.

use crate::error::ClientError;
use nsqlink_protocol::{Compression, IdentifyParams};
use std::time::Duration;
use tokio::runtime::Handle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Bound applied to each stage of a command exchange.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Default dial timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest gap between heartbeats before the connection is considered unhealthy.
pub const DEFAULT_HEARTBEAT_MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Connection configuration.
///
/// The first group of fields is sent to nsqd in IDENTIFY; the rest tune the
/// local engine.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Short client identifier.
    pub client_id: String,
    /// Full host name of this client.
    pub hostname: String,
    /// Whether the caller expects the server's negotiated settings in the
    /// IDENTIFY response. IDENTIFY itself always requests negotiation.
    pub feature_negotiation: bool,
    /// Server heartbeat interval in milliseconds (-1 disables).
    pub heartbeat_interval: Option<i32>,
    /// Server-side output buffer size in bytes.
    pub output_buffer_size: Option<i32>,
    /// Server-side output buffer flush timeout in milliseconds.
    pub output_buffer_timeout: Option<i32>,
    /// Request a TLS upgrade.
    pub tls_v1: bool,
    /// Requested compression.
    pub compression: Compression,
    /// Deflate level, only meaningful with deflate compression.
    pub deflate_level: Option<u8>,
    /// Percentage of messages to receive (0-99).
    pub sample_rate: Option<u8>,
    /// Server-side message timeout in milliseconds.
    pub msg_timeout: Option<u32>,
    /// User agent sent to the server.
    pub user_agent: String,
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// Bound for each command stage (slot, write, response).
    pub command_timeout: Duration,
    /// Heartbeat gap tolerated by `is_heartbeat_status_ok`.
    pub heartbeat_max_interval: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Runtime that hosts the connection's I/O tasks.
    /// If None, the runtime calling `Connection::connect` is used.
    pub runtime: Option<Handle>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let hostname = local_hostname();
        let client_id = hostname.split('.').next().unwrap_or(&hostname).to_string();
        Self {
            client_id,
            hostname,
            feature_negotiation: true,
            heartbeat_interval: None,
            output_buffer_size: None,
            output_buffer_timeout: None,
            tls_v1: false,
            compression: Compression::None,
            deflate_level: None,
            sample_rate: None,
            msg_timeout: None,
            user_agent: format!("nsqlink/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            heartbeat_max_interval: DEFAULT_HEARTBEAT_MAX_INTERVAL,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            runtime: None,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_feature_negotiation(mut self, enabled: bool) -> Self {
        self.feature_negotiation = enabled;
        self
    }

    pub fn with_heartbeat_interval(mut self, millis: i32) -> Self {
        self.heartbeat_interval = Some(millis);
        self
    }

    pub fn with_output_buffer(mut self, size: i32, timeout_millis: i32) -> Self {
        self.output_buffer_size = Some(size);
        self.output_buffer_timeout = Some(timeout_millis);
        self
    }

    pub fn with_tls_v1(mut self, enabled: bool) -> Self {
        self.tls_v1 = enabled;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_deflate_level(mut self, level: u8) -> Self {
        self.deflate_level = Some(level.clamp(1, 9));
        self
    }

    pub fn with_sample_rate(mut self, rate: u8) -> Self {
        self.sample_rate = Some(rate.min(99));
        self
    }

    pub fn with_msg_timeout(mut self, millis: u32) -> Self {
        self.msg_timeout = Some(millis);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_heartbeat_max_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_max_interval = interval;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the IDENTIFY document for this configuration.
    pub fn identify_params(&self) -> IdentifyParams {
        let mut params = IdentifyParams::new(&self.client_id, &self.hostname, &self.user_agent)
            .with_compression(self.compression);
        params.heartbeat_interval = self.heartbeat_interval;
        params.output_buffer_size = self.output_buffer_size;
        params.output_buffer_timeout = self.output_buffer_timeout;
        params.tls_v1 = self.tls_v1;
        params.deflate_level = self.deflate_level;
        params.sample_rate = self.sample_rate;
        params.msg_timeout = self.msg_timeout;
        params
    }

    /// Returns the runtime the connection's tasks are spawned on.
    pub(crate) fn runtime_handle(&self) -> Result<Handle, ClientError> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|_| ClientError::NoRuntime),
        }
    }
}

fn local_hostname() -> String {
    resolve_hostname(std::env::var("HOSTNAME").ok())
}

/// `HOSTNAME` overrides the system host name when set and non-empty.
fn resolve_hostname(env_override: Option<String>) -> String {
    env_override
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            gethostname::gethostname()
                .into_string()
                .ok()
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}
