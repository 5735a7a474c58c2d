//! Connection management.
//!
//! A `Connection` owns one TCP stream to nsqd. The write half belongs to a
//! writer task, the read half to a reader task that decodes frames and hands
//! them to the [`FrameDispatcher`]. Callers issue commands concurrently;
//! the correlator lets exactly one of them wait for a response at a time.

use crate::address::ServerAddress;
use crate::config::ConnectionConfig;
use crate::correlation::{Correlator, Stage};
use crate::dispatcher::{spawn_message_worker, FrameDispatcher};
use crate::error::{ClientError, ServerError};
use crate::handler::{ErrorHandler, MessageHandler};
use crate::heartbeat::HeartbeatMonitor;
use crate::writer::{spawn_writer_task, WriterHandle};
use bytes::Bytes;
use nsqlink_protocol::{Command, Decoder, Encoder, Frame, MAGIC_V2};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub(crate) struct Shared {
    address: ServerAddress,
    config: ConnectionConfig,
    runtime: Handle,
    correlator: Arc<Correlator>,
    heartbeat: Arc<HeartbeatMonitor>,
    writer: WriterHandle,
    dispatcher: Arc<FrameDispatcher>,
    connected: AtomicBool,
    /// Reader and writer tasks, aborted on close.
    io_tasks: Mutex<Vec<JoinHandle<()>>>,
    identify_response: OnceLock<String>,
}

impl Shared {
    fn close(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Closing connection: {}", self.address);

        self.correlator.cancel();
        // Both halves are dropped here, so the socket closes even when a
        // write is stuck on a peer that stopped reading
        for task in self.io_tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.close();
    }
}

/// A connection to one nsqd instance.
///
/// Cheap to clone; every clone refers to the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Shared>,
}

impl Connection {
    /// Dials `address`, sends the protocol magic and completes IDENTIFY.
    ///
    /// On any failure after the socket is open, the socket is closed before
    /// the error is returned.
    pub async fn connect(
        address: ServerAddress,
        config: ConnectionConfig,
    ) -> Result<Self, ClientError> {
        let runtime = config.runtime_handle()?;
        tracing::debug!("Connecting to {}...", address);

        let stream = dial(&address, config.connect_timeout, &runtime).await?;
        stream.set_nodelay(true).ok();
        tracing::info!("Created connection: {}", address);

        let (read_half, write_half) = stream.into_split();
        let connection = Self::start(address, config, runtime, read_half, write_half);
        connection.handshake().await?;
        Ok(connection)
    }

    pub(crate) fn from_shared(inner: Arc<Shared>) -> Self {
        Self { inner }
    }

    fn start(
        address: ServerAddress,
        config: ConnectionConfig,
        runtime: Handle,
        read_half: OwnedReadHalf,
        write_half: OwnedWriteHalf,
    ) -> Self {
        let correlator = Arc::new(Correlator::new(config.command_timeout));
        let heartbeat = Arc::new(HeartbeatMonitor::new(config.heartbeat_max_interval));
        let (writer, writer_task) = spawn_writer_task(&runtime, write_half);
        let read_buffer_size = config.read_buffer_size;

        let inner = Arc::new_cyclic(|owner: &Weak<Shared>| Shared {
            dispatcher: Arc::new(FrameDispatcher::new(
                correlator.clone(),
                heartbeat.clone(),
                writer.clone(),
                owner.clone(),
            )),
            address,
            config,
            runtime: runtime.clone(),
            correlator,
            heartbeat,
            writer,
            connected: AtomicBool::new(true),
            io_tasks: Mutex::new(vec![writer_task]),
            identify_response: OnceLock::new(),
        });

        let reader = runtime.spawn(run_reader(
            read_half,
            inner.dispatcher.clone(),
            Arc::downgrade(&inner),
            read_buffer_size,
        ));
        inner.io_tasks.lock().push(reader);

        Self { inner }
    }

    async fn handshake(&self) -> Result<(), ClientError> {
        let address = &self.inner.address;

        if let Err(e) = self.inner.writer.send(Bytes::from_static(MAGIC_V2)) {
            self.close();
            return Err(e);
        }

        let identify = match Command::identify(&self.inner.config.identify_params()) {
            Ok(command) => command,
            Err(e) => {
                self.close();
                return Err(e.into());
            }
        };
        tracing::debug!("Sending IDENTIFY to {}", address);

        match self.send_and_wait(identify).await {
            Ok(Frame::Response { message }) => {
                tracing::info!("Server identification from {}: {}", address, message);
                let _ = self.inner.identify_response.set(message);
                Ok(())
            }
            Ok(Frame::Error { code, message }) => {
                let error = ServerError::new(code, message);
                tracing::error!("IDENTIFY rejected by {}: {}", address, error);
                self.close();
                Err(ClientError::Protocol(error))
            }
            Ok(other) => {
                self.close();
                Err(ClientError::UnexpectedFrame(format!("{:?}", other)))
            }
            Err(ClientError::CommandTimeout { .. }) => {
                tracing::error!("Creating connection to {} timed out", address);
                self.close();
                Err(ClientError::HandshakeTimeout {
                    address: address.clone(),
                    timeout: self.inner.config.command_timeout,
                })
            }
            Err(e) => {
                tracing::error!("Handshake with {} failed: {}", address, e);
                self.close();
                Err(e)
            }
        }
    }

    /// Sends a command and waits for the frame that answers it.
    ///
    /// The returned frame is either a `Response` or an `Error`. Only one
    /// command waits at a time; concurrent callers queue for the request slot.
    pub async fn send_and_wait(&self, command: Command) -> Result<Frame, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let bytes = Encoder::encode_command(&command)?.freeze();
        let verb = command.verb().to_string();

        let exchange = self.inner.correlator.begin(&command).await?;
        tracing::debug!("Sending {}", command);
        let written = self.inner.writer.send_with_completion(bytes)?;

        let timeout = self.inner.correlator.timeout();
        match tokio::time::timeout(timeout, written).await {
            Err(_) => {
                tracing::error!(
                    "Write of {} not completed within {:?}, closing {}",
                    verb,
                    timeout,
                    self.inner.address
                );
                self.close();
                return Err(ClientError::CommandTimeout {
                    command: verb,
                    stage: Stage::Write,
                });
            }
            Ok(Err(_)) if !self.is_connected() => return Err(ClientError::ConnectionClosed),
            Ok(Err(_)) => {
                tracing::warn!("Writer stopped while {} was in flight", verb);
                self.close();
                return Err(ClientError::InterruptedWait(verb));
            }
            Ok(Ok(Err(e))) => {
                tracing::error!("Write of {} failed: {}", verb, e);
                self.close();
                return Err(ClientError::Io(e));
            }
            Ok(Ok(Ok(()))) => {}
        }

        exchange.wait().await
    }

    /// Sends a command that expects no response.
    pub fn send(&self, command: Command) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let bytes = Encoder::encode_command(&command)?.freeze();
        tracing::trace!("Sending {}", command);
        self.inner.writer.send(bytes)
    }

    /// Sends a command and returns the response text, turning an `Error`
    /// frame into `ClientError::Protocol`.
    pub async fn request(&self, command: Command) -> Result<String, ClientError> {
        match self.send_and_wait(command).await? {
            Frame::Response { message } => Ok(message),
            Frame::Error { code, message } => Err(ServerError::new(code, message).into()),
            other => Err(ClientError::UnexpectedFrame(format!("{:?}", other))),
        }
    }

    /// Closes the connection. Idempotent.
    ///
    /// A caller blocked in `send_and_wait` is released with
    /// `ConnectionClosed`.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns whether a command is currently waiting for its response.
    pub fn is_request_in_progress(&self) -> bool {
        self.inner.correlator.is_request_in_progress()
    }

    /// Returns true while the last heartbeat is recent enough.
    pub fn is_heartbeat_status_ok(&self) -> bool {
        self.inner.heartbeat.is_ok()
    }

    pub fn since_last_heartbeat(&self) -> Duration {
        self.inner.heartbeat.since_last()
    }

    pub fn server_address(&self) -> &ServerAddress {
        &self.inner.address
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// The server's answer to IDENTIFY, verbatim.
    pub fn identify_response(&self) -> Option<&str> {
        self.inner.identify_response.get().map(String::as_str)
    }

    /// Attaches the handler for messages pushed by the server.
    ///
    /// Messages that arrive before a handler is attached are dropped.
    pub fn set_message_handler(&self, handler: impl MessageHandler) -> Result<(), ClientError> {
        let tx = spawn_message_worker(&self.inner.runtime, Arc::new(handler));
        self.inner.dispatcher.attach_message_sender(tx)
    }

    /// Attaches the handler for `Error` frames.
    pub fn set_error_handler(&self, handler: impl ErrorHandler) -> Result<(), ClientError> {
        self.inner.dispatcher.attach_error_handler(Arc::new(handler))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.inner.address)
            .field("connected", &self.is_connected())
            .field("request_in_progress", &self.is_request_in_progress())
            .finish()
    }
}

/// Opens the TCP stream on `runtime` so its I/O is driven there.
async fn dial(
    address: &ServerAddress,
    timeout: Duration,
    runtime: &Handle,
) -> Result<TcpStream, ClientError> {
    let target = (address.host().to_string(), address.port());
    let attempt = runtime.spawn(async move {
        tokio::time::timeout(timeout, TcpStream::connect(target)).await
    });

    let result = match attempt.await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => {
            tracing::debug!("Connection timeout");
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect timed out after {:?}", timeout),
            ))
        }
        Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
    };

    result.map_err(|source| {
        tracing::debug!("Connection failed: {}", source);
        ClientError::ConnectionFailure {
            address: address.clone(),
            source,
        }
    })
}

async fn run_reader(
    reader: OwnedReadHalf,
    dispatcher: Arc<FrameDispatcher>,
    owner: Weak<Shared>,
    buffer_size: usize,
) {
    if let Err(e) = read_loop(reader, &dispatcher, buffer_size).await {
        match e {
            ClientError::ConnectionClosed => tracing::info!("Connection closed by server"),
            e => tracing::error!("Read loop failed: {}", e),
        }
    }

    if let Some(shared) = owner.upgrade() {
        shared.close();
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    dispatcher: &FrameDispatcher,
    buffer_size: usize,
) -> Result<(), ClientError> {
    let mut decoder = Decoder::with_capacity(buffer_size);
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        decoder.extend(&buf[..n]);

        loop {
            match decoder.decode_frame() {
                Ok(Some(frame)) => {
                    let outcome = dispatcher.dispatch(frame);
                    tracing::trace!("Dispatched frame: {:?}", outcome);
                }
                Ok(None) => break,
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("{}", ClientError::UnexpectedFrame(e.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
