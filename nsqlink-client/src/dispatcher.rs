//! Routing of inbound frames.
//!
//! `dispatch` runs on the connection's read path and never waits: heartbeats
//! are answered by queueing a NOP, responses and errors are offered to the
//! correlator, and messages are queued for the message worker, which calls the
//! application handler on the blocking pool.
//!
//! The message queue is unbounded because the read path must not wait on a
//! slow handler. Its depth is bounded by the RDY count: nsqd never has more
//! unacknowledged messages in flight to this client than the last `RDY`
//! allowed, so the queue holds at most that many.

use crate::connection::{Connection, Shared};
use crate::correlation::{Correlator, Resolution};
use crate::error::{ClientError, ServerError};
use crate::handler::{ErrorHandler, MessageHandler};
use crate::heartbeat::HeartbeatMonitor;
use crate::message::Message;
use crate::writer::WriterHandle;
use nsqlink_protocol::{Command, Frame};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Where a dispatched frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Heartbeat answered and recorded.
    Heartbeat,
    /// Handed to the outstanding command.
    Resolved,
    /// Response or error with no command waiting; logged and dropped.
    Unmatched,
    /// Queued for the message handler.
    Delivered,
    /// Message dropped because no handler is attached.
    Dropped,
}

/// Classifies inbound frames and routes them.
pub struct FrameDispatcher {
    correlator: Arc<Correlator>,
    heartbeat: Arc<HeartbeatMonitor>,
    writer: WriterHandle,
    error_handler: OnceLock<Arc<dyn ErrorHandler>>,
    messages: OnceLock<mpsc::UnboundedSender<Message>>,
    owner: Weak<Shared>,
}

impl FrameDispatcher {
    pub(crate) fn new(
        correlator: Arc<Correlator>,
        heartbeat: Arc<HeartbeatMonitor>,
        writer: WriterHandle,
        owner: Weak<Shared>,
    ) -> Self {
        Self {
            correlator,
            heartbeat,
            writer,
            error_handler: OnceLock::new(),
            messages: OnceLock::new(),
            owner,
        }
    }

    pub(crate) fn attach_error_handler(
        &self,
        handler: Arc<dyn ErrorHandler>,
    ) -> Result<(), ClientError> {
        self.error_handler
            .set(handler)
            .map_err(|_| ClientError::AlreadyAttached("error"))
    }

    pub(crate) fn attach_message_sender(
        &self,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Result<(), ClientError> {
        self.messages
            .set(tx)
            .map_err(|_| ClientError::AlreadyAttached("message"))
    }

    /// Routes one frame. Never blocks.
    pub fn dispatch(&self, frame: Frame) -> Dispatch {
        if frame.is_heartbeat() {
            self.on_heartbeat();
            return Dispatch::Heartbeat;
        }

        match frame {
            response @ Frame::Response { .. } => self.resolve(response),
            Frame::Error { code, message } => {
                self.notify_error(ServerError::new(code.clone(), message.clone()));
                self.resolve(Frame::Error { code, message })
            }
            Frame::Message {
                id,
                body,
                timestamp_nanos,
                attempts,
            } => {
                let Some(tx) = self.messages.get() else {
                    tracing::warn!("Message {} arrived with no message handler, dropping", id);
                    return Dispatch::Dropped;
                };
                let Some(shared) = self.owner.upgrade() else {
                    tracing::debug!("Message {} arrived after connection was dropped", id);
                    return Dispatch::Dropped;
                };

                let message = Message::new(
                    id,
                    body,
                    timestamp_nanos,
                    attempts,
                    Connection::from_shared(shared),
                );
                match tx.send(message) {
                    Ok(()) => Dispatch::Delivered,
                    Err(_) => {
                        tracing::warn!("Message worker stopped, dropping message {}", id);
                        Dispatch::Dropped
                    }
                }
            }
        }
    }

    fn on_heartbeat(&self) {
        tracing::trace!("Heartbeat received");
        match Command::nop().encode() {
            Ok(bytes) => {
                if let Err(e) = self.writer.send(bytes.freeze()) {
                    tracing::warn!("Could not answer heartbeat: {}", e);
                }
            }
            Err(e) => tracing::warn!("Could not encode NOP: {}", e),
        }
        self.heartbeat.record();
    }

    fn resolve(&self, frame: Frame) -> Dispatch {
        match self.correlator.resolve(frame) {
            Resolution::Delivered => Dispatch::Resolved,
            Resolution::Unmatched(frame) => {
                tracing::warn!(
                    "{}",
                    ClientError::UnexpectedFrame(format!("{:?} with no outstanding command", frame))
                );
                Dispatch::Unmatched
            }
            Resolution::Abandoned(frame) => {
                tracing::warn!("{:?} arrived after its caller stopped waiting", frame);
                Dispatch::Unmatched
            }
        }
    }

    fn notify_error(&self, error: ServerError) {
        tracing::warn!("Server error: {}", error);
        if let Some(handler) = self.error_handler.get() {
            if catch_unwind(AssertUnwindSafe(|| handler.handle_error(error))).is_err() {
                tracing::error!("Error handler panicked");
            }
        }
    }
}

/// Spawns the task that feeds messages to `handler` in arrival order.
pub(crate) fn spawn_message_worker(
    runtime: &Handle,
    handler: Arc<dyn MessageHandler>,
) -> mpsc::UnboundedSender<Message> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let blocking = runtime.clone();
    runtime.spawn(async move {
        while let Some(message) = rx.recv().await {
            let handler = handler.clone();
            if let Err(e) = blocking
                .spawn_blocking(move || handler.handle_message(message))
                .await
            {
                tracing::error!("Message handler failed: {}", e);
            }
        }
        tracing::debug!("Message worker stopped");
    });
    tx
}
