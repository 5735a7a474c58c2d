//! Dedicated writer task owning the socket's write half.
//!
//! ```text
//! send_and_wait ─┐
//! send / NOP    ─┼─► mpsc::UnboundedSender<Outbound> ─► Writer Task ─► socket
//! Message FIN   ─┘
//! ```
//!
//! Enqueueing never blocks. Writes are flushed one by one, in order, and a
//! caller that needs to know when its bytes left the process asks for a
//! completion.
//!
//! The queue is unbounded but its depth is bounded by the protocol: at most
//! one `send_and_wait` write is queued at a time (the request slot), one NOP
//! per heartbeat, and one FIN/REQ/TOUCH per message the server has in flight
//! (the RDY count). Closing the connection aborts the task, dropping the
//! write half and anything still queued.

use crate::error::ClientError;
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

struct Outbound {
    bytes: Bytes,
    done: Option<oneshot::Sender<io::Result<()>>>,
}

/// Handle for sending bytes to the writer task.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WriterHandle {
    /// Queues bytes for writing without waiting.
    pub(crate) fn send(&self, bytes: Bytes) -> Result<(), ClientError> {
        self.tx
            .send(Outbound { bytes, done: None })
            .map_err(|_| ClientError::NotConnected)
    }

    /// Queues bytes and returns a receiver completed once they are flushed.
    pub(crate) fn send_with_completion(
        &self,
        bytes: Bytes,
    ) -> Result<oneshot::Receiver<io::Result<()>>, ClientError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Outbound {
                bytes,
                done: Some(done),
            })
            .map_err(|_| ClientError::NotConnected)?;
        Ok(rx)
    }
}

/// Spawns the writer task on `runtime`.
///
/// The task flushes the queue and shuts the write half down once every
/// handle is dropped. Aborting the returned `JoinHandle` drops the write half
/// immediately.
pub(crate) fn spawn_writer_task<W>(runtime: &Handle, writer: W) -> (WriterHandle, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = runtime.spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(mut rx: mpsc::UnboundedReceiver<Outbound>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(Outbound { bytes, done }) = rx.recv().await {
        let result = write_and_flush(&mut writer, &bytes).await;
        let failed = result.is_err();
        match done {
            Some(done) => {
                let _ = done.send(result);
            }
            None => {
                if let Err(e) = result {
                    tracing::warn!("Write failed: {}", e);
                }
            }
        }

        if failed {
            break;
        }
    }

    tracing::debug!("Writer task shutting down");
    let _ = writer.shutdown().await;
}

async fn write_and_flush<W>(writer: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}
