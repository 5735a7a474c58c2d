//! Command/response correlation.
//!
//! nsqd answers control commands in order and without request ids, so a
//! connection may only have one command awaiting a response. The request slot
//! is a single-permit semaphore; holding the permit is what "outstanding"
//! means. The read path resolves the outstanding command by handing the frame
//! to a oneshot stored next to it.
//!
//! ```text
//! caller                       Correlator                      read path
//!   |-- begin(cmd) ---------->  acquire permit (bounded)
//!   |                           install responder
//!   |-- write + flush (connection)
//!   |-- wait() -------------->  await oneshot (bounded)  <---- resolve(frame)
//!   |<- frame ----------------  vacate slot, drop permit
//! ```

use crate::error::ClientError;
use nsqlink_protocol::{Command, Frame};
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore, SemaphorePermit};

/// The bounded stage of a command exchange that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for another command to leave the request slot.
    Slot,
    /// Waiting for the command bytes to be written and flushed.
    Write,
    /// Waiting for the server's response.
    Response,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Slot => write!(f, "request slot"),
            Stage::Write => write!(f, "write completion"),
            Stage::Response => write!(f, "response"),
        }
    }
}

/// What happened to a frame offered to the correlator.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Handed to the waiting caller.
    Delivered,
    /// No command was waiting for it.
    Unmatched(Frame),
    /// A command was outstanding but its caller stopped waiting.
    Abandoned(Frame),
}

struct Outstanding {
    command: String,
    responder: Option<oneshot::Sender<Frame>>,
}

/// Single-slot correlation between callers and the read path.
pub struct Correlator {
    slot: Semaphore,
    outstanding: Mutex<Option<Outstanding>>,
    timeout: Duration,
}

impl Correlator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slot: Semaphore::new(1),
            outstanding: Mutex::new(None),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns whether a command currently occupies the request slot.
    pub fn is_request_in_progress(&self) -> bool {
        self.outstanding.lock().is_some()
    }

    /// Occupies the request slot for `command`.
    ///
    /// Fails with `CommandTimeout` if another command holds the slot for
    /// longer than the bound, or `ConnectionClosed` after `cancel`.
    pub async fn begin(&self, command: &Command) -> Result<Exchange<'_>, ClientError> {
        let permit = match tokio::time::timeout(self.timeout, self.slot.acquire()).await {
            Err(_) => {
                tracing::warn!("Request slot still busy, giving up on {}", command.verb());
                return Err(ClientError::CommandTimeout {
                    command: command.verb().to_string(),
                    stage: Stage::Slot,
                });
            }
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Ok(Ok(permit)) => permit,
        };

        let (tx, rx) = oneshot::channel();
        let stale = self.outstanding.lock().replace(Outstanding {
            command: command.verb().to_string(),
            responder: Some(tx),
        });
        if let Some(stale) = stale {
            tracing::warn!(
                "Unexpectedly occupied request slot, discarding stale {}",
                stale.command
            );
        }

        Ok(Exchange {
            correlator: self,
            command: command.verb().to_string(),
            response: Some(rx),
            vacated: false,
            _permit: permit,
        })
    }

    /// Offers a response or error frame to the outstanding command.
    ///
    /// Never blocks.
    pub fn resolve(&self, frame: Frame) -> Resolution {
        let responder = self
            .outstanding
            .lock()
            .as_mut()
            .and_then(|outstanding| outstanding.responder.take());

        match responder {
            None => Resolution::Unmatched(frame),
            Some(tx) => match tx.send(frame) {
                Ok(()) => Resolution::Delivered,
                Err(frame) => Resolution::Abandoned(frame),
            },
        }
    }

    /// Releases every waiter: the slot is closed and the outstanding
    /// responder dropped.
    pub fn cancel(&self) {
        self.slot.close();
        if let Some(outstanding) = self.outstanding.lock().take() {
            tracing::debug!("Cancelling outstanding {}", outstanding.command);
        }
    }

    fn vacate(&self, command: &str, expect_occupied: bool) {
        let previous = self.outstanding.lock().take();
        if previous.is_none() && expect_occupied {
            tracing::warn!("Unexpectedly empty request slot after {}", command);
        }
    }
}

/// One command's tenure of the request slot.
///
/// Dropping it without calling `wait` (or abandoning `wait` midway) vacates
/// the slot so the next command is unaffected.
pub struct Exchange<'a> {
    correlator: &'a Correlator,
    command: String,
    response: Option<oneshot::Receiver<Frame>>,
    vacated: bool,
    _permit: SemaphorePermit<'a>,
}

impl Exchange<'_> {
    /// Waits for the read path to resolve this command.
    pub async fn wait(mut self) -> Result<Frame, ClientError> {
        let response = self
            .response
            .take()
            .ok_or_else(|| ClientError::InterruptedWait(self.command.clone()))?;

        match tokio::time::timeout(self.correlator.timeout, response).await {
            Err(_) => {
                tracing::warn!(
                    "No response to {} within {:?}",
                    self.command,
                    self.correlator.timeout
                );
                Err(ClientError::CommandTimeout {
                    command: self.command.clone(),
                    stage: Stage::Response,
                })
            }
            // Responder dropped by cancel()
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Ok(Ok(frame)) => {
                self.correlator.vacate(&self.command, true);
                self.vacated = true;
                Ok(frame)
            }
        }
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        if !self.vacated {
            self.correlator.vacate(&self.command, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn command(verb: &str) -> Command {
        Command::new(verb)
    }

    #[tokio::test]
    async fn test_resolve_delivers_to_waiter() {
        let correlator = Correlator::new(Duration::from_secs(15));
        let exchange = correlator.begin(&command("SUB")).await.unwrap();
        assert!(correlator.is_request_in_progress());

        assert_eq!(
            correlator.resolve(Frame::response("OK")),
            Resolution::Delivered
        );
        assert_eq!(exchange.wait().await.unwrap(), Frame::response("OK"));
        assert!(!correlator.is_request_in_progress());
    }

    #[tokio::test]
    async fn test_error_frame_resolves_wait() {
        let correlator = Correlator::new(Duration::from_secs(15));
        let exchange = correlator.begin(&command("SUB")).await.unwrap();

        let error = Frame::error("E_BAD_TOPIC", "bad");
        assert_eq!(correlator.resolve(error.clone()), Resolution::Delivered);
        assert_eq!(exchange.wait().await.unwrap(), error);
    }

    #[tokio::test]
    async fn test_unmatched_when_idle() {
        let correlator = Correlator::new(Duration::from_secs(15));
        assert_eq!(
            correlator.resolve(Frame::response("OK")),
            Resolution::Unmatched(Frame::response("OK"))
        );

        // A stray frame does not leak into the next exchange
        let exchange = correlator.begin(&command("SUB")).await.unwrap();
        correlator.resolve(Frame::response("SUBSCRIBED"));
        assert_eq!(exchange.wait().await.unwrap(), Frame::response("SUBSCRIBED"));
    }

    #[tokio::test]
    async fn test_second_frame_for_same_command_is_unmatched() {
        let correlator = Correlator::new(Duration::from_secs(15));
        let exchange = correlator.begin(&command("SUB")).await.unwrap();

        assert_eq!(
            correlator.resolve(Frame::response("OK")),
            Resolution::Delivered
        );
        assert_eq!(
            correlator.resolve(Frame::response("AGAIN")),
            Resolution::Unmatched(Frame::response("AGAIN"))
        );
        assert_eq!(exchange.wait().await.unwrap(), Frame::response("OK"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_slot_times_out() {
        let correlator = Correlator::new(Duration::from_secs(15));
        let _first = correlator.begin(&command("FIRST")).await.unwrap();

        let result = correlator.begin(&command("SECOND")).await;
        match result {
            Err(ClientError::CommandTimeout { command, stage }) => {
                assert_eq!(command, "SECOND");
                assert_eq!(stage, Stage::Slot);
            }
            Err(other) => panic!("expected slot timeout, got {:?}", other),
            Ok(_) => panic!("expected slot timeout, got an exchange"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_timeout_frees_slot() {
        let correlator = Correlator::new(Duration::from_secs(15));
        let exchange = correlator.begin(&command("SUB")).await.unwrap();

        let result = exchange.wait().await;
        assert!(matches!(
            result,
            Err(ClientError::CommandTimeout {
                stage: Stage::Response,
                ..
            })
        ));
        assert!(!correlator.is_request_in_progress());

        // The late response is not mistaken for the next command's
        assert!(matches!(
            correlator.resolve(Frame::response("LATE")),
            Resolution::Unmatched(_)
        ));
        let exchange = correlator.begin(&command("RDY")).await.unwrap();
        correlator.resolve(Frame::response("OK"));
        assert_eq!(exchange.wait().await.unwrap(), Frame::response("OK"));
    }

    #[tokio::test]
    async fn test_commands_are_serialized() {
        let correlator = Correlator::new(Duration::from_secs(15));
        let first = correlator.begin(&command("FIRST")).await.unwrap();

        let second = async {
            let exchange = correlator.begin(&command("SECOND")).await.unwrap();
            exchange.wait().await.unwrap()
        };

        let driver = async {
            assert_eq!(
                correlator.resolve(Frame::response("one")),
                Resolution::Delivered
            );
            let got = first.wait().await.unwrap();
            while !correlator.is_request_in_progress() {
                tokio::task::yield_now().await;
            }
            assert_eq!(
                correlator.resolve(Frame::response("two")),
                Resolution::Delivered
            );
            got
        };

        let (got_first, got_second) = tokio::join!(driver, second);
        assert_eq!(got_first, Frame::response("one"));
        assert_eq!(got_second, Frame::response("two"));
    }

    #[tokio::test]
    async fn test_cancel_releases_waiter() {
        let correlator = Arc::new(Correlator::new(Duration::from_secs(15)));
        let exchange = correlator.begin(&command("SUB")).await.unwrap();

        let (result, _) = tokio::join!(exchange.wait(), async { correlator.cancel() });
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));

        let result = correlator.begin(&command("RDY")).await;
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_dropped_exchange_vacates_slot() {
        let correlator = Correlator::new(Duration::from_millis(50));
        let exchange = correlator.begin(&command("SUB")).await.unwrap();
        drop(exchange);

        assert!(!correlator.is_request_in_progress());
        assert!(matches!(
            correlator.resolve(Frame::response("OK")),
            Resolution::Unmatched(_)
        ));
        assert!(correlator.begin(&command("RDY")).await.is_ok());
    }
}
