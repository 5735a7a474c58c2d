//! Application callbacks attached to a connection.

use crate::error::ServerError;
use crate::message::Message;

/// Receives messages pushed by the server.
///
/// Called on the blocking pool, never on the connection's read path, one
/// message at a time in arrival order.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle_message(&self, message: Message);
}

impl<F> MessageHandler for F
where
    F: Fn(Message) + Send + Sync + 'static,
{
    fn handle_message(&self, message: Message) {
        self(message)
    }
}

/// Receives errors reported by the server in `Error` frames.
///
/// Called inline on the read path, so it should return quickly. A panic is
/// caught and logged.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle_error(&self, error: ServerError);
}

impl<F> ErrorHandler for F
where
    F: Fn(ServerError) + Send + Sync + 'static,
{
    fn handle_error(&self, error: ServerError) {
        self(error)
    }
}
