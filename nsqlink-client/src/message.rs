//! Messages delivered to the application.

use crate::connection::Connection;
use crate::error::ClientError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use nsqlink_protocol::{Command, MessageId};
use std::fmt;
use std::time::Duration;

/// A message pushed by nsqd, bound to the connection it arrived on.
#[derive(Clone)]
pub struct Message {
    id: MessageId,
    body: Bytes,
    timestamp_nanos: i64,
    attempts: u16,
    connection: Connection,
}

impl Message {
    pub(crate) fn new(
        id: MessageId,
        body: Bytes,
        timestamp_nanos: i64,
        attempts: u16,
        connection: Connection,
    ) -> Self {
        Self {
            id,
            body,
            timestamp_nanos,
            attempts,
            connection,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Publish time in nanoseconds since the Unix epoch.
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp_nanos
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.timestamp_nanos)
    }

    /// Number of delivery attempts, including this one.
    pub fn attempts(&self) -> u16 {
        self.attempts
    }

    /// The connection this message must be acknowledged on.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Sends FIN for this message.
    pub fn finish(&self) -> Result<(), ClientError> {
        self.connection.send(Command::finish(&self.id))
    }

    /// Sends REQ for this message with the given delay.
    pub fn requeue(&self, delay: Duration) -> Result<(), ClientError> {
        self.connection.send(Command::requeue(&self.id, delay))
    }

    /// Sends TOUCH for this message.
    pub fn touch(&self) -> Result<(), ClientError> {
        self.connection.send(Command::touch(&self.id))
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("body_len", &self.body.len())
            .field("timestamp_nanos", &self.timestamp_nanos)
            .field("attempts", &self.attempts)
            .field("server", self.connection.server_address())
            .finish()
    }
}
