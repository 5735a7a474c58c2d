//! # nsqlink-client
//!
//! Client engine for a single nsqd TCP connection.
//!
//! This crate provides:
//! - Connection setup with the V2 magic and IDENTIFY handshake
//! - One-outstanding-command correlation over an asynchronous read path
//! - Heartbeat answering and liveness tracking
//! - Routing of pushed messages and server errors to application handlers

pub mod address;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod message;
mod writer;

pub use address::ServerAddress;
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use correlation::Stage;
pub use error::{ClientError, ServerError};
pub use handler::{ErrorHandler, MessageHandler};
pub use message::Message;
pub use nsqlink_protocol::{Command, Compression, Frame, MessageId};
