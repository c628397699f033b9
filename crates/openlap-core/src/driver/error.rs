//! Driver errors

use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Errors establishing a connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection timed out after {0} ms")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Transport unavailable")]
    NoTransport,
}

/// Errors sending a command to the Control Unit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Not connected")]
    NotConnected,

    #[error("Invalid command: {0}")]
    Invalid(#[from] ProtocolError),

    #[error("Write failed: {0}")]
    Write(TransportError),
}
