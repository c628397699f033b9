//! Transport errors

use thiserror::Error;

/// Errors raised by a physical link.
///
/// All of them are terminal for the current connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Radio unavailable: {0}")]
    Unavailable(String),

    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Link lost: {0}")]
    LinkLost(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Link not open")]
    NotOpen,

    #[error("Link already open")]
    AlreadyOpen,

    #[error("No backend for peripheral type {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => TransportError::PermissionDenied(err.to_string()),
            std::io::ErrorKind::NotFound => TransportError::PortNotFound(err.to_string()),
            _ => TransportError::Io(err.to_string()),
        }
    }
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(err.to_string()),
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(err.to_string())
            }
            _ => TransportError::Serial(err.to_string()),
        }
    }
}
