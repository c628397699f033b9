//! Protocol errors

use thiserror::Error;

/// Errors raised while decoding or encoding Control Unit frames.
///
/// A frame that fails to decode is dropped; these errors never reach the
/// session engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,

    #[error("Truncated frame: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Invalid nibble {0:#04x}")]
    InvalidNibble(u8),

    #[error("Invalid car address {0}")]
    InvalidAddress(u8),

    #[error("Invalid sector {0}")]
    InvalidSector(u8),

    #[error("Unrecognized frame starting with {0:#04x}")]
    Unrecognized(u8),

    #[error("Frame exceeds {0} bytes")]
    FrameTooLong(usize),

    #[error("{what} out of range: {value}")]
    ValueOutOfRange { what: &'static str, value: u32 },

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Io(err.to_string())
    }
}
