//! Frame decoding
//!
//! Classifies a received frame (without its `$` sentinel) into one of the
//! messages the Control Unit sends.

use serde::{Deserialize, Serialize};

use super::{FrameReader, ProtocolError, NUM_CARS, SENTINEL};

/// Length of a version response including the leading '0'
const VERSION_FRAME_LEN: usize = 6;

/// Minimum length of a status line
const STATUS_FRAME_LEN: usize = 16;

/// Length of a timer event
const TIMER_FRAME_LEN: usize = 12;

/// One sensor crossing reported by the Control Unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerTick {
    /// Car index (0..=7)
    pub car: u8,
    /// Raw device clock in milliseconds
    pub time: u32,
    /// Sensor index, 0 is the finish line
    pub sensor: u8,
}

/// Periodic status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Fuel level per car (0..=15)
    pub fuel: [u8; NUM_CARS],
    /// Start light code
    pub start: u8,
    /// Track mode bitmask
    pub mode: u8,
    /// One bit per car in the pit lane
    pub pit: u8,
    /// Position tower display mode
    pub display: u8,
}

/// A decoded Control Unit message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Status line ('?:')
    Status(Status),
    /// Timer event ('?' + address)
    Timer(TimerTick),
    /// Firmware version ('0')
    Version(String),
    /// Echo of a command the unit accepted
    Ack(u8),
}

impl Frame {
    /// Decode a frame without its trailing sentinel
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        match data {
            [] => Err(ProtocolError::Empty),
            [b'?', b':', ..] => decode_status(data),
            [b'?', ..] => decode_timer(data),
            [b'0', ..] => decode_version(data),
            [cmd, ..] if is_ack(*cmd) => Ok(Frame::Ack(*cmd)),
            [other, ..] => Err(ProtocolError::Unrecognized(*other)),
        }
    }

    /// Short name used in log output
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Status(_) => "status",
            Frame::Timer(_) => "timer",
            Frame::Version(_) => "version",
            Frame::Ack(_) => "ack",
        }
    }
}

fn is_ack(cmd: u8) -> bool {
    matches!(cmd, b'=' | b'J' | b'T' | b':')
}

fn ensure_len(data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() < expected {
        return Err(ProtocolError::Truncated {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn decode_status(data: &[u8]) -> Result<Frame, ProtocolError> {
    ensure_len(data, STATUS_FRAME_LEN)?;
    let mut reader = FrameReader::new(data);
    reader.skip(2)?;
    let mut fuel = [0u8; NUM_CARS];
    for level in fuel.iter_mut() {
        *level = reader.nibble()?;
    }
    let start = reader.nibble()?;
    let mode = reader.nibble()?;
    let pit = reader.byte()?;
    let display = reader.nibble()?;
    // newer firmware appends extra bytes before the checksum
    let extra = data.len() - STATUS_FRAME_LEN;
    reader.skip(extra)?;
    reader.checksum()?;
    Ok(Frame::Status(Status {
        fuel,
        start,
        mode,
        pit,
        display,
    }))
}

fn decode_timer(data: &[u8]) -> Result<Frame, ProtocolError> {
    ensure_len(data, TIMER_FRAME_LEN)?;
    let mut reader = FrameReader::new(data);
    reader.skip(1)?;
    let address = reader.nibble()?;
    let time = reader.u32()?;
    let sector = reader.nibble()?;
    reader.checksum()?;
    if address == 0 || usize::from(address) > NUM_CARS {
        return Err(ProtocolError::InvalidAddress(address));
    }
    if sector == 0 {
        return Err(ProtocolError::InvalidSector(sector));
    }
    Ok(Frame::Timer(TimerTick {
        car: address - 1,
        time,
        sensor: sector - 1,
    }))
}

fn decode_version(data: &[u8]) -> Result<Frame, ProtocolError> {
    ensure_len(data, VERSION_FRAME_LEN)?;
    let mut reader = FrameReader::new(data);
    reader.skip(1)?;
    let version = reader.take(4)?;
    reader.checksum()?;
    Ok(Frame::Version(String::from_utf8_lossy(version).into_owned()))
}

/// Fix up a GATT notification.
///
/// Some transports strip the leading byte of a response and keep the
/// trailing sentinel. Such frames are shifted right by one byte and get a
/// placeholder: `'0'` for a full-length version reply, `'?'` otherwise.
/// Frames not ending in the sentinel are returned unchanged.
pub fn normalize_notification(data: &[u8]) -> Vec<u8> {
    match data.split_last() {
        Some((&SENTINEL, body)) => {
            let lead = if data.len() == VERSION_FRAME_LEN {
                b'0'
            } else {
                b'?'
            };
            let mut fixed = Vec::with_capacity(data.len());
            fixed.push(lead);
            fixed.extend_from_slice(body);
            fixed
        }
        _ => data.to_vec(),
    }
}
