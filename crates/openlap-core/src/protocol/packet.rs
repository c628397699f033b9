//! Nibble packing
//!
//! The Control Unit transmits all numbers as ASCII nibbles:
//! - 1 nibble: `0x30 | value` (4 bits)
//! - byte: two nibbles, low nibble first
//! - 32-bit: four bytes in big-endian order, each byte low nibble first
//! - checksum: `0x30 | (sum & 0x0f)` over every byte after the leading
//!   command character

use super::ProtocolError;

/// Order in which the nibbles of a 32-bit value are transmitted
const U32_SHIFTS: [u32; 8] = [24, 28, 16, 20, 8, 12, 0, 4];

/// Calculate the 4-bit checksum of a frame body
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) & 0x0f
}

/// Builder for constructing request payloads
#[derive(Debug, Default)]
pub struct FrameBuilder {
    payload: Vec<u8>,
}

impl FrameBuilder {
    /// Create a new frame builder
    pub fn new() -> Self {
        Self {
            payload: Vec::new(),
        }
    }

    /// Add a command character
    pub fn command(mut self, cmd: u8) -> Self {
        self.payload.push(cmd);
        self
    }

    /// Add a 4-bit value
    pub fn nibble(mut self, value: u8) -> Self {
        self.payload.push(0x30 | (value & 0x0f));
        self
    }

    /// Add an 8-bit value, low nibble first
    pub fn byte(self, value: u8) -> Self {
        self.nibble(value & 0x0f).nibble(value >> 4)
    }

    /// Add a 32-bit value
    pub fn u32(mut self, value: u32) -> Self {
        for shift in U32_SHIFTS {
            // Truncation to the low nibble is the point of the shift
            self = self.nibble(((value >> shift) & 0x0f) as u8);
        }
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    /// Append the checksum of everything after the command character
    pub fn checksum(mut self) -> Self {
        let sum = checksum(self.payload.get(1..).unwrap_or_default());
        self.payload.push(0x30 | sum);
        self
    }

    /// Build the payload
    pub fn build(self) -> Vec<u8> {
        self.payload
    }
}

/// Sequential reader over a received frame
#[derive(Debug)]
pub struct FrameReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Skip `n` bytes without interpreting them
    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.take(n).map(|_| ())
    }

    /// Read `n` raw bytes
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos + n;
        let slice = self.data.get(self.pos..end).ok_or(ProtocolError::Truncated {
            expected: end,
            actual: self.data.len(),
        })?;
        self.pos = end;
        Ok(slice)
    }

    /// Read a 4-bit value
    pub fn nibble(&mut self) -> Result<u8, ProtocolError> {
        let raw = self.take(1)?.first().copied().unwrap_or_default();
        if raw & 0xf0 != 0x30 {
            return Err(ProtocolError::InvalidNibble(raw));
        }
        Ok(raw & 0x0f)
    }

    /// Read an 8-bit value, low nibble first
    pub fn byte(&mut self) -> Result<u8, ProtocolError> {
        let lo = self.nibble()?;
        let hi = self.nibble()?;
        Ok(lo | (hi << 4))
    }

    /// Read a 32-bit value
    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        let mut value = 0u32;
        for shift in U32_SHIFTS {
            value |= u32::from(self.nibble()?) << shift;
        }
        Ok(value)
    }

    /// Verify the checksum byte at the current position against everything
    /// read so far after the leading character
    pub fn checksum(&mut self) -> Result<(), ProtocolError> {
        let expected = checksum(self.data.get(1..self.pos).unwrap_or_default());
        let actual = self.nibble()?;
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }
        Ok(())
    }
}
