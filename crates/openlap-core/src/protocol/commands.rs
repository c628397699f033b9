//! Protocol commands
//!
//! Defines the requests the host can send to the Control Unit.

use serde::{Deserialize, Serialize};

use super::{FrameBuilder, ProtocolError, NUM_CARS, REQUEST_PREFIX, SENTINEL};

/// Physical buttons on the Control Unit that can be triggered remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Button {
    /// Pace car / ESC button
    PaceCar,
    /// Start / Enter button
    Start,
}

impl Button {
    /// Button id as understood by the trigger command
    pub fn id(&self) -> u8 {
        match self {
            Button::PaceCar => 1,
            Button::Start => 2,
        }
    }
}

/// Command words of the `J` (set word) request
mod word {
    pub const SPEED: u8 = 0;
    pub const BRAKE: u8 = 1;
    pub const FUEL: u8 = 2;
    pub const POSITION: u8 = 6;
    pub const LAP_HI: u8 = 17;
    pub const LAP_LO: u8 = 18;
}

/// Position tower value that clears a position / marks a car finished
const POSITION_CLEAR: u8 = 9;

/// Controller address used for lap counter words
const LAP_ADDRESS: u8 = 7;

/// Requests understood by the Control Unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Request the next timer event or the status line ('?')
    Poll,

    /// Query the firmware version ('0')
    Version,

    /// Reset the lap timer ('=')
    Reset,

    /// Simulate a button press ('T')
    Trigger(Button),

    /// Disable cars at the track, one bit per car (':')
    SetMask(u8),

    /// Set a controller word ('J')
    SetWord {
        word: u8,
        address: u8,
        value: u8,
        repeat: u8,
    },
}

impl Command {
    /// Set the speed level (0..=15) of a car
    pub fn speed(car: u8, level: u8) -> Result<Self, ProtocolError> {
        Self::set_word(word::SPEED, car, level, 2)
    }

    /// Set the brake level (0..=15) of a car
    pub fn brake(car: u8, level: u8) -> Result<Self, ProtocolError> {
        Self::set_word(word::BRAKE, car, level, 2)
    }

    /// Set the fuel tank level (0..=15) of a car
    pub fn fuel(car: u8, level: u8) -> Result<Self, ProtocolError> {
        Self::set_word(word::FUEL, car, level, 2)
    }

    /// Clear the position tower display
    pub fn clear_position() -> Self {
        Command::SetWord {
            word: word::POSITION,
            address: 0,
            value: POSITION_CLEAR,
            repeat: 1,
        }
    }

    /// Mark a car as finished on the position tower
    pub fn finished(car: u8) -> Result<Self, ProtocolError> {
        Self::set_word(word::POSITION, car, POSITION_CLEAR, 1)
    }

    /// Set the lap displayed by the position tower.
    ///
    /// The lap is transmitted in two words, high nibble first.
    pub fn lap(lap: u32) -> Result<[Self; 2], ProtocolError> {
        let lap = u8::try_from(lap).map_err(|_| ProtocolError::ValueOutOfRange {
            what: "lap",
            value: lap,
        })?;
        Ok([
            Self::set_word(word::LAP_HI, LAP_ADDRESS, lap >> 4, 1)?,
            Self::set_word(word::LAP_LO, LAP_ADDRESS, lap & 0x0f, 1)?,
        ])
    }

    /// Build a checked set-word request
    pub fn set_word(word: u8, address: u8, value: u8, repeat: u8) -> Result<Self, ProtocolError> {
        if word > 31 {
            return Err(ProtocolError::ValueOutOfRange {
                what: "command word",
                value: word.into(),
            });
        }
        if usize::from(address) >= NUM_CARS {
            return Err(ProtocolError::ValueOutOfRange {
                what: "address",
                value: address.into(),
            });
        }
        if value > 15 {
            return Err(ProtocolError::ValueOutOfRange {
                what: "value",
                value: value.into(),
            });
        }
        if !(1..=15).contains(&repeat) {
            return Err(ProtocolError::ValueOutOfRange {
                what: "repeat count",
                value: repeat.into(),
            });
        }
        Ok(Command::SetWord {
            word,
            address,
            value,
            repeat,
        })
    }

    /// Leading command character
    pub fn command_byte(&self) -> u8 {
        match self {
            Command::Poll => b'?',
            Command::Version => b'0',
            Command::Reset => b'=',
            Command::Trigger(_) => b'T',
            Command::SetMask(_) => b':',
            Command::SetWord { .. } => b'J',
        }
    }

    /// Whether the unit is expected to answer with an acknowledgement
    /// rather than a data frame
    pub fn expects_ack(&self) -> bool {
        !matches!(self, Command::Poll | Command::Version)
    }

    /// Encode the request body without quoting or sentinel.
    ///
    /// GATT transports write this directly to the output characteristic.
    pub fn payload(&self) -> Vec<u8> {
        let builder = FrameBuilder::new().command(self.command_byte());
        match *self {
            Command::Poll | Command::Version => builder.build(),
            Command::Reset => builder.bytes(b"10").build(),
            Command::Trigger(button) => builder.nibble(button.id()).build(),
            Command::SetMask(mask) => builder.byte(mask).checksum().build(),
            Command::SetWord {
                word,
                address,
                value,
                repeat,
            } => builder
                .byte(word | (address << 5))
                .nibble(value)
                .nibble(repeat)
                .checksum()
                .build(),
        }
    }

    /// Encode the request as sent over a byte stream: `"` + payload + `$`
    pub fn to_bytes(&self) -> Vec<u8> {
        quote(&self.payload())
    }
}

/// Wrap a request payload for transmission over a byte-stream transport
pub fn quote(payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + 2);
    bytes.push(REQUEST_PREFIX);
    bytes.extend_from_slice(payload);
    bytes.push(SENTINEL);
    bytes
}
