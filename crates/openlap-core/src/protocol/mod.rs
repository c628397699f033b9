//! Control Unit Protocol
//!
//! Implements the Carrera Digital Control Unit wire protocol.
//!
//! Every message is a short ASCII frame terminated by a `$` sentinel. Numeric
//! fields are sent as nibbles (`0x30 | value`), most frames carry a 4-bit
//! checksum. Requests from the host are quoted with a leading `"`.

pub mod codec;
pub mod commands;
mod error;
pub mod frame;
mod packet;

pub use codec::FrameCodec;
pub use commands::{Button, Command};
pub use error::ProtocolError;
pub use frame::{normalize_notification, Frame, Status, TimerTick};
pub use packet::{checksum, FrameBuilder, FrameReader};

/// Frame terminator for both directions
pub const SENTINEL: u8 = b'$';

/// Leading quote of every host request on byte-stream transports
pub const REQUEST_PREFIX: u8 = b'"';

/// Fixed baud rate of the Control Unit serial interface
pub const SERIAL_BAUD_RATE: u32 = 19200;

/// GATT service exposed by the Control Unit BLE adapter
pub const SERVICE_UUID: &str = "39df7777-b1b4-b90b-57f1-7144ae4e4a6a";

/// Characteristic for host requests (write without response)
pub const OUTPUT_UUID: &str = "39df8888-b1b4-b90b-57f1-7144ae4e4a6a";

/// Characteristic delivering Control Unit responses
pub const NOTIFY_UUID: &str = "39df9999-b1b4-b90b-57f1-7144ae4e4a6a";

/// Number of controller addresses on the track
pub const NUM_CARS: usize = 8;

/// Maximum length of a single frame before the decoder gives up on it
pub const MAX_FRAME_SIZE: usize = 64;

/// First firmware version that reports key-lock state
pub const KEY_LOCK_VERSION: &str = "5331";

/// Whether the given firmware version supports the key-lock display.
///
/// Versions are zero-padded fixed-width strings, so a lexical comparison
/// orders them correctly.
pub fn supports_key_lock(version: &str) -> bool {
    version >= KEY_LOCK_VERSION
}

/// Pit-lane status derived from the track mode nibble.
///
/// Unverified against official protocol documentation: the mask may actually
/// describe fuel mode rather than an installed pit lane.
pub fn pitlane(mode: u8) -> bool {
    (mode & 0x03) != 0
}

/// Number of start lights lit for a start-light code
pub fn lights(start: u8) -> u8 {
    match start {
        1 => 5,
        2..=6 => start - 1,
        _ => 0,
    }
}

/// Start-light code reported after a false start
pub fn is_false_start(start: u8) -> bool {
    start == 9
}
