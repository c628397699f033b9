//! # OpenLap Core Library
//!
//! Core functionality for driving a Carrera Digital Control Unit and timing
//! races on it.
//!
//! This library provides:
//! - The Control Unit wire protocol (frames, commands, nibble encoding)
//! - Serial, Bluetooth LE and simulated transports
//! - A connection-managing driver with automatic polling and reconnect
//! - A race session engine: lap reconstruction, rankings, flags and finish
//!
//! ## Example
//!
//! ```rust,ignore
//! use openlap_core::prelude::*;
//!
//! let cu = ControlUnit::new(Box::new(DemoTransport::new(4)), ConnectionConfig::default());
//! cu.connect().await?;
//!
//! let session = SessionRunner::new(cu.clone(), RaceOptions::new(SessionType::Race)).spawn();
//! let mut snapshots = session.snapshots();
//! while snapshots.changed().await.is_ok() {
//!     println!("{:?}", snapshots.borrow().ranking);
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod driver;
pub mod peripheral;
pub mod protocol;
pub mod session;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConnectionConfig, RaceOptions, SessionType};
    pub use crate::driver::{ConnectionError, ConnectionState, ControlUnit, ControlUnitService};
    pub use crate::peripheral::{Peripheral, PeripheralKind};
    pub use crate::protocol::{Button, Command, Frame, Status, TimerTick};
    pub use crate::session::{
        Entry, RaceEvent, RaceEventKind, Session, SessionHandle, SessionRunner, SessionSnapshot,
        TrackControl,
    };
    pub use crate::transport::{
        demo::DemoTransport, scan::scan_all, LinkEvent, Transport, TransportError,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
