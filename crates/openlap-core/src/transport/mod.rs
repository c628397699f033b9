//! Transports
//!
//! A transport moves opaque request payloads to one Control Unit and delivers
//! the frames it answers with. Framing on byte streams, the GATT notification
//! fix-up and the simulated unit all live behind the same [`Transport`] trait,
//! so the driver never knows which link it talks to.

pub mod demo;
mod error;
pub mod gatt;
pub mod scan;
pub mod serial;

pub use error::TransportError;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::peripheral::Peripheral;

/// Buffered link events before a slow consumer applies back-pressure
const LINK_CHANNEL_CAPACITY: usize = 64;

/// Something that happened on an open link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The link is verified usable
    Connected,
    /// One inbound frame without its sentinel
    Frame(Bytes),
    /// The link failed; a `Disconnected` follows
    Error(TransportError),
    /// The link is gone. Sent exactly once per open/close cycle.
    Disconnected,
}

/// A physical link to a single Control Unit
#[async_trait]
pub trait Transport: Send {
    /// The device this transport talks to
    fn peripheral(&self) -> &Peripheral;

    /// Open the link and return its event stream.
    ///
    /// Failing to open is reported as an error here rather than through the
    /// stream. Once opened, the stream ends after `Disconnected`.
    async fn open(&mut self) -> Result<mpsc::Receiver<LinkEvent>, TransportError>;

    /// Write one request payload (without quoting)
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Close the link. Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Sending half of a link event stream.
///
/// Clones share the disconnected latch, so however many tasks report link
/// loss concurrently, consumers observe a single `Disconnected`. Nothing is
/// delivered after it.
#[derive(Debug, Clone)]
pub struct LinkSignals {
    tx: mpsc::Sender<LinkEvent>,
    closed: Arc<AtomicBool>,
}

impl LinkSignals {
    /// Create a signal sender and the stream it feeds
    pub fn channel() -> (Self, mpsc::Receiver<LinkEvent>) {
        let (tx, rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn connected(&self) {
        self.emit(LinkEvent::Connected).await;
    }

    pub async fn frame(&self, frame: impl Into<Bytes>) {
        self.emit(LinkEvent::Frame(frame.into())).await;
    }

    pub async fn error(&self, err: TransportError) {
        self.emit(LinkEvent::Error(err)).await;
    }

    /// Signal link loss. Only the first call has an effect.
    pub async fn disconnected(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.tx.try_send(LinkEvent::Disconnected) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                // deliver once the consumer drains, without holding up teardown
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(event).await;
                });
            }
        }
    }

    async fn emit(&self, event: LinkEvent) {
        if self.is_closed() {
            return;
        }
        let _ = self.tx.send(event).await;
    }
}

/// Suppresses repeated debug output for identical consecutive frames
#[derive(Debug, Default)]
pub(crate) struct RepeatFilter {
    last: Option<Vec<u8>>,
}

impl RepeatFilter {
    /// Returns true if `data` differs from the previous call's
    pub(crate) fn is_new(&mut self, data: &[u8]) -> bool {
        if self.last.as_deref() == Some(data) {
            return false;
        }
        self.last = Some(data.to_vec());
        true
    }
}
