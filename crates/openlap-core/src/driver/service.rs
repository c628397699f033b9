//! Slot for the one active Control Unit

use tokio::sync::{watch, Mutex};
use tracing::info;

use super::ControlUnit;

/// Holds at most one active driver.
///
/// Replacing the driver disconnects the previous one first, so two command
/// channels to the hardware never exist at once.
pub struct ControlUnitService {
    transitions: Mutex<()>,
    current: watch::Sender<Option<ControlUnit>>,
}

impl Default for ControlUnitService {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlUnitService {
    pub fn new() -> Self {
        Self {
            transitions: Mutex::new(()),
            current: watch::channel(None).0,
        }
    }

    /// The active driver, if any
    pub fn current(&self) -> Option<ControlUnit> {
        self.current.borrow().clone()
    }

    /// Observe driver changes
    pub fn subscribe(&self) -> watch::Receiver<Option<ControlUnit>> {
        self.current.subscribe()
    }

    /// Make `next` the active driver after disconnecting the current one
    pub async fn replace(&self, next: Option<ControlUnit>) {
        let _guard = self.transitions.lock().await;
        let previous = self.current.borrow().clone();
        if let Some(previous) = previous {
            info!(peripheral = %previous.peripheral(), "Releasing Control Unit");
            previous.disconnect().await;
        }
        self.current.send_replace(next);
    }

    /// Disconnect and clear the active driver
    pub async fn clear(&self) {
        self.replace(None).await;
    }
}
