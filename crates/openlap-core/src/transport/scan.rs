//! Peripheral discovery
//!
//! Each transport family contributes a [`Backend`]. [`scan_all`] runs all of
//! them in parallel and merges their results into one deduplicated stream.

use futures::future::ready;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{Transport, TransportError};
use crate::config::ConnectionConfig;
use crate::peripheral::{Peripheral, PeripheralKind};

/// Lazy, possibly infinite sequence of discovered peripherals.
///
/// An `Err` item is terminal: the backend stops scanning after it.
pub type PeripheralStream = BoxStream<'static, Result<Peripheral, TransportError>>;

/// One transport family
pub trait Backend: Send + Sync {
    /// Kind of peripherals this backend discovers
    fn kind(&self) -> PeripheralKind;

    /// Start discovering peripherals
    fn scan(&self) -> PeripheralStream;

    /// Create an unopened transport for a peripheral of this backend's kind
    fn transport(&self, peripheral: &Peripheral) -> Result<Box<dyn Transport>, TransportError>;
}

/// Scan all backends in parallel.
///
/// A failing backend is logged and dropped without affecting the others.
/// Demo peripherals are only offered when enabled in `config`. Results are
/// deduplicated by peripheral identity.
pub fn scan_all(
    backends: &[Arc<dyn Backend>],
    config: &ConnectionConfig,
) -> BoxStream<'static, Peripheral> {
    let demo = config.demo_control_unit;
    let streams = backends
        .iter()
        .filter(|backend| demo || backend.kind() != PeripheralKind::Demo)
        .map(|backend| {
            let kind = backend.kind();
            backend
                .scan()
                .scan((), move |_, item| {
                    ready(match item {
                        Ok(peripheral) => Some(peripheral),
                        Err(e) => {
                            error!(%kind, error = %e, "Error scanning for peripherals");
                            None
                        }
                    })
                })
                .boxed()
        })
        .collect::<Vec<_>>();

    let mut seen = HashSet::new();
    stream::select_all(streams)
        .filter(move |peripheral| {
            let new = seen.insert(peripheral.id());
            if new {
                debug!(%peripheral, "Discovered peripheral");
            }
            ready(new)
        })
        .boxed()
}

/// Find the backend responsible for a peripheral kind
pub fn backend_for(
    backends: &[Arc<dyn Backend>],
    kind: PeripheralKind,
) -> Option<Arc<dyn Backend>> {
    backends.iter().find(|b| b.kind() == kind).cloned()
}

/// Scan until the peripheral stored in `config` shows up and create its
/// transport.
///
/// Returns `None` if the scan ends without a match. Callers bound the wait
/// with a timeout since radio scans never end on their own.
pub async fn find_peripheral(
    backends: &[Arc<dyn Backend>],
    config: &ConnectionConfig,
) -> Result<Option<Box<dyn Transport>>, TransportError> {
    let kind = match config.kind {
        Some(kind) => kind,
        None => return Ok(None),
    };
    let backend = backend_for(backends, kind)
        .ok_or_else(|| TransportError::Unsupported(kind.to_string()))?;

    let mut peripherals = scan_all(std::slice::from_ref(&backend), config);
    while let Some(peripheral) = peripherals.next().await {
        if peripheral.matches(config) {
            info!(%peripheral, "Found configured peripheral");
            return backend.transport(&peripheral).map(Some);
        }
    }
    Ok(None)
}
