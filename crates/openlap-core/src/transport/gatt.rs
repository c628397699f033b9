//! GATT transport (Bluetooth LE and Web Bluetooth)
//!
//! The Control Unit's wireless adapter exposes one service with a write and
//! a notify characteristic. Each notification carries exactly one frame, so
//! no sentinel splitting is needed, only the version quirk fix-up.
//!
//! The radio itself is platform specific and reached through [`GattAdapter`]
//! and [`GattLink`].

use async_trait::async_trait;
use futures::future::ready;
use futures::stream::BoxStream;
use futures::StreamExt;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::scan::{Backend, PeripheralStream};
use super::{LinkEvent, LinkSignals, RepeatFilter, Transport, TransportError};
use crate::peripheral::{Peripheral, PeripheralKind};
use crate::protocol::{normalize_notification, NOTIFY_UUID, OUTPUT_UUID, SERVICE_UUID};

/// A device seen by a radio scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Platform device id
    pub address: String,
    /// Advertised local name
    pub name: Option<String>,
}

/// Connection to one GATT server
#[async_trait]
pub trait GattLink: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    /// Enable notifications. The channel closes when the link is lost.
    async fn subscribe(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;

    /// Write without response
    async fn write(
        &self,
        service: &str,
        characteristic: &str,
        value: &[u8],
    ) -> Result<(), TransportError>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Platform radio
pub trait GattAdapter: Send + Sync {
    type Link: GattLink + 'static;

    /// Discover devices advertising the Control Unit service
    fn scan(&self) -> BoxStream<'static, Result<Advertisement, TransportError>>;

    /// Link to a device. `None` lets the platform pick one (Web Bluetooth).
    fn link(&self, address: Option<&str>) -> Self::Link;
}

/// Whether an advertised name belongs to a Control Unit
pub fn is_control_unit(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)control.unit").ok())
        .as_ref()
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Link to a Control Unit over GATT
pub struct GattTransport<L: GattLink> {
    peripheral: Peripheral,
    link: Arc<L>,
    task: Option<JoinHandle<()>>,
    signals: Option<LinkSignals>,
    written: RepeatFilter,
}

impl<L: GattLink + 'static> GattTransport<L> {
    pub fn new(peripheral: Peripheral, link: L) -> Self {
        Self {
            peripheral,
            link: Arc::new(link),
            task: None,
            signals: None,
            written: RepeatFilter::default(),
        }
    }
}

#[async_trait]
impl<L: GattLink + 'static> Transport for GattTransport<L> {
    fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    async fn open(&mut self) -> Result<mpsc::Receiver<LinkEvent>, TransportError> {
        if self.signals.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        info!(peripheral = %self.peripheral, "Connecting to GATT server");
        self.link.connect().await?;

        let mut notifications = match self.link.subscribe(SERVICE_UUID, NOTIFY_UUID).await {
            Ok(rx) => rx,
            Err(e) => {
                let _ = self.link.disconnect().await;
                return Err(e);
            }
        };
        if !self.link.is_connected().await {
            let _ = self.link.disconnect().await;
            return Err(TransportError::Unreachable(self.peripheral.name.clone()));
        }

        let (signals, rx) = LinkSignals::channel();
        let task_signals = signals.clone();
        let name = self.peripheral.name.clone();
        self.task = Some(tokio::spawn(async move {
            let mut received = RepeatFilter::default();
            while let Some(value) = notifications.recv().await {
                let frame = normalize_notification(&value);
                if received.is_new(&frame) {
                    debug!(frame = %String::from_utf8_lossy(&frame), "GATT notification");
                }
                task_signals.frame(frame).await;
            }
            if !task_signals.is_closed() {
                warn!(peripheral = %name, "GATT link lost");
            }
            task_signals.disconnected().await;
        }));

        signals.connected().await;
        self.signals = Some(signals);
        Ok(rx)
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.signals.is_none() {
            return Err(TransportError::NotOpen);
        }
        if !self.link.is_connected().await {
            warn!(
                payload = %String::from_utf8_lossy(payload),
                "Dropping write while disconnected"
            );
            return Ok(());
        }
        if self.written.is_new(payload) {
            debug!(payload = %String::from_utf8_lossy(payload), "GATT write");
        }
        self.link.write(SERVICE_UUID, OUTPUT_UUID, payload).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(signals) = self.signals.take() else {
            return Ok(());
        };
        // mark closed first so the reader does not report a link loss
        signals.disconnected().await;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Err(e) = self.link.disconnect().await {
            warn!(peripheral = %self.peripheral, error = %e, "Error disconnecting GATT server");
        }
        info!(peripheral = %self.peripheral, "Disconnected from GATT server");
        Ok(())
    }
}

/// Discovers Control Units over a GATT radio
pub struct GattBackend<A> {
    kind: PeripheralKind,
    adapter: Arc<A>,
}

impl<A: GattAdapter + 'static> GattBackend<A> {
    /// Native Bluetooth LE
    pub fn ble(adapter: A) -> Self {
        Self {
            kind: PeripheralKind::Ble,
            adapter: Arc::new(adapter),
        }
    }

    /// Web Bluetooth. The browser's device picker selects the unit, so a
    /// single placeholder peripheral without address is offered.
    pub fn web_bluetooth(adapter: A) -> Self {
        Self {
            kind: PeripheralKind::WebBluetooth,
            adapter: Arc::new(adapter),
        }
    }
}

impl<A: GattAdapter + 'static> Backend for GattBackend<A> {
    fn kind(&self) -> PeripheralKind {
        self.kind
    }

    fn scan(&self) -> PeripheralStream {
        if self.kind == PeripheralKind::WebBluetooth {
            let peripheral = Peripheral::new(self.kind, "Control_Unit", None);
            return futures::stream::iter([Ok(peripheral)]).boxed();
        }
        let kind = self.kind;
        let mut seen = HashSet::new();
        self.adapter
            .scan()
            .filter_map(move |item| {
                ready(match item {
                    Ok(ad) => {
                        let name = ad.name.unwrap_or_default();
                        if is_control_unit(&name) && seen.insert(ad.address.clone()) {
                            Some(Ok(Peripheral::new(kind, name, Some(ad.address))))
                        } else {
                            None
                        }
                    }
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed()
    }

    fn transport(&self, peripheral: &Peripheral) -> Result<Box<dyn Transport>, TransportError> {
        if peripheral.kind != self.kind {
            return Err(TransportError::Unsupported(peripheral.kind.to_string()));
        }
        let link = self.adapter.link(peripheral.address.as_deref());
        Ok(Box::new(GattTransport::new(peripheral.clone(), link)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockLink {
        connected: AtomicBool,
        notify: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
        written: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl GattLink for Arc<MockLink> {
        async fn connect(&self) -> Result<(), TransportError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn subscribe(
            &self,
            service: &str,
            characteristic: &str,
        ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
            assert_eq!(service, SERVICE_UUID);
            assert_eq!(characteristic, NOTIFY_UUID);
            let (tx, rx) = mpsc::channel(8);
            *self.notify.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn write(
            &self,
            _service: &str,
            characteristic: &str,
            value: &[u8],
        ) -> Result<(), TransportError> {
            assert_eq!(characteristic, OUTPUT_UUID);
            self.written.lock().unwrap().push(value.to_vec());
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.connected.store(false, Ordering::SeqCst);
            self.notify.lock().unwrap().take();
            Ok(())
        }
    }

    fn transport() -> (GattTransport<Arc<MockLink>>, Arc<MockLink>) {
        let mock = Arc::new(MockLink::default());
        let peripheral = Peripheral::new(PeripheralKind::Ble, "Control_Unit", Some("AA".into()));
        (GattTransport::new(peripheral, mock.clone()), mock)
    }

    fn notifier(mock: &MockLink) -> mpsc::Sender<Vec<u8>> {
        mock.notify.lock().unwrap().clone().unwrap()
    }

    #[test]
    fn test_name_filter() {
        assert!(is_control_unit("Control_Unit"));
        assert!(is_control_unit("control unit"));
        assert!(is_control_unit("CONTROL-UNIT 2"));
        assert!(!is_control_unit("ControlUnit"));
        assert!(!is_control_unit("Headphones"));
    }

    #[tokio::test]
    async fn test_notifications_are_normalized() {
        let (mut transport, mock) = transport();
        let mut events = transport.open().await.unwrap();
        assert_eq!(events.recv().await, Some(LinkEvent::Connected));

        notifier(&mock).send(b"5337C$".to_vec()).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(LinkEvent::Frame(bytes::Bytes::from_static(b"05337C")))
        );
    }

    #[tokio::test]
    async fn test_writes_go_to_output_characteristic() {
        let (mut transport, mock) = transport();
        let _events = transport.open().await.unwrap();
        transport.send(b"?").await.unwrap();
        assert_eq!(*mock.written.lock().unwrap(), vec![b"?".to_vec()]);

        // dropped, not an error
        mock.connected.store(false, Ordering::SeqCst);
        transport.send(b"0").await.unwrap();
        assert_eq!(mock.written.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_link_loss_signals_disconnect_once() {
        let (mut transport, mock) = transport();
        let mut events = transport.open().await.unwrap();
        assert_eq!(events.recv().await, Some(LinkEvent::Connected));

        mock.notify.lock().unwrap().take();
        assert_eq!(events.recv().await, Some(LinkEvent::Disconnected));

        transport.close().await.unwrap();
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_clean_close() {
        let (mut transport, mock) = transport();
        let mut events = transport.open().await.unwrap();
        assert_eq!(events.recv().await, Some(LinkEvent::Connected));
        transport.close().await.unwrap();
        assert_eq!(events.recv().await, Some(LinkEvent::Disconnected));
        assert!(!mock.connected.load(Ordering::SeqCst));
        assert_eq!(transport.send(b"?").await, Err(TransportError::NotOpen));
    }
}
