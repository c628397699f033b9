//! Serial transport
//!
//! The Control Unit's PC interface is a USB serial adapter running at a
//! fixed 19200 baud, 8N1. Frames are split on the `$` sentinel by
//! [`FrameCodec`]; requests go out quoted.

use async_trait::async_trait;
use futures::{stream, SinkExt, StreamExt};
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use tokio::io::WriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::scan::{Backend, PeripheralStream};
use super::{LinkEvent, LinkSignals, RepeatFilter, Transport, TransportError};
use crate::peripheral::{Peripheral, PeripheralKind};
use crate::protocol::{FrameCodec, SERIAL_BAUD_RATE};

/// Display name for ports that do not report a USB product string
const DEFAULT_PORT_NAME: &str = "Serial USB";

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }

    /// The peripheral this port represents
    pub fn to_peripheral(&self) -> Peripheral {
        let name = self.product.as_deref().unwrap_or(DEFAULT_PORT_NAME);
        Peripheral::new(PeripheralKind::Serial, name, Some(self.name.clone()))
    }
}

/// Sort key placing ttyACM* first, then ttyUSB* (both numerically), then
/// everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => warn!(error = %e, "Failed to enumerate serial ports"),
    }

    // udev may not have tagged a freshly plugged adapter yet
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a port with the Control Unit's fixed line settings
fn open_port(name: &str) -> Result<SerialStream, TransportError> {
    let port = tokio_serial::new(name, SERIAL_BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()?;
    Ok(port)
}

/// Link to a Control Unit over a serial port
pub struct SerialTransport {
    peripheral: Peripheral,
    writer: Option<FramedWrite<WriteHalf<SerialStream>, FrameCodec>>,
    reader: Option<JoinHandle<()>>,
    signals: Option<LinkSignals>,
    written: RepeatFilter,
}

impl SerialTransport {
    /// Transport for the given port path
    pub fn new(port: impl Into<String>) -> Self {
        Self::for_peripheral(Peripheral::new(
            PeripheralKind::Serial,
            DEFAULT_PORT_NAME,
            Some(port.into()),
        ))
    }

    pub fn for_peripheral(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            writer: None,
            reader: None,
            signals: None,
            written: RepeatFilter::default(),
        }
    }

    fn port_name(&self) -> Result<&str, TransportError> {
        self.peripheral
            .address
            .as_deref()
            .ok_or_else(|| TransportError::PortNotFound(self.peripheral.name.clone()))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    async fn open(&mut self) -> Result<mpsc::Receiver<LinkEvent>, TransportError> {
        if self.writer.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        let name = self.port_name()?.to_string();
        info!(port = %name, baud = SERIAL_BAUD_RATE, "Opening serial port");
        let port = open_port(&name)?;
        let (reader, writer) = tokio::io::split(port);
        let (signals, rx) = LinkSignals::channel();

        let task_signals = signals.clone();
        let reader = tokio::spawn(async move {
            let mut frames = FramedRead::new(reader, FrameCodec::new());
            while let Some(item) = frames.next().await {
                match item {
                    Ok(frame) => task_signals.frame(frame).await,
                    Err(e) => {
                        warn!(port = %name, error = %e, "Serial read failed");
                        task_signals
                            .error(TransportError::LinkLost(e.to_string()))
                            .await;
                        break;
                    }
                }
            }
            debug!(port = %name, "Serial reader finished");
            task_signals.disconnected().await;
        });

        signals.connected().await;
        self.writer = Some(FramedWrite::new(writer, FrameCodec::new()));
        self.reader = Some(reader);
        self.signals = Some(signals);
        Ok(rx)
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotOpen)?;
        if self.written.is_new(payload) {
            debug!(payload = %String::from_utf8_lossy(payload), "Serial write");
        }
        writer
            .send(payload)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer = None;
        if let Some(signals) = self.signals.take() {
            info!(port = ?self.peripheral.address, "Closed serial port");
            signals.disconnected().await;
        }
        Ok(())
    }
}

/// Discovers serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl Backend for SerialBackend {
    fn kind(&self) -> PeripheralKind {
        PeripheralKind::Serial
    }

    fn scan(&self) -> PeripheralStream {
        stream::once(tokio::task::spawn_blocking(list_ports))
            .flat_map(|listed| {
                let items: Vec<Result<Peripheral, TransportError>> = match listed {
                    Ok(ports) => ports.iter().map(|p| Ok(p.to_peripheral())).collect(),
                    Err(e) => vec![Err(TransportError::Io(e.to_string()))],
                };
                stream::iter(items)
            })
            .boxed()
    }

    fn transport(&self, peripheral: &Peripheral) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SerialTransport::for_peripheral(peripheral.clone())))
    }
}
