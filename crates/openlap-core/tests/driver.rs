use async_trait::async_trait;
use openlap_core::config::ConnectionConfig;
use openlap_core::driver::{CommandError, ConnectionError, ConnectionState, ControlUnit};
use openlap_core::peripheral::{Peripheral, PeripheralKind};
use openlap_core::protocol::{Command, FrameBuilder};
use openlap_core::transport::demo::{DemoControlUnit, DemoTransport};
use openlap_core::transport::{LinkEvent, LinkSignals, Transport, TransportError};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Instant};

fn peripheral() -> Peripheral {
    Peripheral::new(PeripheralKind::Serial, "Mock", Some("/dev/mock".into()))
}

/// Transport whose link events are driven by the test
#[derive(Clone, Default)]
struct ManualLink {
    signals: Arc<Mutex<Option<LinkSignals>>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ManualLink {
    fn signals(&self) -> LinkSignals {
        self.signals.lock().unwrap().clone().expect("link not open")
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

struct ManualTransport {
    peripheral: Peripheral,
    link: ManualLink,
}

#[async_trait]
impl Transport for ManualTransport {
    fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    async fn open(&mut self) -> Result<mpsc::Receiver<LinkEvent>, TransportError> {
        let (signals, rx) = LinkSignals::channel();
        *self.link.signals.lock().unwrap() = Some(signals);
        Ok(rx)
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.link.sent.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let signals = self.link.signals.lock().unwrap().take();
        if let Some(signals) = signals {
            signals.disconnected().await;
        }
        Ok(())
    }
}

fn manual_unit() -> (ControlUnit, ManualLink) {
    let link = ManualLink::default();
    let transport = ManualTransport {
        peripheral: peripheral(),
        link: link.clone(),
    };
    (
        ControlUnit::new(Box::new(transport), ConnectionConfig::default()),
        link,
    )
}

/// Simulated unit that stops answering after a number of requests on the
/// first link, then answers normally after reopening
struct FlakyTransport {
    peripheral: Peripheral,
    unit: DemoControlUnit,
    first_link_answers: usize,
    remaining: Option<usize>,
    opens: Arc<AtomicUsize>,
    signals: Option<LinkSignals>,
    origin: Instant,
}

#[async_trait]
impl Transport for FlakyTransport {
    fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    async fn open(&mut self) -> Result<mpsc::Receiver<LinkEvent>, TransportError> {
        let opened = self.opens.fetch_add(1, Ordering::SeqCst);
        self.remaining = (opened == 0).then_some(self.first_link_answers);
        let (signals, rx) = LinkSignals::channel();
        signals.connected().await;
        self.signals = Some(signals);
        Ok(rx)
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let signals = self.signals.clone().ok_or(TransportError::NotOpen)?;
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(());
            }
            *remaining -= 1;
        }
        sleep(Duration::from_millis(10)).await;
        let now_ms = self.origin.elapsed().as_millis() as u64;
        if let Some(response) = self.unit.respond(payload, now_ms) {
            signals.frame(response).await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(signals) = self.signals.take() {
            signals.disconnected().await;
        }
        Ok(())
    }
}

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
    timeout(Duration::from_secs(30), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("never reached {}", state))
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connect_to_demo_unit() {
    let cu = ControlUnit::new(
        Box::new(DemoTransport::new(2).with_seed(1)),
        ConnectionConfig::default(),
    );
    cu.connect().await.unwrap();
    assert_eq!(*cu.state().borrow(), ConnectionState::Connected);
    assert_eq!(cu.version().await, "5337");
    assert_eq!(cu.current_version(), Some("5337".to_string()));

    // status lines keep arriving while polling
    let mut fuel = cu.fuel();
    timeout(Duration::from_secs(5), fuel.wait_for(|f| f[0] == 15))
        .await
        .unwrap()
        .unwrap();

    cu.disconnect().await;
    assert_eq!(*cu.state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out_on_silent_link() {
    let (cu, _link) = manual_unit();
    let started = Instant::now();
    assert_eq!(cu.connect().await, Err(ConnectionError::Timeout(3000)));
    assert!(started.elapsed() >= Duration::from_millis(3000));
    assert_eq!(*cu.state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_is_rejected() {
    let cu = ControlUnit::new(Box::new(DemoTransport::new(1)), ConnectionConfig::default());
    cu.connect().await.unwrap();
    assert_eq!(cu.connect().await, Err(ConnectionError::AlreadyConnected));
    cu.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_status_frame_marks_link_live() {
    let (cu, link) = manual_unit();
    let connecting = tokio::spawn({
        let cu = cu.clone();
        async move { cu.connect().await }
    });
    sleep(Duration::from_millis(100)).await;

    let status = FrameBuilder::new()
        .command(b'?')
        .bytes(b":")
        .nibble(15)
        .nibble(15)
        .nibble(0)
        .nibble(0)
        .nibble(0)
        .nibble(0)
        .nibble(0)
        .nibble(0)
        .nibble(0)
        .nibble(1)
        .byte(0)
        .nibble(0)
        .checksum()
        .build();
    link.signals().frame(status).await;
    connecting.await.unwrap().unwrap();
    assert_eq!(*cu.state().borrow(), ConnectionState::Connected);
    assert_eq!(*cu.mode().borrow(), 1);

    // the version query goes out first
    sleep(Duration::from_millis(10)).await;
    assert_eq!(link.sent().first(), Some(&b"0".to_vec()));

    cu.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_commands_dropped_while_disconnected() {
    let (cu, link) = manual_unit();
    assert_eq!(cu.send(Command::Reset), Err(CommandError::NotConnected));
    cu.set_mask(0xff);

    let connecting = tokio::spawn({
        let cu = cu.clone();
        async move { cu.connect().await }
    });
    sleep(Duration::from_millis(10)).await;
    link.signals().connected().await;
    connecting.await.unwrap().unwrap();

    // answer the version query, then the next request is a poll
    link.signals()
        .frame(FrameBuilder::new().command(b'0').bytes(b"5337").checksum().build())
        .await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(link.sent(), vec![b"0".to_vec(), b"?".to_vec()]);

    cu.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_is_terminal() {
    let (cu, link) = manual_unit();
    let connecting = tokio::spawn({
        let cu = cu.clone();
        async move { cu.connect().await }
    });
    sleep(Duration::from_millis(10)).await;
    link.signals().connected().await;
    connecting.await.unwrap().unwrap();

    let mut state = cu.state();
    link.signals()
        .error(TransportError::LinkLost("Mock".into()))
        .await;
    link.signals().disconnected().await;
    wait_for_state(&mut state, ConnectionState::Disconnected).await;
    assert_eq!(
        *cu.last_error().borrow(),
        Some(TransportError::LinkLost("Mock".into()))
    );
    assert_eq!(cu.send(Command::Poll), Err(CommandError::NotConnected));

    // an explicit reconnect brings it back
    let reconnecting = tokio::spawn({
        let cu = cu.clone();
        async move { cu.reconnect().await }
    });
    sleep(Duration::from_millis(10)).await;
    link.signals().connected().await;
    reconnecting.await.unwrap().unwrap();
    assert_eq!(*cu.state().borrow(), ConnectionState::Connected);
    assert_eq!(*cu.last_error().borrow(), None);

    cu.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_request_timeout() {
    let opens = Arc::new(AtomicUsize::new(0));
    let transport = FlakyTransport {
        peripheral: peripheral(),
        unit: DemoControlUnit::seeded(2, 9),
        first_link_answers: 5,
        remaining: None,
        opens: opens.clone(),
        signals: None,
        origin: Instant::now(),
    };
    let cu = ControlUnit::new(Box::new(transport), ConnectionConfig::default());
    cu.connect().await.unwrap();

    let mut state = cu.state();
    wait_for_state(&mut state, ConnectionState::Reconnecting).await;
    wait_for_state(&mut state, ConnectionState::Connected).await;
    assert_eq!(opens.load(Ordering::SeqCst), 2);

    // the version survives the reconnect
    assert_eq!(cu.current_version(), Some("5337".to_string()));
    cu.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_timer_events_are_published() {
    let cu = ControlUnit::new(
        Box::new(DemoTransport::new(1).with_seed(4)),
        ConnectionConfig::default(),
    );
    let mut timer = cu.timer();
    cu.connect().await.unwrap();

    let tick = timeout(Duration::from_secs(10), timer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tick.car, 0);
    assert_eq!(tick.sensor, 0);
    assert!(tick.time >= 4500);

    cu.disconnect().await;
}
