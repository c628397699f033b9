//! Demo Mode - simulated Control Unit
//!
//! Answers requests like a real unit: polls return timer events for cars
//! crossing the finish line or the status line, commands are acknowledged.
//! Cars lap with randomized times, burn fuel and stop in the pit lane when
//! the tank is empty.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::scan::{Backend, PeripheralStream};
use super::{LinkEvent, LinkSignals, Transport, TransportError};
use crate::peripheral::{Peripheral, PeripheralKind};
use crate::protocol::{FrameBuilder, FrameReader, NUM_CARS};

/// Firmware version the simulated unit reports
pub const DEMO_VERSION: &str = "5337";

/// Display name of the simulated unit
pub const DEMO_NAME: &str = "Demo Control Unit";

/// Round trip of one request over the simulated link
const RESPONSE_DELAY: Duration = Duration::from_millis(20);

/// Track mode reported in the status line (pit lane installed)
const DEMO_MODE: u8 = 0x01;

const FULL_TANK: u8 = 15;

/// Laps driven per fuel level
const LAPS_PER_FUEL_LEVEL: u32 = 2;

/// Extra time spent in the pit lane when refuelling
const PIT_STOP_MS: u64 = 3000;

#[derive(Debug, Clone)]
struct DemoCar {
    /// Typical lap time of this driver
    lap_ms: u64,
    /// Simulation time of the next finish line crossing
    next_crossing_ms: u64,
    laps: u32,
    fuel: u8,
    in_pit: bool,
}

/// A simulated Control Unit
pub struct DemoControlUnit {
    cars: Vec<DemoCar>,
    /// Cars disabled by the host, one bit per car
    mask: u8,
    /// Start light code
    start: u8,
    /// When the start button was pressed
    start_pressed_ms: Option<u64>,
    /// Simulation time the lap timer was last reset
    clock_origin_ms: u64,
    /// Timer events not yet picked up by a poll
    pending: VecDeque<(u8, u32)>,
    rng: StdRng,
}

impl DemoControlUnit {
    /// Simulate `cars` cars (clamped to 1..=8)
    pub fn new(cars: usize) -> Self {
        Self::with_rng(cars, StdRng::from_entropy())
    }

    /// Simulate with a fixed seed for reproducible lap times
    pub fn seeded(cars: usize, seed: u64) -> Self {
        Self::with_rng(cars, StdRng::seed_from_u64(seed))
    }

    fn with_rng(cars: usize, mut rng: StdRng) -> Self {
        let cars = (0..cars.clamp(1, NUM_CARS))
            .map(|_| {
                let lap_ms = rng.gen_range(4500..7500);
                DemoCar {
                    lap_ms,
                    next_crossing_ms: lap_ms,
                    laps: 0,
                    fuel: FULL_TANK,
                    in_pit: false,
                }
            })
            .collect();
        Self {
            cars,
            mask: 0,
            start: 0,
            start_pressed_ms: None,
            clock_origin_ms: 0,
            pending: VecDeque::new(),
            rng,
        }
    }

    /// Answer one request payload at simulation time `now_ms`.
    ///
    /// Returns the response frame without sentinel, or `None` for requests
    /// the unit ignores.
    pub fn respond(&mut self, request: &[u8], now_ms: u64) -> Option<Vec<u8>> {
        self.update(now_ms);
        match request.first()? {
            b'?' => Some(self.poll()),
            b'0' => Some(
                FrameBuilder::new()
                    .command(b'0')
                    .bytes(DEMO_VERSION.as_bytes())
                    .checksum()
                    .build(),
            ),
            b'=' => {
                self.clock_origin_ms = now_ms;
                Some(b"=".to_vec())
            }
            b'T' => {
                let mut reader = FrameReader::new(request);
                reader.skip(1).ok()?;
                // START is button 2
                if reader.nibble().ok()? == 2 && self.start == 0 {
                    self.start_pressed_ms = Some(now_ms);
                    self.start = 1;
                }
                Some(b"T".to_vec())
            }
            b':' => {
                let mut reader = FrameReader::new(request);
                reader.skip(1).ok()?;
                self.mask = reader.byte().ok()?;
                Some(b":".to_vec())
            }
            b'J' => {
                let mut reader = FrameReader::new(request);
                reader.skip(1).ok()?;
                let target = reader.byte().ok()?;
                let value = reader.nibble().ok()?;
                let (word, address) = (target & 0x1f, usize::from(target >> 5));
                // fuel word
                if word == 2 {
                    if let Some(car) = self.cars.get_mut(address) {
                        car.fuel = value;
                    }
                }
                Some(b"J".to_vec())
            }
            _ => None,
        }
    }

    fn update(&mut self, now_ms: u64) {
        if let Some(pressed) = self.start_pressed_ms {
            let elapsed = now_ms.saturating_sub(pressed);
            if elapsed >= 6000 {
                self.start = 0;
                self.start_pressed_ms = None;
                self.go(now_ms);
            } else {
                // one light per second after the start button
                self.start = if elapsed < 1000 {
                    1
                } else {
                    2 + u8::try_from(elapsed / 1000 - 1).unwrap_or(4)
                };
            }
        }

        for index in 0..self.cars.len() {
            while self.cars[index].next_crossing_ms <= now_ms {
                self.cross_finish_line(index);
            }
        }
    }

    /// Lights out: everyone starts a fresh lap from the grid
    fn go(&mut self, now_ms: u64) {
        self.pending.clear();
        for car in &mut self.cars {
            car.next_crossing_ms = now_ms + car.lap_ms;
            car.laps = 0;
        }
    }

    fn cross_finish_line(&mut self, index: usize) {
        let jitter = self.rng.gen_range(0..500);
        let masked = self.mask & (1 << index) != 0;
        let origin = self.clock_origin_ms;
        let car = &mut self.cars[index];
        let crossed_at = car.next_crossing_ms;

        let mut lap_ms = car.lap_ms + jitter;
        if car.in_pit {
            car.in_pit = false;
            car.fuel = FULL_TANK;
            lap_ms += PIT_STOP_MS;
        }
        car.next_crossing_ms = crossed_at + lap_ms;
        if masked {
            return;
        }

        car.laps += 1;
        if car.laps % LAPS_PER_FUEL_LEVEL == 0 {
            car.fuel = car.fuel.saturating_sub(1);
        }
        if car.fuel == 0 {
            car.in_pit = true;
        }
        // device clock is 32 bits and wraps
        let time = crossed_at.saturating_sub(origin) as u32;
        self.pending.push_back((index as u8, time));
    }

    fn poll(&mut self) -> Vec<u8> {
        match self.pending.pop_front() {
            Some((car, time)) => FrameBuilder::new()
                .command(b'?')
                .nibble(car + 1)
                .u32(time)
                .nibble(1)
                .checksum()
                .build(),
            None => self.status(),
        }
    }

    fn status(&self) -> Vec<u8> {
        let mut builder = FrameBuilder::new().command(b'?').bytes(b":");
        let mut pit = 0u8;
        for index in 0..NUM_CARS {
            let car = self.cars.get(index);
            builder = builder.nibble(car.map(|c| c.fuel).unwrap_or(0));
            if car.map(|c| c.in_pit).unwrap_or(false) {
                pit |= 1 << index;
            }
        }
        builder
            .nibble(self.start)
            .nibble(DEMO_MODE)
            .byte(pit)
            .nibble(0)
            .checksum()
            .build()
    }
}

/// Transport backed by a [`DemoControlUnit`]
pub struct DemoTransport {
    peripheral: Peripheral,
    cars: usize,
    seed: Option<u64>,
    requests: Option<mpsc::Sender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
    signals: Option<LinkSignals>,
}

impl DemoTransport {
    pub fn new(cars: usize) -> Self {
        Self {
            peripheral: Peripheral::new(PeripheralKind::Demo, DEMO_NAME, None),
            cars,
            seed: None,
            requests: None,
            task: None,
            signals: None,
        }
    }

    /// Use a fixed seed for reproducible races
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

async fn run_unit(
    mut unit: DemoControlUnit,
    mut requests: mpsc::Receiver<Vec<u8>>,
    signals: LinkSignals,
) {
    let origin = Instant::now();
    while let Some(request) = requests.recv().await {
        sleep(RESPONSE_DELAY).await;
        let now_ms = u64::try_from(origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Some(response) = unit.respond(&request, now_ms) {
            signals.frame(response).await;
        }
    }
    signals.disconnected().await;
}

#[async_trait]
impl Transport for DemoTransport {
    fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    async fn open(&mut self) -> Result<mpsc::Receiver<LinkEvent>, TransportError> {
        if self.requests.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        let unit = match self.seed {
            Some(seed) => DemoControlUnit::seeded(self.cars, seed),
            None => DemoControlUnit::new(self.cars),
        };
        info!(cars = unit.cars.len(), "Starting demo Control Unit");

        let (signals, rx) = LinkSignals::channel();
        let (requests, request_rx) = mpsc::channel(8);
        self.task = Some(tokio::spawn(run_unit(unit, request_rx, signals.clone())));
        signals.connected().await;
        self.requests = Some(requests);
        self.signals = Some(signals);
        Ok(rx)
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let requests = self.requests.as_ref().ok_or(TransportError::NotOpen)?;
        requests
            .send(payload.to_vec())
            .await
            .map_err(|_| TransportError::LinkLost("demo unit stopped".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.requests = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(signals) = self.signals.take() {
            debug!("Stopped demo Control Unit");
            signals.disconnected().await;
        }
        Ok(())
    }
}

/// Offers the simulated unit in scans
#[derive(Debug, Clone, Copy)]
pub struct DemoBackend {
    pub cars: usize,
}

impl Default for DemoBackend {
    fn default() -> Self {
        Self { cars: 6 }
    }
}

impl Backend for DemoBackend {
    fn kind(&self) -> PeripheralKind {
        PeripheralKind::Demo
    }

    fn scan(&self) -> PeripheralStream {
        stream::iter([Ok(Peripheral::new(PeripheralKind::Demo, DEMO_NAME, None))]).boxed()
    }

    fn transport(&self, _peripheral: &Peripheral) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(DemoTransport::new(self.cars)))
    }
}
