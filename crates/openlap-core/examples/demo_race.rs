//! Demo race
//!
//! Connects to a Control Unit, runs a short race and prints the standings
//! whenever they change. Without arguments the simulated unit is used; pass
//! a settings file to use a stored connection instead:
//!
//! ```text
//! cargo run --example demo_race
//! RUST_LOG=openlap_core=debug cargo run --example demo_race -- settings.json
//! ```

use anyhow::{bail, Context};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use openlap_core::config::{ConnectionConfig, RaceOptions, SessionType};
use openlap_core::driver::ControlUnit;
use openlap_core::peripheral::PeripheralKind;
use openlap_core::session::{SessionRunner, SessionSnapshot};
use openlap_core::transport::demo::DemoBackend;
use openlap_core::transport::scan::{find_peripheral, Backend};
use openlap_core::transport::serial::SerialBackend;

const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

fn format_time(ms: Option<u64>) -> String {
    match ms {
        Some(ms) => format!("{}.{:03}", ms / 1000, ms % 1000),
        None => "-".into(),
    }
}

fn print_standings(snapshot: &SessionSnapshot) {
    println!(
        "\nLap {}/{}{}",
        snapshot.current_lap,
        snapshot.total_laps,
        if snapshot.yellow_flag { "  YELLOW FLAG" } else { "" }
    );
    for (position, entry) in snapshot.ranking.iter().enumerate() {
        println!(
            "{:>2}. Car {}  laps {:>2}  last {:>7}  best {:>7}  fuel {:>2}{}{}",
            position + 1,
            entry.id + 1,
            entry.laps,
            format_time(entry.last_lap()),
            format_time(entry.best_lap()),
            entry.fuel.map(|f| f.to_string()).unwrap_or_default(),
            if entry.pit { "  PIT" } else { "" },
            if entry.finished { "  FINISHED" } else { "" },
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ConnectionConfig::load(&path)
            .with_context(|| format!("Failed to load settings from {}", path))?,
        None => ConnectionConfig {
            kind: Some(PeripheralKind::Demo),
            demo_control_unit: true,
            ..Default::default()
        },
    };

    let backends: Vec<Arc<dyn Backend>> =
        vec![Arc::new(SerialBackend), Arc::new(DemoBackend { cars: 4 })];
    let transport = tokio::time::timeout(SCAN_TIMEOUT, find_peripheral(&backends, &config))
        .await
        .context("Timed out scanning for the Control Unit")??;
    let Some(transport) = transport else {
        bail!("Configured Control Unit not found");
    };

    let cu = ControlUnit::new(transport, config);
    cu.connect().await?;
    println!("Connected to {} (firmware {})", cu.peripheral(), cu.version().await);

    let options = RaceOptions {
        laps: 5,
        ..RaceOptions::new(SessionType::Race)
    };
    let session = SessionRunner::new(cu.clone(), options).spawn();
    let mut snapshots = session.snapshots();
    let mut events = session.events();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_standings(&snapshot);
                if snapshot.finished && snapshot.ranking.iter().all(|e| e.finished) {
                    break;
                }
            }
            Ok(event) = events.recv() => println!(">> {}", event),
            _ = tokio::signal::ctrl_c() => {
                println!("Race cancelled");
                break;
            }
        }
    }

    session.shutdown().await;
    cu.disconnect().await;
    Ok(())
}
