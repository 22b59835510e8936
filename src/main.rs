use anyhow::Context;
use embassy_executor::Executor;
use env_logger::Builder;
use log::{LevelFilter, info};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use crate::config::NodeConfig;
use crate::node::WakeLatch;

mod config;
mod error;
mod hal;
mod node;
mod sim;

/// Raised by the wake-line interrupt, taken by the controller at each wake.
static WAKE_LATCH: WakeLatch = WakeLatch::new();

fn main() -> anyhow::Result<()> {
    // Logging setup; RUST_LOG overrides the defaults.
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("asset_tracker_node"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = NodeConfig::load(&config_path)?;
    info!(
        "Starting node {} from {} (time scale {}x)",
        config.device.dev_eui,
        config_path.display(),
        config.simulation.time_scale
    );

    let (done_tx, done_rx) = mpsc::channel();

    // Spawn Embassy executor on a dedicated background thread
    let _embassy_handle = thread::Builder::new()
        .name("embassy-executor".to_string())
        .spawn(move || {
            // Leak the executor to satisfy the 'static lifetime required by run()
            let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
            executor.run(|spawner| sim::start(spawner, config, &WAKE_LATCH, done_tx));
        })
        .context("failed to spawn embassy thread")?;

    let cycles = done_rx.recv().context("simulation stopped without reporting")?;
    info!("Finished after {} cycles", cycles);
    Ok(())
}
