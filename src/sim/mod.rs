//! Host simulation of the tracker board.
//!
//! The firmware core runs unmodified on a [`SimBoard`]. Around it run the
//! network server and the fall-detection co-processor as separate embassy
//! tasks, linked to the board by bounded channels and a wake-line signal:
//!
//! ```text
//!   node_task ──AirFrame──> network_server_task
//!       ^  <──Downlink───────────┘
//!       │ "OK"
//!       └────> coprocessor_task ──edge──> WakeLine / WakeLatch
//! ```

pub mod gnss;
pub mod network_server;
pub mod peer;
pub mod power;
pub mod radio;
pub mod retention;
pub mod types;

use std::sync::mpsc;

use embassy_executor::Spawner;
use log::{error, info};

use crate::config::NodeConfig;
use crate::hal::{Board, HardwareContext};
use crate::node::{NodeController, NodeState, WakeLatch};

use gnss::SimGnss;
use peer::SimPeer;
use power::{SimBattery, SimDelay, SimLed, SimPower};
use radio::SimLoraStack;
use retention::FileRetention;
use types::{DownlinkQueue, PeerQueue, SimClock, UplinkQueue, WakeLine};

pub struct SimBoard;

impl Board for SimBoard {
    type Gnss = SimGnss;
    type Peer = SimPeer;
    type Radio = SimLoraStack;
    type Retention = FileRetention;
    type Led = SimLed;
    type Battery = SimBattery;
    type Power = SimPower;
    type Delay = SimDelay;
}

/// Build the board and spawn every simulation task.
///
/// `done` receives the number of completed cycles once the configured cycle
/// limit is reached.
pub fn start(spawner: Spawner, config: NodeConfig, latch: &'static WakeLatch, done: mpsc::Sender<u32>) {
    let clock = SimClock::new(config.simulation.time_scale);

    // Channels live for the whole process.
    let uplinks: &'static UplinkQueue = Box::leak(Box::new(UplinkQueue::new()));
    let downlinks: &'static DownlinkQueue = Box::leak(Box::new(DownlinkQueue::new()));
    let peer_queue: &'static PeerQueue = Box::leak(Box::new(PeerQueue::new()));
    let wake_line: &'static WakeLine = Box::leak(Box::new(WakeLine::new()));

    let hw = HardwareContext::<SimBoard> {
        gnss: SimGnss::new(&config.simulation),
        peer: SimPeer::new(peer_queue.sender()),
        radio: SimLoraStack::new(uplinks.sender(), downlinks.receiver(), clock, config.simulation.seed as u16),
        retention: FileRetention::new(config.simulation.retention_path.clone()),
        led: SimLed::default(),
        battery: SimBattery::new(config.simulation.battery_raw),
        power: SimPower::new(clock, wake_line),
        delay: SimDelay::new(clock),
    };

    let _ = spawner.spawn(network_server::network_server_task(
        config.clone(),
        uplinks.receiver(),
        downlinks.sender(),
    ));
    match config.simulation.emergency_mean_interval_secs {
        Some(mean) => {
            let _ = spawner.spawn(peer::coprocessor_task(config.clone(), mean, latch, wake_line, peer_queue.receiver()));
        }
        None => info!("Co-processor alerts disabled"),
    }
    let _ = spawner.spawn(node_task(hw, config, latch, done));
}

#[embassy_executor::task]
async fn node_task(hw: HardwareContext<SimBoard>, config: NodeConfig, latch: &'static WakeLatch, done: mpsc::Sender<u32>) {
    let mut node = match NodeController::new(hw, &config, latch) {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to start node: {:#}", e);
            let _ = done.send(0);
            return;
        }
    };

    match config.simulation.cycles {
        Some(limit) => {
            while node.cycles() < limit {
                if node.step().await == NodeState::Sleeping {
                    log_cycle(&node);
                }
            }
            info!("Cycle limit of {} reached", limit);
            let _ = done.send(node.cycles());
        }
        None => node.run().await,
    }
}

/// One line per cycle, logged as the node goes to sleep.
fn log_cycle(node: &NodeController<'_, SimBoard>) {
    let fix = match node.last_fix() {
        Some(fix) if fix.valid => format!("{:.6}, {:.6}", fix.latitude, fix.longitude),
        Some(fix) => format!("fallback after {} retries", fix.staleness),
        None => "none".to_string(),
    };
    let uplink = match node.last_transmit() {
        Some(Ok(sent)) => format!("{} bytes", sent.0),
        Some(Err(e)) => e.to_string(),
        None => "none".to_string(),
    };
    info!(
        "Cycle {} ({:?}, woke by {:?}): fix {}, uplink {}",
        node.cycles() + 1,
        node.state(),
        node.last_wake(),
        fix,
        uplink
    );
}
