//! Simulated LoRaWAN network server and application backend.
//!
//! Accepts joins after a random number of join-poll intervals, drops a share
//! of uplinks to exercise the retry path, acknowledges the rest, and decodes
//! each telemetry payload into a JSON record on the log.
//!
//! The device table is kept in a JSON file next to the node's retention file,
//! so a restarted simulation still knows the session the node restores.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use embassy_time::{Duration, Timer};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;
use crate::error::CodecError;
use crate::node::telemetry;

use super::types::{AirFrame, Downlink, DownlinkQueueSender, SimClock, UplinkQueueReceiver};

/// First address handed out to a joining device.
const DEV_ADDR_BASE: u32 = 0x2601_1000;

/// One decoded uplink as the backend stores it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UplinkRecord {
    pub received_at: String,
    pub dev_eui: String,
    pub f_cnt: u32,
    pub latitude: f32,
    pub longitude: f32,
    pub battery: f32,
}

/// What the server does with one uplink.
#[derive(Debug, Clone, PartialEq)]
pub enum UplinkOutcome {
    Accepted(UplinkRecord),
    UnknownDevice(u32),
    Replay { f_cnt: u32, last: u32 },
    Malformed(CodecError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeviceSession {
    dev_eui: String,
    last_f_cnt: Option<u32>,
}

/// Device table of the network server.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkServer {
    /// Keyed by device address.
    sessions: HashMap<u32, DeviceSession>,
    next_addr: u32,
}

impl NetworkServer {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_addr: DEV_ADDR_BASE,
        }
    }

    /// Read the device table written by [`NetworkServer::save`]. A missing
    /// file is an empty table.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Write the device table through a temporary file and a rename.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, path).with_context(|| format!("Failed to replace {}", path.display()))
    }

    /// Register a join and allocate a device address.
    pub fn accept_join(&mut self, dev_eui: &[u8; 8]) -> u32 {
        let eui: String = dev_eui.iter().map(|b| format!("{:02x}", b)).collect();
        self.sessions.retain(|_, session| session.dev_eui != eui);
        self.next_addr += 1;
        self.sessions.insert(
            self.next_addr,
            DeviceSession {
                dev_eui: eui,
                last_f_cnt: None,
            },
        );
        self.next_addr
    }

    pub fn handle_uplink(&mut self, dev_addr: u32, f_cnt: u32, payload: &[u8]) -> UplinkOutcome {
        let Some(session) = self.sessions.get_mut(&dev_addr) else {
            return UplinkOutcome::UnknownDevice(dev_addr);
        };
        if let Some(last) = session.last_f_cnt {
            if f_cnt <= last {
                return UplinkOutcome::Replay { f_cnt, last };
            }
        }
        let (latitude, longitude, battery) = match telemetry::decode(payload) {
            Ok(values) => values,
            Err(e) => return UplinkOutcome::Malformed(e),
        };
        session.last_f_cnt = Some(f_cnt);
        UplinkOutcome::Accepted(UplinkRecord {
            received_at: Utc::now().to_rfc3339(),
            dev_eui: session.dev_eui.clone(),
            f_cnt,
            latitude,
            longitude,
            battery,
        })
    }
}

#[embassy_executor::task]
pub async fn network_server_task(config: NodeConfig, uplinks: UplinkQueueReceiver, downlinks: DownlinkQueueSender) {
    let clock = SimClock::new(config.simulation.time_scale);
    let mut rng = StdRng::seed_from_u64(config.simulation.seed.wrapping_add(1));
    let join_poll_interval = Duration::from_millis(config.radio.join_poll_interval_ms);
    let state_path = config.simulation.retention_path.with_extension("server.json");
    let mut server = match NetworkServer::load(&state_path) {
        Ok(server) => server,
        Err(e) => {
            warn!("Starting with an empty device table: {:#}", e);
            NetworkServer::new()
        }
    };
    let persist = |server: &NetworkServer| {
        if let Err(e) = server.save(&state_path) {
            warn!("Failed to save device table: {:#}", e);
        }
    };

    loop {
        match uplinks.receive().await {
            AirFrame::JoinRequest { dev_eui, dev_nonce } => {
                let polls = rng.gen_range(0..=config.simulation.max_join_polls);
                // Accept lands a few node poll intervals later.
                Timer::after(clock.real(join_poll_interval * polls)).await;
                let dev_addr = server.accept_join(&dev_eui);
                persist(&server);
                info!("Join accepted (nonce {}), device address {:08x}", dev_nonce, dev_addr);
                downlinks.send(Downlink::JoinAccept { dev_addr }).await;
            }
            AirFrame::Uplink {
                dev_addr,
                f_cnt,
                confirmed,
                payload,
            } => {
                if rng.gen_bool(config.simulation.uplink_loss_probability) {
                    warn!("Uplink {} from {:08x} lost on air", f_cnt, dev_addr);
                    continue;
                }
                match server.handle_uplink(dev_addr, f_cnt, &payload) {
                    UplinkOutcome::Accepted(record) => {
                        persist(&server);
                        match serde_json::to_string(&record) {
                            Ok(json) => info!("{}", json),
                            Err(e) => warn!("Failed to serialize uplink record: {}", e),
                        }
                    }
                    UplinkOutcome::UnknownDevice(addr) => {
                        warn!("Uplink from unknown device address {:08x}", addr);
                        continue;
                    }
                    UplinkOutcome::Replay { f_cnt, last } => {
                        warn!("Replayed frame counter {} (last accepted {})", f_cnt, last);
                        continue;
                    }
                    UplinkOutcome::Malformed(e) => warn!("Undecodable payload: {}", e),
                }
                if confirmed {
                    downlinks.send(Downlink::Ack { f_cnt }).await;
                }
            }
        }
    }
}
