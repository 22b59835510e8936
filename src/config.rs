//! Node configuration loaded from a TOML file.
//!
//! Every section except `[device]` has defaults, so a minimal file only
//! carries the OTAA credentials.

use anyhow::Context;
use embassy_time::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::hal::WakePin;
use crate::node::airtime::{DutyCycleBudget, LoraParameters};
use crate::node::controller::ControllerConfig;
use crate::node::position::{DEFAULT_FALLBACK_LATITUDE, DEFAULT_FALLBACK_LONGITUDE, DEFAULT_READ_BUFFER, PositionSourceConfig, RetryDelay};
use crate::node::radio::{DeviceIdentity, RadioLinkConfig};
use crate::node::telemetry::TELEMETRY_PACKET_SIZE;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub position: PositionConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceConfig {
    /// 8-byte device EUI as 16 hex digits.
    pub dev_eui: String,
    /// 16-byte application key as 32 hex digits.
    pub app_key: String,
    /// GPIO lines allowed to wake the node (the co-processor's alert line).
    #[serde(default = "default_wake_pins")]
    pub wake_pins: Vec<u8>,
}

fn default_wake_pins() -> Vec<u8> {
    vec![13]
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            dev_eui: "0000000000000000".to_string(),
            app_key: "00000000000000000000000000000000".to_string(),
            wake_pins: default_wake_pins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RadioConfig {
    /// EU868 data rate index for join and uplinks. DR0 (SF12) is the most robust.
    pub data_rate: u8,
    /// Regulatory channel occupancy limit in percent.
    pub duty_cycle_percent: f32,
    pub join_poll_interval_ms: u64,
    /// Explicit modulation parameters; derived from `data-rate` when absent.
    pub lora: Option<LoraParameters>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            data_rate: 0,
            duty_cycle_percent: 1.0,
            join_poll_interval_ms: 2000,
            lora: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScheduleConfig {
    /// Sleep after a scheduled (timer) cycle.
    pub cycle_interval_secs: u64,
    /// Sleep after an emergency (interrupt) cycle.
    pub emergency_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 3600,
            emergency_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PositionConfig {
    /// Retries before the fallback position is reported.
    pub max_attempts: u32,
    pub retry_delay: RetryDelay,
    pub fallback_latitude: f64,
    pub fallback_longitude: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: RetryDelay::default(),
            fallback_latitude: DEFAULT_FALLBACK_LATITUDE,
            fallback_longitude: DEFAULT_FALLBACK_LONGITUDE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BatteryConfig {
    /// Multiplier applied to the raw ADC count before it is reported.
    pub scale: f32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

/// Parameters of the simulated board used by the host binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SimulationConfig {
    /// Virtual seconds per real second for every delay and sleep.
    pub time_scale: f64,
    /// File standing in for retention memory; survives process restarts.
    pub retention_path: PathBuf,
    pub seed: u64,
    /// Stop after this many completed cycles; run forever when absent.
    pub cycles: Option<u32>,
    pub base_latitude: f64,
    pub base_longitude: f64,
    /// Standard deviation of the simulated position noise in metres.
    pub position_jitter_m: f64,
    /// Chance that a receiver read contains no fix.
    pub no_fix_probability: f64,
    /// Chance that a confirmed uplink is not acknowledged.
    pub uplink_loss_probability: f64,
    /// Upper bound of negative join polls before the network accepts.
    pub max_join_polls: u32,
    /// Mean time between co-processor alerts; alerts are disabled when absent.
    pub emergency_mean_interval_secs: Option<f64>,
    pub battery_raw: u16,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            time_scale: 60.0,
            retention_path: PathBuf::from("node-retention.bin"),
            seed: 1,
            cycles: None,
            base_latitude: 56.1572,
            base_longitude: 10.2107,
            position_jitter_m: 15.0,
            no_fix_probability: 0.2,
            uplink_loss_probability: 0.1,
            max_join_polls: 4,
            emergency_mean_interval_secs: Some(7200.0),
            battery_raw: 3900,
        }
    }
}

impl NodeConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path).with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: NodeConfig = toml::from_str(content).context("Failed to parse config file")?;
        config.validate().map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        Ok(config)
    }

    /// Reject values that would make the node misbehave at runtime.
    pub fn validate(&self) -> Result<(), String> {
        const MAX_ATTEMPTS: u32 = 1000;
        const MAX_INTERVAL_SECS: u64 = 30 * 24 * 3600;
        const MAX_DELAY_MS: u64 = 3_600_000;

        self.identity()?;
        if self.device.wake_pins.is_empty() {
            return Err("At least one wake pin is required".to_string());
        }

        if self.radio.data_rate > 5 {
            return Err(format!("Invalid data-rate {}, must be 0-5", self.radio.data_rate));
        }
        if !(self.radio.duty_cycle_percent > 0.0 && self.radio.duty_cycle_percent <= 100.0) {
            return Err(format!("Invalid duty-cycle-percent {}, must be in (0, 100]", self.radio.duty_cycle_percent));
        }
        if self.radio.join_poll_interval_ms == 0 || self.radio.join_poll_interval_ms > MAX_DELAY_MS {
            return Err(format!(
                "Invalid join-poll-interval-ms {}, must be 1-{}",
                self.radio.join_poll_interval_ms, MAX_DELAY_MS
            ));
        }
        if let Some(lora) = &self.radio.lora {
            if lora.spreading_factor < 7 || lora.spreading_factor > 12 {
                return Err(format!("Invalid spreading-factor {}, must be 7-12", lora.spreading_factor));
            }
            if lora.bandwidth == 0 {
                return Err("Invalid bandwidth, must be positive".to_string());
            }
            if lora.coding_rate < 1 || lora.coding_rate > 4 {
                return Err(format!("Invalid coding-rate {}, must be 1-4 (representing 4/5 to 4/8)", lora.coding_rate));
            }
            if lora.preamble_symbols < 0.0 {
                return Err("Invalid preamble-symbols, must be non-negative".to_string());
            }
        }

        for (name, secs) in [
            ("cycle-interval-secs", self.schedule.cycle_interval_secs),
            ("emergency-interval-secs", self.schedule.emergency_interval_secs),
        ] {
            if secs == 0 || secs > MAX_INTERVAL_SECS {
                return Err(format!("Invalid {} {}, must be 1-{}", name, secs, MAX_INTERVAL_SECS));
            }
        }

        if self.position.max_attempts > MAX_ATTEMPTS {
            return Err(format!("max-attempts {} exceeds maximum of {}", self.position.max_attempts, MAX_ATTEMPTS));
        }
        let delay_ms = match self.position.retry_delay {
            RetryDelay::Fixed { millis } => millis,
            RetryDelay::RemainingBudget { unit_millis } => unit_millis,
        };
        if delay_ms > MAX_DELAY_MS {
            return Err(format!("retry-delay {} ms exceeds maximum of {}", delay_ms, MAX_DELAY_MS));
        }
        if !(-90.0..=90.0).contains(&self.position.fallback_latitude) || !(-180.0..=180.0).contains(&self.position.fallback_longitude) {
            return Err("Fallback position outside valid coordinate range".to_string());
        }

        if !(self.simulation.time_scale > 0.0) {
            return Err(format!("Invalid time-scale {}, must be positive", self.simulation.time_scale));
        }
        for (name, p) in [
            ("no-fix-probability", self.simulation.no_fix_probability),
            ("uplink-loss-probability", self.simulation.uplink_loss_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("Invalid {} {}, must be in [0, 1]", name, p));
            }
        }
        if let Some(mean) = self.simulation.emergency_mean_interval_secs {
            if !(mean > 0.0) {
                return Err(format!("Invalid emergency-mean-interval-secs {}, must be positive", mean));
            }
        }

        Ok(())
    }

    pub fn identity(&self) -> Result<DeviceIdentity, String> {
        Ok(DeviceIdentity {
            dev_eui: parse_hex("dev-eui", &self.device.dev_eui)?,
            app_key: parse_hex("app-key", &self.device.app_key)?,
        })
    }

    pub fn lora_parameters(&self) -> LoraParameters {
        self.radio
            .lora
            .clone()
            .unwrap_or_else(|| LoraParameters::for_eu868_data_rate(self.radio.data_rate))
    }

    pub fn duty_cycle_budget(&self) -> DutyCycleBudget {
        DutyCycleBudget::new(&self.lora_parameters(), TELEMETRY_PACKET_SIZE, self.radio.duty_cycle_percent)
    }

    pub fn wake_pins(&self) -> Vec<WakePin> {
        self.device.wake_pins.iter().copied().map(WakePin).collect()
    }

    pub fn position_source_config(&self) -> PositionSourceConfig {
        PositionSourceConfig {
            retry_delay: self.position.retry_delay,
            fallback_latitude: self.position.fallback_latitude,
            fallback_longitude: self.position.fallback_longitude,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }

    pub fn radio_link_config(&self) -> RadioLinkConfig {
        RadioLinkConfig {
            data_rate: self.radio.data_rate,
            join_poll_interval: Duration::from_millis(self.radio.join_poll_interval_ms),
        }
    }

    pub fn controller_config(&self) -> Result<ControllerConfig, String> {
        Ok(ControllerConfig {
            identity: self.identity()?,
            max_fix_attempts: self.position.max_attempts,
            cycle_interval: Duration::from_secs(self.schedule.cycle_interval_secs),
            emergency_interval: Duration::from_secs(self.schedule.emergency_interval_secs),
            join_retry_interval: Duration::from_millis(self.radio.join_poll_interval_ms),
            battery_scale: self.battery.scale,
        })
    }
}

fn parse_hex<const N: usize>(field: &str, value: &str) -> Result<[u8; N], String> {
    let value = value.trim();
    if value.len() != N * 2 || !value.is_ascii() {
        return Err(format!("Invalid {}: expected {} hex digits, got {:?}", field, N * 2, value));
    }
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&value[i * 2..i * 2 + 2], 16).map_err(|_| format!("Invalid {}: {:?} is not hex", field, value))?;
    }
    Ok(out)
}
