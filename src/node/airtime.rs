//! LoRa time-on-air and the regulatory duty-cycle budget.
//!
//! Units:
//! - Time: seconds (f32) inside the formulas, embassy `Duration` at the API
//! - Payload: bytes of PHY payload (application payload plus LoRaWAN framing)

use embassy_time::Duration;
use serde::Deserialize;

/// LoRaWAN framing around the application payload: MHDR 1, FHDR 7, FPort 1, MIC 4.
pub const LORAWAN_OVERHEAD: usize = 13;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct LoraParameters {
    pub bandwidth: u32,
    pub spreading_factor: u8,
    // 1..=4 representing 4/5..4/8
    pub coding_rate: u32,
    // Number of preamble symbols (8 for LoRaWAN)
    pub preamble_symbols: f32,
    // Whether a 16-bit CRC is enabled on the payload
    pub crc_enabled: bool,
    // Low Data Rate Optimization (DE) flag; mandated when T_sym >= 16ms
    pub low_data_rate_optimization: bool,
}

impl LoraParameters {
    /// EU868 uplink parameters for a data rate index (DR0 = SF12 ... DR5 = SF7, all 125 kHz).
    pub fn for_eu868_data_rate(data_rate: u8) -> Self {
        let spreading_factor = 12 - data_rate.min(5);
        Self {
            bandwidth: 125_000,
            spreading_factor,
            coding_rate: 1,
            preamble_symbols: 8.0,
            crc_enabled: true,
            low_data_rate_optimization: spreading_factor >= 11,
        }
    }

    /// Symbol time in seconds: T_sym = 2^SF / BW
    pub fn symbol_time(&self) -> f32 {
        2.0_f32.powi(self.spreading_factor as i32) / self.bandwidth as f32
    }
}

pub fn calculate_air_time(lora_parameters: &LoraParameters, payload_size: usize) -> f32 {
    let symbol_time = lora_parameters.symbol_time();

    // Effective preamble duration: (N_preamble + 4.25) * T_sym
    let preamble_time = (lora_parameters.preamble_symbols + 4.25) * symbol_time;

    // N_payload = 8 + max( ceil((8*PL - 4*SF + 28 + 16*CRC - 20*IH) / (4 * (SF - 2*DE))) * (CR + 4), 0 )
    // LoRaWAN uplinks always use explicit header mode (IH = 0).
    let sf = lora_parameters.spreading_factor as f32;
    let pl = payload_size as f32;
    let crc = if lora_parameters.crc_enabled { 1.0 } else { 0.0 };
    let de = if lora_parameters.low_data_rate_optimization { 1.0 } else { 0.0 };
    let ih = 0.0_f32;
    let cr = lora_parameters.coding_rate as f32;

    let denom = 4.0 * (sf - 2.0 * de);
    let numerator = 8.0 * pl - 4.0 * sf + 28.0 + 16.0 * crc - 20.0 * ih;
    let base = (numerator / denom).ceil();
    let payload_symbols = 8.0 + (base.max(0.0)) * (cr + 4.0);

    preamble_time + payload_symbols * symbol_time
}

/// Minimum spacing between transmissions so that channel occupancy stays
/// within the regulatory duty cycle. Derived once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyCycleBudget {
    airtime: Duration,
    duty_cycle: f32,
    floor: Duration,
}

impl DutyCycleBudget {
    /// `duty_cycle_percent` is the allowed channel occupancy, e.g. `1.0` for the EU868 1% sub-band.
    pub fn new(lora_parameters: &LoraParameters, app_payload_size: usize, duty_cycle_percent: f32) -> Self {
        let airtime_s = calculate_air_time(lora_parameters, app_payload_size + LORAWAN_OVERHEAD);
        let duty_cycle = duty_cycle_percent / 100.0;
        let floor_s = airtime_s / duty_cycle;
        Self {
            airtime: Duration::from_micros((airtime_s * 1_000_000.0).ceil() as u64),
            duty_cycle,
            floor: Duration::from_micros((floor_s * 1_000_000.0).ceil() as u64),
        }
    }

    pub fn airtime(&self) -> Duration {
        self.airtime
    }

    pub fn duty_cycle(&self) -> f32 {
        self.duty_cycle
    }

    /// Shortest permitted interval between transmission starts.
    pub fn floor(&self) -> Duration {
        self.floor
    }
}
