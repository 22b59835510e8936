//! Telemetry uplink payload.
//!
//! Wire format, 12 bytes, no header or checksum (the radio stack provides integrity):
//!
//! ```text
//! offset 0  f32 LE  latitude  (degrees)
//! offset 4  f32 LE  longitude (degrees)
//! offset 8  f32 LE  battery   (scaled ADC reading)
//! ```

use crate::error::CodecError;

use super::position::PositionFix;

pub const TELEMETRY_PACKET_SIZE: usize = 12;

/// One encoded uplink. Deliberately neither `Clone` nor `Copy`: the transmit
/// call that receives it is its only owner.
#[derive(Debug, PartialEq)]
pub struct TelemetryPacket([u8; TELEMETRY_PACKET_SIZE]);

impl TelemetryPacket {
    pub fn as_bytes(&self) -> &[u8; TELEMETRY_PACKET_SIZE] {
        &self.0
    }

    #[cfg(test)]
    pub fn into_bytes(self) -> [u8; TELEMETRY_PACKET_SIZE] {
        self.0
    }
}

pub fn encode(fix: &PositionFix, battery: f32) -> TelemetryPacket {
    let mut buf = [0u8; TELEMETRY_PACKET_SIZE];
    buf[0..4].copy_from_slice(&(fix.latitude as f32).to_le_bytes());
    buf[4..8].copy_from_slice(&(fix.longitude as f32).to_le_bytes());
    buf[8..12].copy_from_slice(&battery.to_le_bytes());
    TelemetryPacket(buf)
}

/// Inverse of [`encode`]; returns `(latitude, longitude, battery)`.
pub fn decode(bytes: &[u8]) -> Result<(f32, f32, f32), CodecError> {
    if bytes.len() != TELEMETRY_PACKET_SIZE {
        return Err(CodecError::Length {
            expected: TELEMETRY_PACKET_SIZE,
            actual: bytes.len(),
        });
    }
    let field = |offset: usize| f32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]);
    Ok((field(0), field(4), field(8)))
}
