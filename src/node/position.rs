//! Position acquisition from the satellite receiver.
//!
//! The receiver streams NMEA 0183 sentences over its UART. Each read takes
//! whatever is buffered, splits it into `$`-delimited frames and looks for a
//! GGA (fix data) sentence with a non-empty latitude. Coordinates arrive as
//! `DDMM.MMMMM` / `DDDMM.MMMMM` and are converted to decimal degrees.
//!
//! Retries are an explicit bounded loop; the budget is a counter, not stack depth.

use embassy_time::Duration;
use log::{debug, info, warn};
use nmea0183::{ParseResult, Parser};
use serde::Deserialize;

use crate::error::FixUnavailable;
use crate::hal::{Delay, SerialPort};

/// Receiver FIFO is drained into a buffer of this size per read.
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// Decoded default sentence of the receiver (`5610.06764,N,01011.43309,E`).
pub const DEFAULT_FALLBACK_LATITUDE: f64 = 56.0 + 10.06764 / 60.0;
pub const DEFAULT_FALLBACK_LONGITUDE: f64 = 10.0 + 11.43309 / 60.0;

/// One resolved (or sentinel) position, consumed once per cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub valid: bool,
    /// Retries spent before this fix was produced.
    pub staleness: u32,
}

/// How long to wait before re-reading the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RetryDelay {
    /// Same wait before every retry.
    Fixed { millis: u64 },
    /// Wait `remaining attempts * unit`, spending more time early while the receiver warms up.
    #[serde(rename_all = "kebab-case")]
    RemainingBudget { unit_millis: u64 },
}

impl Default for RetryDelay {
    fn default() -> Self {
        RetryDelay::Fixed { millis: 1000 }
    }
}

impl RetryDelay {
    pub fn delay_for(&self, remaining: u32) -> Duration {
        match *self {
            RetryDelay::Fixed { millis } => Duration::from_millis(millis),
            RetryDelay::RemainingBudget { unit_millis } => Duration::from_millis(unit_millis.saturating_mul(remaining as u64)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionSourceConfig {
    pub retry_delay: RetryDelay,
    pub fallback_latitude: f64,
    pub fallback_longitude: f64,
    pub read_buffer: usize,
}

impl Default for PositionSourceConfig {
    fn default() -> Self {
        Self {
            retry_delay: RetryDelay::default(),
            fallback_latitude: DEFAULT_FALLBACK_LATITUDE,
            fallback_longitude: DEFAULT_FALLBACK_LONGITUDE,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

pub struct PositionSource<S: SerialPort, D: Delay> {
    uart: S,
    delay: D,
    config: PositionSourceConfig,
    buffer: Vec<u8>,
}

impl<S: SerialPort, D: Delay> PositionSource<S, D> {
    pub fn new(uart: S, delay: D, config: PositionSourceConfig) -> Self {
        let buffer = vec![0u8; config.read_buffer.max(1)];
        Self {
            uart,
            delay,
            config,
            buffer,
        }
    }

    /// Read the receiver until a fix is found or `max_attempts` retries are spent.
    ///
    /// A complete miss performs `max_attempts + 1` reads separated by
    /// `max_attempts` retry delays and yields the fallback sentinel
    /// (`valid == false`). Never fails.
    pub async fn acquire_fix(&mut self, max_attempts: u32) -> PositionFix {
        let mut remaining = max_attempts;
        loop {
            if let Some((latitude, longitude)) = self.read_fix() {
                let fix = PositionFix {
                    latitude,
                    longitude,
                    valid: true,
                    staleness: max_attempts - remaining,
                };
                info!("Fix acquired: {:.6}, {:.6} after {} retries", latitude, longitude, fix.staleness);
                return fix;
            }
            if remaining == 0 {
                break;
            }
            let wait = self.config.retry_delay.delay_for(remaining);
            remaining -= 1;
            debug!("No fix yet, retrying in {} ms ({} retries left)", wait.as_millis(), remaining);
            self.delay.delay(wait).await;
        }

        warn!("{}, reporting fallback position", FixUnavailable { attempts: max_attempts + 1 });
        PositionFix {
            latitude: self.config.fallback_latitude,
            longitude: self.config.fallback_longitude,
            valid: false,
            staleness: max_attempts,
        }
    }

    fn read_fix(&mut self) -> Option<(f64, f64)> {
        let n = match self.uart.read_available(&mut self.buffer) {
            Ok(n) => n,
            Err(e) => {
                warn!("Receiver read failed: {}", e);
                return None;
            }
        };
        if n == 0 {
            debug!("Receiver buffer empty");
            return None;
        }
        let text = String::from_utf8_lossy(&self.buffer[..n]);
        let fix = parse_latest_fix(&text);
        if fix.is_none() {
            debug!("No usable fix sentence in {} bytes", n);
        }
        fix
    }
}

/// Scan a receiver dump for fix sentences; the last valid one wins.
pub fn parse_latest_fix(buffer: &str) -> Option<(f64, f64)> {
    buffer.split('$').filter_map(parse_gga).last()
}

/// Decode one frame (the text after `$`) if it is a GGA sentence carrying a position.
///
/// A frame with a checksum must pass the NMEA parser (checksum, talker,
/// sentence structure); receivers that omit the checksum are taken as-is.
/// Coordinates are always converted from the raw fields.
fn parse_gga(frame: &str) -> Option<(f64, f64)> {
    let frame = frame.trim_end();
    let body = match frame.split_once('*') {
        Some((body, _)) => {
            if !is_valid_gga_sentence(frame) {
                return None;
            }
            body
        }
        None => frame,
    };

    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 6 || fields[0].len() != 5 || !fields[0].ends_with("GGA") {
        return None;
    }
    if fields[2].is_empty() {
        return None;
    }

    let mut latitude = decode_coordinate(fields[2], 2)?;
    let mut longitude = decode_coordinate(fields[4], 3)?;
    if fields[3] == "S" {
        latitude = -latitude;
    }
    if fields[5] == "W" {
        longitude = -longitude;
    }
    Some((latitude, longitude))
}

/// `degree_digits` leading characters are whole degrees, the rest decimal minutes.
fn decode_coordinate(field: &str, degree_digits: usize) -> Option<f64> {
    if field.len() <= degree_digits || !field.is_ascii() {
        return None;
    }
    let degrees: f64 = field[..degree_digits].parse().ok()?;
    let minutes: f64 = field[degree_digits..].parse().ok()?;
    Some(degrees + minutes / 60.0)
}

/// Run a checksummed frame through the NMEA parser.
fn is_valid_gga_sentence(frame: &str) -> bool {
    let mut parser = Parser::new();
    let mut valid = false;
    for &byte in b"$".iter().chain(frame.as_bytes()).chain(b"\r\n") {
        if let Some(result) = parser.parse_from_byte(byte) {
            valid = matches!(result, Ok(ParseResult::GGA(_)));
        }
    }
    valid
}
