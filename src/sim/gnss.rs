//! Simulated satellite receiver.
//!
//! Every read returns one burst of NMEA output: a satellites-in-view
//! sentence followed by a GGA sentence. The GGA either carries the asset's
//! position plus Gaussian noise or, with `no_fix_probability`, empty position
//! fields as a receiver without a fix reports them.

use chrono::{Timelike, Utc};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::config::SimulationConfig;
use crate::error::HalError;
use crate::hal::SerialPort;

const METRES_PER_DEGREE: f64 = 111_320.0;

pub struct SimGnss {
    rng: StdRng,
    base_latitude: f64,
    base_longitude: f64,
    noise: Option<Normal<f64>>,
    no_fix_probability: f64,
}

impl SimGnss {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            base_latitude: config.base_latitude,
            base_longitude: config.base_longitude,
            // A zero deviation means "no noise".
            noise: Normal::new(0.0, config.position_jitter_m).ok().filter(|_| config.position_jitter_m > 0.0),
            no_fix_probability: config.no_fix_probability,
        }
    }

    fn next_burst(&mut self) -> String {
        let now = Utc::now();
        let time = format!("{:02}{:02}{:02}.00", now.hour(), now.minute(), now.second());
        let satellites = self.rng.gen_range(4..12u8);

        let gga = if self.rng.gen_bool(self.no_fix_probability) {
            format!("GPGGA,{},,,,,0,00,99.99,,,,,,", time)
        } else {
            let (north, east) = match &self.noise {
                Some(noise) => (noise.sample(&mut self.rng), noise.sample(&mut self.rng)),
                None => (0.0, 0.0),
            };
            let latitude = self.base_latitude + north / METRES_PER_DEGREE;
            let longitude = self.base_longitude + east / (METRES_PER_DEGREE * self.base_latitude.to_radians().cos());
            format!(
                "GPGGA,{},{},1,{:02},1.01,10.0,M,40.0,M,,",
                time,
                format_coordinates(latitude, longitude),
                satellites
            )
        };
        let gsv = format!("GPGSV,1,1,{:02}", satellites);
        format!("{}{}", frame(&gsv), frame(&gga))
    }
}

impl SerialPort for SimGnss {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, HalError> {
        let burst = self.next_burst();
        let n = burst.len().min(buf.len());
        buf[..n].copy_from_slice(&burst.as_bytes()[..n]);
        debug!("Receiver delivered {} bytes", n);
        Ok(n)
    }

    fn write_all(&mut self, _data: &[u8]) -> Result<(), HalError> {
        Ok(())
    }
}

/// XOR of every byte between `$` and `*`.
pub fn nmea_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

fn frame(body: &str) -> String {
    format!("${}*{:02X}\r\n", body, nmea_checksum(body))
}

/// `DDMM.MMMMM,N,DDDMM.MMMMM,E` for a signed decimal position.
pub fn format_coordinates(latitude: f64, longitude: f64) -> String {
    let (lat_deg, lat_min) = split_degrees(latitude.abs());
    let (lon_deg, lon_min) = split_degrees(longitude.abs());
    format!(
        "{:02}{:08.5},{},{:03}{:08.5},{}",
        lat_deg,
        lat_min,
        if latitude < 0.0 { 'S' } else { 'N' },
        lon_deg,
        lon_min,
        if longitude < 0.0 { 'W' } else { 'E' }
    )
}

fn split_degrees(value: f64) -> (u32, f64) {
    let degrees = value.trunc();
    (degrees as u32, (value - degrees) * 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::position::parse_latest_fix;

    fn config(no_fix_probability: f64, jitter: f64) -> SimulationConfig {
        SimulationConfig {
            no_fix_probability,
            position_jitter_m: jitter,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn formatted_coordinates_parse_back() {
        let text = format!("$GPGGA,000000.00,{},1,08,1.0,1.0,M,0.0,M,,\r\n", format_coordinates(-33.8688, -151.2093));
        let (lat, lon) = parse_latest_fix(&text).unwrap();
        assert!((lat + 33.8688).abs() < 1e-6);
        assert!((lon + 151.2093).abs() < 1e-6);
    }

    #[test]
    fn noiseless_receiver_reports_base_position() {
        let config = config(0.0, 0.0);
        let mut gnss = SimGnss::new(&config);
        let mut buf = [0u8; 256];
        let n = gnss.read_available(&mut buf).unwrap();
        let (lat, lon) = parse_latest_fix(std::str::from_utf8(&buf[..n]).unwrap()).unwrap();
        assert!((lat - config.base_latitude).abs() < 1e-6);
        assert!((lon - config.base_longitude).abs() < 1e-6);
    }

    #[test]
    fn noisy_position_stays_near_base() {
        let config = config(0.0, 15.0);
        let mut gnss = SimGnss::new(&config);
        let mut buf = [0u8; 256];
        for _ in 0..20 {
            let n = gnss.read_available(&mut buf).unwrap();
            let (lat, lon) = parse_latest_fix(std::str::from_utf8(&buf[..n]).unwrap()).unwrap();
            assert!((lat - config.base_latitude).abs() < 0.01);
            assert!((lon - config.base_longitude).abs() < 0.01);
        }
    }

    #[test]
    fn receiver_without_fix_yields_nothing() {
        let mut gnss = SimGnss::new(&config(1.0, 15.0));
        let mut buf = [0u8; 256];
        let n = gnss.read_available(&mut buf).unwrap();
        assert!(n > 0);
        assert_eq!(parse_latest_fix(std::str::from_utf8(&buf[..n]).unwrap()), None);
    }
}
