//! Tracker firmware core.
//!
//! Leaf to root:
//! - `position`: NMEA fix acquisition with a bounded retry budget
//! - `telemetry`: 12-byte uplink codec
//! - `airtime`: LoRa time-on-air and the duty-cycle floor
//! - `radio`: join, confirmed uplinks, session persistence
//! - `power`: sleep scheduling, wake arming, status indicator
//! - `wake`: wake-reason classification and the interrupt latch
//! - `controller`: the operating-cycle state machine tying it together

pub mod airtime;
pub mod controller;
pub mod position;
pub mod power;
pub mod radio;
pub mod telemetry;
pub mod wake;

pub use controller::{NodeController, NodeState};
pub use wake::WakeLatch;
