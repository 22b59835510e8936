//! Hardware abstraction for the tracker board.
//!
//! The firmware logic never touches peripherals directly. Each peripheral
//! role is a trait, a [`Board`] names the concrete type for every role, and a
//! [`HardwareContext`] owns one instance of each. The context is built once at
//! startup and its parts are moved into the components that use them, so there
//! are no global peripheral handles.
//!
//! - `mock`: scripted test doubles recording into a shared journal (tests only)
//!
//! The simulated board used by the binary lives in `crate::sim`.

#![allow(async_fn_in_trait)]

#[cfg(test)]
pub mod mock;

use embassy_time::Duration;

use crate::error::{HalError, StackError};
use crate::node::radio::DeviceIdentity;

/// 24-bit RGB colour for the status LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u32);

impl Rgb {
    pub const OFF: Rgb = Rgb(0x000000);
    pub const RED: Rgb = Rgb(0xff0000);
    pub const GREEN: Rgb = Rgb(0x00ff00);
    pub const BLUE: Rgb = Rgb(0x0000ff);
    pub const PINK: Rgb = Rgb(0xff69b4);
}

/// GPIO line authorised to wake the device from deep sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WakePin(pub u8);

/// Why the MCU started executing (after power-up or after a deep-sleep reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    PowerOn,
    DeepSleep(WakeCause),
}

/// Raw wake source reported by the power domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    Timer,
    Pin(WakePin),
}

/// Parameters of a single uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkOptions {
    pub confirmed: bool,
    pub data_rate: u8,
}

/// Byte-oriented serial link (receiver UART, co-processor UART).
pub trait SerialPort {
    /// Copy whatever is already buffered into `buf` without waiting.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, HalError>;

    fn write_all(&mut self, data: &[u8]) -> Result<(), HalError>;
}

/// Cooperative wait. The only way the firmware yields time outside deep sleep.
pub trait Delay {
    async fn delay(&mut self, duration: Duration);
}

pub trait StatusLed {
    fn set(&mut self, color: Rgb);
}

pub trait BatterySensor {
    fn read_raw(&mut self) -> Result<u16, HalError>;
}

/// Retention memory surviving deep sleep. Holds exactly one record.
pub trait RetentionStore {
    fn load(&mut self) -> Result<Option<Vec<u8>>, HalError>;

    /// Returns only once the record is durable.
    fn commit(&mut self, record: &[u8]) -> Result<(), HalError>;
}

/// LoRaWAN stack. MAC internals (channel plan, ADR, hopping) are its business.
pub trait LoraStack {
    /// Start an OTAA join. Does not wait for the join accept.
    fn request_join(&mut self, identity: &DeviceIdentity, data_rate: u8) -> Result<(), StackError>;

    fn has_joined(&mut self) -> bool;

    /// Send one uplink and wait until the stack reports it sent (and acknowledged, if confirmed).
    async fn send(&mut self, payload: &[u8], options: UplinkOptions) -> Result<usize, StackError>;

    /// Opaque session state (keys, counters) in the stack's own format.
    fn export_session(&mut self) -> Vec<u8>;

    fn import_session(&mut self, state: &[u8]) -> Result<(), StackError>;
}

/// Clock and sleep control.
pub trait PowerControl {
    fn reset_cause(&mut self) -> ResetCause;

    fn arm_timer(&mut self, after: Duration);

    /// Arm edge-triggered wake on every listed line.
    fn arm_wake_pins(&mut self, pins: &[WakePin]);

    /// Enter the lowest-power state until an armed source fires.
    ///
    /// On silicon that resets on wake this never returns and execution restarts
    /// with `reset_cause() == DeepSleep(..)`; boards that resume in place return the cause.
    async fn deep_sleep(&mut self) -> WakeCause;
}

/// Concrete peripheral types of one board.
pub trait Board {
    type Gnss: SerialPort;
    type Peer: SerialPort;
    type Radio: LoraStack;
    type Retention: RetentionStore;
    type Led: StatusLed;
    type Battery: BatterySensor;
    type Power: PowerControl;
    type Delay: Delay + Clone;
}

/// Every peripheral of the board, owned in one place.
pub struct HardwareContext<B: Board> {
    pub gnss: B::Gnss,
    pub peer: B::Peer,
    pub radio: B::Radio,
    pub retention: B::Retention,
    pub led: B::Led,
    pub battery: B::Battery,
    pub power: B::Power,
    pub delay: B::Delay,
}
