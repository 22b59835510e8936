//! Frames and channels shared by the simulated board and the background tasks.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Duration;

use crate::hal::WakePin;

/// Something the node put on the air.
#[derive(Debug, Clone, PartialEq)]
pub enum AirFrame {
    JoinRequest { dev_eui: [u8; 8], dev_nonce: u16 },
    Uplink { dev_addr: u32, f_cnt: u32, confirmed: bool, payload: Vec<u8> },
}

/// Something the network server sent back in a receive window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Downlink {
    JoinAccept { dev_addr: u32 },
    Ack { f_cnt: u32 },
}

/// Small on purpose: the node has at most one frame in flight.
pub const UPLINK_QUEUE_SIZE: usize = 4;
pub type UplinkQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, AirFrame, UPLINK_QUEUE_SIZE>;
pub type UplinkQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, AirFrame, UPLINK_QUEUE_SIZE>;
pub type UplinkQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, AirFrame, UPLINK_QUEUE_SIZE>;

pub const DOWNLINK_QUEUE_SIZE: usize = 4;
pub type DownlinkQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, Downlink, DOWNLINK_QUEUE_SIZE>;
pub type DownlinkQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, Downlink, DOWNLINK_QUEUE_SIZE>;
pub type DownlinkQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, Downlink, DOWNLINK_QUEUE_SIZE>;

/// Bytes written by the node to the co-processor UART.
pub const PEER_QUEUE_SIZE: usize = 4;
pub type PeerQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, Vec<u8>, PEER_QUEUE_SIZE>;
pub type PeerQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, Vec<u8>, PEER_QUEUE_SIZE>;
pub type PeerQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, Vec<u8>, PEER_QUEUE_SIZE>;

/// Edge on a wake line, observed by the simulated power domain.
pub type WakeLine = Signal<CriticalSectionRawMutex, WakePin>;

/// Maps virtual firmware time onto wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimClock {
    time_scale: f64,
}

impl SimClock {
    pub fn new(time_scale: f64) -> Self {
        Self { time_scale }
    }

    /// Wall-clock duration of `virtual_time` at the configured speed-up.
    pub fn real(&self, virtual_time: Duration) -> Duration {
        Duration::from_micros((virtual_time.as_micros() as f64 / self.time_scale) as u64)
    }

    pub fn real_secs(&self, virtual_secs: f64) -> Duration {
        Duration::from_micros((virtual_secs * 1_000_000.0 / self.time_scale).max(0.0) as u64)
    }
}
