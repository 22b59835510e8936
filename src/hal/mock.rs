//! Scripted mock board for unit tests.
//!
//! Every mock records what the firmware did to it into one shared
//! [`Journal`], so tests can assert on ordering across peripherals (for
//! example that the session commit precedes arming the wake timer).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embassy_time::Duration;

use super::{
    BatterySensor, Board, Delay, HardwareContext, LoraStack, PowerControl, ResetCause, RetentionStore, Rgb, SerialPort, StatusLed,
    UplinkOptions, WakeCause, WakePin,
};
use crate::error::{HalError, StackError};
use crate::node::radio::DeviceIdentity;

/// One observable hardware interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum HwEvent {
    GnssRead(usize),
    PeerWrite(Vec<u8>),
    Delay(Duration),
    Led(Rgb),
    BatteryRead,
    RetentionLoad,
    RetentionCommit(Vec<u8>),
    JoinRequest { data_rate: u8 },
    JoinPoll(bool),
    Uplink { payload: Vec<u8>, options: UplinkOptions },
    ArmTimer(Duration),
    ArmPins(Vec<WakePin>),
    DeepSleep,
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<HwEvent>>>);

impl Journal {
    fn record(&self, event: HwEvent) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<HwEvent> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn count(&self, pred: impl Fn(&HwEvent) -> bool) -> usize {
        self.0.borrow().iter().filter(|e| pred(e)).count()
    }

    /// Index of the last event matching `pred`.
    pub fn last_index(&self, pred: impl Fn(&HwEvent) -> bool) -> Option<usize> {
        self.0.borrow().iter().rposition(|e| pred(e))
    }

    pub fn first_index(&self, pred: impl Fn(&HwEvent) -> bool) -> Option<usize> {
        self.0.borrow().iter().position(|e| pred(e))
    }

    pub fn uplinks(&self) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                HwEvent::Uplink { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                HwEvent::Delay(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    pub fn leds(&self) -> Vec<Rgb> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                HwEvent::Led(c) => Some(*c),
                _ => None,
            })
            .collect()
    }
}

/// Receiver UART replaying scripted reads, then `repeat` forever.
pub struct MockGnss {
    journal: Journal,
    pub reads: VecDeque<Vec<u8>>,
    pub repeat: Vec<u8>,
}

impl MockGnss {
    pub fn push_read(&mut self, data: &str) {
        self.reads.push_back(data.as_bytes().to_vec());
    }

    pub fn repeat(&mut self, data: &str) {
        self.repeat = data.as_bytes().to_vec();
    }
}

impl SerialPort for MockGnss {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, HalError> {
        let data = self.reads.pop_front().unwrap_or_else(|| self.repeat.clone());
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.journal.record(HwEvent::GnssRead(n));
        Ok(n)
    }

    fn write_all(&mut self, _data: &[u8]) -> Result<(), HalError> {
        Ok(())
    }
}

pub struct MockPeer {
    journal: Journal,
    pub fail_writes: bool,
}

impl SerialPort for MockPeer {
    fn read_available(&mut self, _buf: &mut [u8]) -> Result<usize, HalError> {
        Ok(0)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), HalError> {
        if self.fail_writes {
            return Err(HalError::Busy);
        }
        self.journal.record(HwEvent::PeerWrite(data.to_vec()));
        Ok(())
    }
}

const MOCK_SESSION_TAG: u8 = 0xA5;

/// LoRaWAN stack that accepts a join after `unjoined_polls` negative polls.
pub struct MockRadio {
    journal: Journal,
    pub unjoined_polls: u32,
    pub join_request_results: VecDeque<Result<(), StackError>>,
    pub send_results: VecDeque<Result<usize, StackError>>,
    pub reject_import: bool,
    join_requested: bool,
    joined: bool,
    f_cnt: u32,
}

impl MockRadio {
    /// Session blob in the format this mock exports.
    pub fn session_blob(f_cnt: u32) -> Vec<u8> {
        let mut blob = vec![MOCK_SESSION_TAG];
        blob.extend_from_slice(&f_cnt.to_le_bytes());
        blob
    }
}

impl LoraStack for MockRadio {
    fn request_join(&mut self, _identity: &DeviceIdentity, data_rate: u8) -> Result<(), StackError> {
        self.journal.record(HwEvent::JoinRequest { data_rate });
        let result = self.join_request_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.join_requested = true;
        }
        result
    }

    fn has_joined(&mut self) -> bool {
        if !self.joined && self.join_requested {
            if self.unjoined_polls > 0 {
                self.unjoined_polls -= 1;
            } else {
                self.joined = true;
                self.f_cnt = 0;
            }
        }
        self.journal.record(HwEvent::JoinPoll(self.joined));
        self.joined
    }

    async fn send(&mut self, payload: &[u8], options: UplinkOptions) -> Result<usize, StackError> {
        self.journal.record(HwEvent::Uplink {
            payload: payload.to_vec(),
            options,
        });
        let result = self.send_results.pop_front().unwrap_or(Ok(payload.len()));
        self.f_cnt += 1;
        result
    }

    fn export_session(&mut self) -> Vec<u8> {
        Self::session_blob(self.f_cnt)
    }

    fn import_session(&mut self, state: &[u8]) -> Result<(), StackError> {
        if self.reject_import || state.len() != 5 || state[0] != MOCK_SESSION_TAG {
            return Err(StackError::InvalidSession);
        }
        self.f_cnt = u32::from_le_bytes([state[1], state[2], state[3], state[4]]);
        self.joined = true;
        Ok(())
    }
}

/// Retention memory shared between "boots" so a test can simulate power loss
/// by building a second controller on the same store.
#[derive(Clone)]
pub struct MockRetention {
    journal: Journal,
    pub cell: Rc<RefCell<Option<Vec<u8>>>>,
}

impl MockRetention {
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.cell.borrow().clone()
    }

    pub fn overwrite(&self, record: Option<Vec<u8>>) {
        *self.cell.borrow_mut() = record;
    }
}

impl RetentionStore for MockRetention {
    fn load(&mut self) -> Result<Option<Vec<u8>>, HalError> {
        self.journal.record(HwEvent::RetentionLoad);
        Ok(self.cell.borrow().clone())
    }

    fn commit(&mut self, record: &[u8]) -> Result<(), HalError> {
        self.journal.record(HwEvent::RetentionCommit(record.to_vec()));
        *self.cell.borrow_mut() = Some(record.to_vec());
        Ok(())
    }
}

pub struct MockLed {
    journal: Journal,
}

impl StatusLed for MockLed {
    fn set(&mut self, color: Rgb) {
        self.journal.record(HwEvent::Led(color));
    }
}

pub struct MockBattery {
    journal: Journal,
    pub raw: u16,
}

impl BatterySensor for MockBattery {
    fn read_raw(&mut self) -> Result<u16, HalError> {
        self.journal.record(HwEvent::BatteryRead);
        Ok(self.raw)
    }
}

pub struct MockPower {
    journal: Journal,
    pub reset_cause: ResetCause,
    pub wakes: VecDeque<WakeCause>,
}

impl PowerControl for MockPower {
    fn reset_cause(&mut self) -> ResetCause {
        self.reset_cause
    }

    fn arm_timer(&mut self, after: Duration) {
        self.journal.record(HwEvent::ArmTimer(after));
    }

    fn arm_wake_pins(&mut self, pins: &[WakePin]) {
        self.journal.record(HwEvent::ArmPins(pins.to_vec()));
    }

    async fn deep_sleep(&mut self) -> WakeCause {
        self.journal.record(HwEvent::DeepSleep);
        self.wakes.pop_front().unwrap_or(WakeCause::Timer)
    }
}

#[derive(Clone)]
pub struct MockDelay {
    journal: Journal,
}

impl Delay for MockDelay {
    async fn delay(&mut self, duration: Duration) {
        self.journal.record(HwEvent::Delay(duration));
    }
}

pub struct MockBoard;

impl Board for MockBoard {
    type Gnss = MockGnss;
    type Peer = MockPeer;
    type Radio = MockRadio;
    type Retention = MockRetention;
    type Led = MockLed;
    type Battery = MockBattery;
    type Power = MockPower;
    type Delay = MockDelay;
}

/// All mocks of one board, configurable before they are handed to the firmware.
pub struct MockHardware {
    pub journal: Journal,
    pub gnss: MockGnss,
    pub peer: MockPeer,
    pub radio: MockRadio,
    pub retention: MockRetention,
    pub led: MockLed,
    pub battery: MockBattery,
    pub power: MockPower,
    pub delay: MockDelay,
}

impl MockHardware {
    pub fn new() -> Self {
        Self::with_retention(Rc::new(RefCell::new(None)))
    }

    /// Board whose retention memory is `cell`, as after a power cycle.
    pub fn with_retention(cell: Rc<RefCell<Option<Vec<u8>>>>) -> Self {
        let journal = Journal::default();
        Self {
            gnss: MockGnss {
                journal: journal.clone(),
                reads: VecDeque::new(),
                repeat: Vec::new(),
            },
            peer: MockPeer {
                journal: journal.clone(),
                fail_writes: false,
            },
            radio: MockRadio {
                journal: journal.clone(),
                unjoined_polls: 0,
                join_request_results: VecDeque::new(),
                send_results: VecDeque::new(),
                reject_import: false,
                join_requested: false,
                joined: false,
                f_cnt: 0,
            },
            retention: MockRetention {
                journal: journal.clone(),
                cell,
            },
            led: MockLed { journal: journal.clone() },
            battery: MockBattery {
                journal: journal.clone(),
                raw: 4095,
            },
            power: MockPower {
                journal: journal.clone(),
                reset_cause: ResetCause::PowerOn,
                wakes: VecDeque::new(),
            },
            delay: MockDelay { journal: journal.clone() },
            journal,
        }
    }

    pub fn into_context(self) -> (HardwareContext<MockBoard>, Journal, MockRetention) {
        let retention = self.retention.clone();
        let context = HardwareContext {
            gnss: self.gnss,
            peer: self.peer,
            radio: self.radio,
            retention: self.retention,
            led: self.led,
            battery: self.battery,
            power: self.power,
            delay: self.delay,
        };
        (context, self.journal, retention)
    }
}
