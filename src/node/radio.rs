//! Network membership and uplinks over the LoRaWAN stack.
//!
//! The stack's session state (keys, frame counters) is opaque here. It is
//! wrapped in a small checksummed record and kept in retention memory so a
//! wake from deep sleep resumes the session instead of re-joining.
//!
//! ```text
//! offset 0       u32 LE  magic "RSES"
//! offset 4       u8      record version
//! offset 5       u8      joined flag
//! offset 6       u16 LE  blob length
//! offset 8       blob
//! offset 8+len   u32 LE  CRC-32/ISO-HDLC over all preceding bytes
//! ```

use crc::{CRC_32_ISO_HDLC, Crc};
use embassy_time::Duration;
use log::{debug, info, warn};

use crate::error::{JoinFailed, SessionCorrupt, SessionError, TxFailed};
use crate::hal::{Delay, LoraStack, RetentionStore, StatusLed, UplinkOptions};

use super::power::Phase;
use super::telemetry::TelemetryPacket;

const SESSION_MAGIC: u32 = 0x5345_5352; // "RSES" little-endian
const SESSION_VERSION: u8 = 1;
const SESSION_HEADER: usize = 8;
const SESSION_CRC: usize = 4;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// How long the indicator stays lit on every join poll.
const JOIN_BLINK: Duration = Duration::from_millis(100);

/// OTAA credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub dev_eui: [u8; 8],
    pub app_key: [u8; 16],
}

impl DeviceIdentity {
    pub fn dev_eui_hex(&self) -> String {
        self.dev_eui.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Session state as persisted across deep sleep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioSession {
    pub joined: bool,
    pub state: Vec<u8>,
}

impl RadioSession {
    fn unjoined() -> Self {
        Self {
            joined: false,
            state: Vec::new(),
        }
    }

    pub fn to_record(&self) -> Result<Vec<u8>, SessionError> {
        let len = u16::try_from(self.state.len()).map_err(|_| SessionError::TooLarge(self.state.len()))?;
        let mut record = Vec::with_capacity(SESSION_HEADER + self.state.len() + SESSION_CRC);
        record.extend_from_slice(&SESSION_MAGIC.to_le_bytes());
        record.push(SESSION_VERSION);
        record.push(self.joined as u8);
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(&self.state);
        let crc = CRC32.checksum(&record);
        record.extend_from_slice(&crc.to_le_bytes());
        Ok(record)
    }

    pub fn from_record(record: &[u8]) -> Result<Self, SessionCorrupt> {
        if record.len() < SESSION_HEADER + SESSION_CRC {
            return Err(SessionCorrupt::Truncated(record.len()));
        }
        let magic = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        if magic != SESSION_MAGIC {
            return Err(SessionCorrupt::BadMagic(magic));
        }
        if record[4] != SESSION_VERSION {
            return Err(SessionCorrupt::UnsupportedVersion(record[4]));
        }
        let len = u16::from_le_bytes([record[6], record[7]]) as usize;
        let body_end = SESSION_HEADER + len;
        if record.len() != body_end + SESSION_CRC {
            return Err(SessionCorrupt::Truncated(record.len()));
        }
        let stored = u32::from_le_bytes([record[body_end], record[body_end + 1], record[body_end + 2], record[body_end + 3]]);
        let computed = CRC32.checksum(&record[..body_end]);
        if stored != computed {
            return Err(SessionCorrupt::ChecksumMismatch { stored, computed });
        }
        Ok(Self {
            joined: record[5] != 0,
            state: record[SESSION_HEADER..body_end].to_vec(),
        })
    }
}

/// Successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joined {
    /// Negative `has_joined` polls before the accept.
    pub polls: u32,
}

/// Bytes the stack reported as sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytesSent(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct RadioLinkConfig {
    /// Data rate for join and uplinks; DR0 is the most robust.
    pub data_rate: u8,
    pub join_poll_interval: Duration,
}

pub struct RadioLink<R: LoraStack, S: RetentionStore, D: Delay> {
    stack: R,
    store: S,
    delay: D,
    config: RadioLinkConfig,
    session: RadioSession,
    /// Record last written to or read from retention memory.
    committed: Option<Vec<u8>>,
}

impl<R: LoraStack, S: RetentionStore, D: Delay> RadioLink<R, S, D> {
    pub fn new(stack: R, store: S, delay: D, config: RadioLinkConfig) -> Self {
        Self {
            stack,
            store,
            delay,
            config,
            session: RadioSession::unjoined(),
            committed: None,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.session.joined
    }

    #[cfg(test)]
    pub fn session(&self) -> &RadioSession {
        &self.session
    }

    /// Issue an OTAA join and poll until the network accepts it. There is no
    /// timeout: a node that is not a network member has nothing else to do.
    pub async fn join<L: StatusLed>(&mut self, identity: &DeviceIdentity, indicator: &mut L) -> Result<Joined, JoinFailed> {
        info!("Joining network as {} at DR{}", identity.dev_eui_hex(), self.config.data_rate);
        indicator.set(Phase::Joining.color());
        self.session.joined = false;
        self.stack.request_join(identity, self.config.data_rate)?;

        let mut polls = 0u32;
        while !self.stack.has_joined() {
            polls += 1;
            debug!("Not joined yet (poll {})", polls);
            indicator.set(Phase::Joining.color());
            self.delay.delay(JOIN_BLINK).await;
            indicator.set(crate::hal::Rgb::OFF);
            self.delay.delay(self.config.join_poll_interval).await;
        }

        self.session = RadioSession {
            joined: true,
            state: self.stack.export_session(),
        };
        info!("Joined after {} polls", polls);
        Ok(Joined { polls })
    }

    /// Send one packet as a confirmed uplink at the configured data rate.
    pub async fn transmit(&mut self, packet: TelemetryPacket) -> Result<BytesSent, TxFailed> {
        if !self.session.joined {
            return Err(TxFailed::NotJoined);
        }
        let options = UplinkOptions {
            confirmed: true,
            data_rate: self.config.data_rate,
        };
        let sent = self.stack.send(packet.as_bytes(), options).await;
        // Frame counters advance whether or not the uplink was acknowledged.
        self.session.state = self.stack.export_session();
        Ok(BytesSent(sent?))
    }

    /// Write the current session to retention memory. Returns once durable.
    /// A record identical to the one already stored is not rewritten.
    pub fn save_session(&mut self) -> Result<(), SessionError> {
        if self.session.joined {
            self.session.state = self.stack.export_session();
        }
        let record = self.session.to_record()?;
        if self.committed.as_deref() == Some(record.as_slice()) {
            debug!("Session unchanged, nothing to save");
            return Ok(());
        }
        self.store.commit(&record)?;
        debug!("Session saved ({} bytes, joined={})", record.len(), self.session.joined);
        self.committed = Some(record);
        Ok(())
    }

    /// Load the persisted session and hand it back to the stack.
    ///
    /// Anything other than an intact, joined record the stack accepts yields
    /// `None`, which the controller treats as "rejoin".
    pub fn restore_session(&mut self) -> Option<RadioSession> {
        match self.load_session() {
            Ok(session) => {
                debug!("Session restored ({} bytes of stack state)", session.state.len());
                self.session = session.clone();
                Some(session)
            }
            Err(SessionCorrupt::Absent) => {
                info!("No persisted session");
                self.session = RadioSession::unjoined();
                self.committed = None;
                None
            }
            Err(e) => {
                warn!("Persisted session unusable, rejoin required: {}", e);
                self.session = RadioSession::unjoined();
                self.committed = None;
                None
            }
        }
    }

    fn load_session(&mut self) -> Result<RadioSession, SessionCorrupt> {
        let record = self.store.load()?.ok_or(SessionCorrupt::Absent)?;
        let session = RadioSession::from_record(&record)?;
        if !session.joined {
            return Err(SessionCorrupt::NotJoined);
        }
        self.stack.import_session(&session.state).map_err(SessionCorrupt::Rejected)?;
        self.committed = Some(record);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackError;
    use crate::hal::Rgb;
    use crate::hal::mock::{HwEvent, MockDelay, MockHardware, MockLed, MockRadio, MockRetention};
    use crate::node::position::PositionFix;
    use crate::node::telemetry::encode;
    use embassy_futures::block_on;

    type MockLink = RadioLink<MockRadio, MockRetention, MockDelay>;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            dev_eui: [0x70, 0xb3, 0xd5, 0x49, 0x9a, 0x3b, 0x1c, 0x2d],
            app_key: [0x11; 16],
        }
    }

    fn config() -> RadioLinkConfig {
        RadioLinkConfig {
            data_rate: 0,
            join_poll_interval: Duration::from_secs(2),
        }
    }

    fn link(hw: MockHardware) -> (MockLink, MockLed) {
        (RadioLink::new(hw.radio, hw.retention, hw.delay, config()), hw.led)
    }

    fn packet() -> TelemetryPacket {
        let fix = PositionFix {
            latitude: 56.0,
            longitude: 10.0,
            valid: true,
            staleness: 0,
        };
        encode(&fix, 4095.0)
    }

    #[test]
    fn record_layout_and_corruption_detection() {
        let session = RadioSession {
            joined: true,
            state: vec![1, 2, 3],
        };
        let record = session.to_record().unwrap();
        assert_eq!(&record[0..4], b"RSES");
        assert_eq!(record.len(), SESSION_HEADER + 3 + SESSION_CRC);
        assert_eq!(RadioSession::from_record(&record).unwrap(), session);

        let mut flipped = record.clone();
        flipped[9] ^= 0x40;
        assert!(matches!(RadioSession::from_record(&flipped), Err(SessionCorrupt::ChecksumMismatch { .. })));
        assert!(matches!(RadioSession::from_record(&record[..record.len() - 1]), Err(SessionCorrupt::Truncated(_))));
        assert!(matches!(RadioSession::from_record(&[0u8; 12]), Err(SessionCorrupt::BadMagic(0))));
    }

    #[test]
    fn join_polls_until_accepted_and_blinks() {
        let mut hw = MockHardware::new();
        hw.radio.unjoined_polls = 3;
        let journal = hw.journal.clone();
        let (mut link, mut led) = link(hw);

        let joined = block_on(link.join(&identity(), &mut led)).unwrap();
        assert_eq!(joined.polls, 3);
        assert!(link.is_joined());
        assert_eq!(journal.count(|e| matches!(e, HwEvent::JoinRequest { data_rate: 0 })), 1);
        assert_eq!(journal.count(|e| matches!(e, HwEvent::JoinPoll(false))), 3);
        assert_eq!(journal.delays().len(), 6);
        assert!(journal.delays().contains(&Duration::from_secs(2)));
        let leds = journal.leds();
        assert_eq!(leds.first(), Some(&Rgb::RED));
        assert!(leds.contains(&Rgb::OFF));
    }

    #[test]
    fn rejected_join_request_is_join_failed() {
        let mut hw = MockHardware::new();
        hw.radio.join_request_results.push_back(Err(StackError::Busy));
        let (mut link, mut led) = link(hw);

        let result = block_on(link.join(&identity(), &mut led));
        assert_eq!(result, Err(JoinFailed(StackError::Busy)));
        assert!(!link.is_joined());
    }

    #[test]
    fn transmit_requires_joined_session() {
        let hw = MockHardware::new();
        let journal = hw.journal.clone();
        let (mut link, _) = link(hw);

        assert_eq!(block_on(link.transmit(packet())), Err(TxFailed::NotJoined));
        assert!(journal.uplinks().is_empty());
    }

    #[test]
    fn transmit_sends_confirmed_at_lowest_rate() {
        let hw = MockHardware::new();
        let journal = hw.journal.clone();
        let (mut link, mut led) = link(hw);
        block_on(link.join(&identity(), &mut led)).unwrap();

        let expected = packet().into_bytes().to_vec();
        assert_eq!(block_on(link.transmit(packet())), Ok(BytesSent(12)));
        let uplink = journal.events().into_iter().find_map(|e| match e {
            HwEvent::Uplink { payload, options } => Some((payload, options)),
            _ => None,
        });
        assert_eq!(
            uplink,
            Some((
                expected,
                UplinkOptions {
                    confirmed: true,
                    data_rate: 0
                }
            ))
        );
    }

    #[test]
    fn stack_failure_is_tx_failed() {
        let mut hw = MockHardware::new();
        hw.radio.send_results.push_back(Err(StackError::NoAck));
        let (mut link, mut led) = link(hw);
        block_on(link.join(&identity(), &mut led)).unwrap();

        assert_eq!(block_on(link.transmit(packet())), Err(TxFailed::Stack(StackError::NoAck)));
        assert!(link.is_joined());
    }

    #[test]
    fn saved_session_survives_power_loss() {
        let hw = MockHardware::new();
        let cell = hw.retention.cell.clone();
        let (mut link, mut led) = link(hw);
        block_on(link.join(&identity(), &mut led)).unwrap();
        block_on(link.transmit(packet())).unwrap();
        link.save_session().unwrap();
        let before = link.session().clone();
        drop(link);

        let (mut rebooted, _) = self::link(MockHardware::with_retention(cell));
        let restored = rebooted.restore_session().unwrap();
        assert_eq!(restored, before);
        assert_eq!(restored.state, MockRadio::session_blob(1));
        assert!(rebooted.is_joined());
    }

    #[test]
    fn corrupt_unjoined_or_rejected_session_forces_rejoin() {
        let hw = MockHardware::new();
        let store = hw.retention.clone();
        let (mut link, _) = link(hw);
        assert_eq!(link.restore_session(), None);

        let unjoined = RadioSession {
            joined: false,
            state: MockRadio::session_blob(4),
        };
        store.overwrite(Some(unjoined.to_record().unwrap()));
        assert_eq!(link.restore_session(), None);

        let mut record = RadioSession {
            joined: true,
            state: MockRadio::session_blob(4),
        }
        .to_record()
        .unwrap();
        let last = record.len() - 1;
        record[last] ^= 0xff;
        store.overwrite(Some(record));
        assert_eq!(link.restore_session(), None);
        assert!(!link.is_joined());

        let mut hw = MockHardware::new();
        hw.radio.reject_import = true;
        hw.retention.overwrite(Some(
            RadioSession {
                joined: true,
                state: MockRadio::session_blob(4),
            }
            .to_record()
            .unwrap(),
        ));
        let (mut link, _) = self::link(hw);
        assert_eq!(link.restore_session(), None);
    }

    #[test]
    fn unchanged_session_is_not_rewritten() {
        let hw = MockHardware::new();
        let journal = hw.journal.clone();
        let (mut link, mut led) = link(hw);
        let commits = || journal.count(|e| matches!(e, HwEvent::RetentionCommit(_)));
        block_on(link.join(&identity(), &mut led)).unwrap();

        link.save_session().unwrap();
        link.save_session().unwrap();
        assert_eq!(commits(), 1);

        block_on(link.transmit(packet())).unwrap();
        link.save_session().unwrap();
        assert_eq!(commits(), 2);
    }

    #[test]
    fn restored_session_is_not_rewritten_until_it_changes() {
        let mut hw = MockHardware::new();
        let journal = hw.journal.clone();
        hw.retention.overwrite(Some(
            RadioSession {
                joined: true,
                state: MockRadio::session_blob(4),
            }
            .to_record()
            .unwrap(),
        ));
        let (mut link, _) = link(hw);
        assert!(link.restore_session().is_some());

        link.save_session().unwrap();
        assert_eq!(journal.count(|e| matches!(e, HwEvent::RetentionCommit(_))), 0);
        block_on(link.transmit(packet())).unwrap();
        link.save_session().unwrap();
        assert_eq!(journal.count(|e| matches!(e, HwEvent::RetentionCommit(_))), 1);
    }
}
