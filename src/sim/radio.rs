//! Simulated LoRaWAN stack.
//!
//! Frames go to the network server task over the uplink channel; join
//! accepts and acknowledgments come back over the downlink channel. The
//! session blob is the device address followed by the uplink frame counter,
//! both little-endian.

use embassy_time::{Duration, with_timeout};
use log::{debug, trace, warn};

use crate::error::StackError;
use crate::hal::{LoraStack, UplinkOptions};
use crate::node::radio::DeviceIdentity;

use super::types::{AirFrame, Downlink, DownlinkQueueReceiver, SimClock, UplinkQueueSender};

/// End of the second receive window after an uplink.
const RX2_WINDOW: Duration = Duration::from_secs(2);
const SESSION_BLOB_LEN: usize = 8;

/// EU868 maximum application payload per data rate (no repeater).
const MAX_PAYLOAD: [usize; 6] = [51, 51, 51, 115, 242, 242];

pub struct SimLoraStack {
    uplink: UplinkQueueSender,
    downlink: DownlinkQueueReceiver,
    clock: SimClock,
    dev_nonce: u16,
    dev_addr: Option<u32>,
    f_cnt: u32,
}

impl SimLoraStack {
    pub fn new(uplink: UplinkQueueSender, downlink: DownlinkQueueReceiver, clock: SimClock, dev_nonce: u16) -> Self {
        Self {
            uplink,
            downlink,
            clock,
            dev_nonce,
            dev_addr: None,
            f_cnt: 0,
        }
    }

    /// Wait for the acknowledgment of `f_cnt`, discarding stale downlinks.
    async fn await_ack(&mut self, f_cnt: u32) -> Result<(), StackError> {
        let window = self.clock.real(RX2_WINDOW);
        loop {
            match with_timeout(window, self.downlink.receive()).await {
                Ok(Downlink::Ack { f_cnt: acked }) if acked == f_cnt => return Ok(()),
                Ok(other) => trace!("Discarding stale downlink {:?}", other),
                Err(_) => return Err(StackError::NoAck),
            }
        }
    }
}

impl LoraStack for SimLoraStack {
    fn request_join(&mut self, identity: &DeviceIdentity, data_rate: u8) -> Result<(), StackError> {
        self.dev_nonce = self.dev_nonce.wrapping_add(1);
        self.dev_addr = None;
        let frame = AirFrame::JoinRequest {
            dev_eui: identity.dev_eui,
            dev_nonce: self.dev_nonce,
        };
        debug!("Join request (nonce {}) at DR{}", self.dev_nonce, data_rate);
        self.uplink.try_send(frame).map_err(|_| StackError::Busy)
    }

    fn has_joined(&mut self) -> bool {
        while let Ok(downlink) = self.downlink.try_receive() {
            if let Downlink::JoinAccept { dev_addr } = downlink {
                debug!("Join accept, device address {:08x}", dev_addr);
                self.dev_addr = Some(dev_addr);
                self.f_cnt = 0;
            }
        }
        self.dev_addr.is_some()
    }

    async fn send(&mut self, payload: &[u8], options: UplinkOptions) -> Result<usize, StackError> {
        let Some(dev_addr) = self.dev_addr else {
            return Err(StackError::Radio("no active session".to_string()));
        };
        let limit = MAX_PAYLOAD.get(options.data_rate as usize).copied().unwrap_or(MAX_PAYLOAD[0]);
        if payload.len() > limit {
            return Err(StackError::PayloadTooLarge(payload.len()));
        }

        let f_cnt = self.f_cnt;
        self.f_cnt = self.f_cnt.wrapping_add(1);
        self.uplink
            .send(AirFrame::Uplink {
                dev_addr,
                f_cnt,
                confirmed: options.confirmed,
                payload: payload.to_vec(),
            })
            .await;

        if options.confirmed {
            if let Err(e) = self.await_ack(f_cnt).await {
                warn!("Uplink {} not acknowledged", f_cnt);
                return Err(e);
            }
        }
        Ok(payload.len())
    }

    fn export_session(&mut self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(SESSION_BLOB_LEN);
        blob.extend_from_slice(&self.dev_addr.unwrap_or(0).to_le_bytes());
        blob.extend_from_slice(&self.f_cnt.to_le_bytes());
        blob
    }

    fn import_session(&mut self, state: &[u8]) -> Result<(), StackError> {
        if state.len() != SESSION_BLOB_LEN {
            return Err(StackError::InvalidSession);
        }
        let dev_addr = u32::from_le_bytes([state[0], state[1], state[2], state[3]]);
        if dev_addr == 0 {
            return Err(StackError::InvalidSession);
        }
        self.dev_addr = Some(dev_addr);
        self.f_cnt = u32::from_le_bytes([state[4], state[5], state[6], state[7]]);
        Ok(())
    }
}
