//! Simulated fall-detection co-processor.
//!
//! Alerts arrive as a Poisson process. Each alert pulses the wake line (the
//! interrupt handler raises the latch, the power domain sees the edge) and
//! then waits for the node's `OK`. Without one it pulses again, a bounded
//! number of times.

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};

use crate::config::NodeConfig;
use crate::error::HalError;
use crate::hal::{SerialPort, WakePin};
use crate::node::WakeLatch;
use crate::node::controller::PEER_ACK;

use super::types::{PeerQueueReceiver, PeerQueueSender, SimClock, WakeLine};

/// How long the co-processor waits for `OK` before pulsing the line again.
const ACK_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_PULSES: u32 = 3;

/// Node side of the co-processor UART.
pub struct SimPeer {
    tx: PeerQueueSender,
}

impl SimPeer {
    pub fn new(tx: PeerQueueSender) -> Self {
        Self { tx }
    }
}

impl SerialPort for SimPeer {
    fn read_available(&mut self, _buf: &mut [u8]) -> Result<usize, HalError> {
        Ok(0)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), HalError> {
        self.tx.try_send(data.to_vec()).map_err(|_| HalError::Busy)
    }
}

/// Wake-line interrupt handler: latch only.
fn on_wake_edge(latch: &WakeLatch, line: &WakeLine, pin: WakePin) {
    latch.raise();
    line.signal(pin);
}

#[embassy_executor::task]
pub async fn coprocessor_task(
    config: NodeConfig,
    mean_interval_secs: f64,
    latch: &'static WakeLatch,
    line: &'static WakeLine,
    rx: PeerQueueReceiver,
) {
    let clock = SimClock::new(config.simulation.time_scale);
    let mut rng = StdRng::seed_from_u64(config.simulation.seed.wrapping_add(2));
    let pin = WakePin(config.device.wake_pins.first().copied().unwrap_or(13));
    let arrivals = match Exp::new(1.0 / mean_interval_secs) {
        Ok(arrivals) => arrivals,
        Err(e) => {
            warn!("Co-processor disabled, invalid alert interval: {}", e);
            return;
        }
    };

    let mut alerts = 0u32;
    loop {
        let wait: f64 = arrivals.sample(&mut rng);
        let deadline = Instant::now() + clock.real_secs(wait);
        loop {
            match select(Timer::at(deadline), rx.receive()).await {
                Either::First(_) => break,
                Either::Second(bytes) => debug!("Node status write {:02x?}", bytes),
            }
        }
        alerts += 1;
        info!("Co-processor alert {} (after {:.0} s)", alerts, wait);

        let mut acknowledged = false;
        for pulse in 1..=MAX_PULSES {
            if latch.is_raised() {
                debug!("Previous edge not yet taken by the node");
            }
            on_wake_edge(latch, line, pin);
            match with_timeout(clock.real(ACK_TIMEOUT), rx.receive()).await {
                Ok(bytes) if bytes == PEER_ACK => {
                    debug!("Alert {} acknowledged on pulse {}", alerts, pulse);
                    acknowledged = true;
                    break;
                }
                Ok(bytes) => warn!("Unexpected bytes from node: {:02x?}", bytes),
                Err(_) => warn!("No acknowledgment for alert {} (pulse {})", alerts, pulse),
            }
        }
        if !acknowledged {
            warn!("Giving up on alert {}", alerts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::types::PeerQueue;

    #[test]
    fn edge_raises_latch_and_signals_line() {
        let latch = WakeLatch::new();
        let line = WakeLine::new();
        on_wake_edge(&latch, &line, WakePin(13));
        assert!(latch.is_raised());
        assert_eq!(line.try_take(), Some(WakePin(13)));
    }

    #[test]
    fn peer_uart_forwards_writes() {
        let queue: &'static PeerQueue = Box::leak(Box::new(PeerQueue::new()));
        let mut peer = SimPeer::new(queue.sender());
        peer.write_all(PEER_ACK).unwrap();
        assert_eq!(queue.try_receive().ok(), Some(b"OK".to_vec()));
        for _ in 0..crate::sim::types::PEER_QUEUE_SIZE {
            peer.write_all(b"OK").unwrap();
        }
        assert_eq!(peer.write_all(b"OK"), Err(HalError::Busy));
    }
}
