//! The operating-cycle state machine.
//!
//! ```text
//! ColdStart ──(no session)──> Joining ──> Acquiring ──> Transmitting ──> Sleeping
//!     │                         ^            ^                             │
//!     ├──(session, timer/power-on)───────────┘<──────(timer wake)──────────┤
//!     └──(interrupt)──> EmergencyHandling <──────────(interrupt wake)──────┘
//!                           └──(no session)──> Joining
//! ```
//!
//! An interrupt wake is always acknowledged and always produces an uplink,
//! joining first when the persisted session cannot be restored. Any other
//! wake without a usable session goes back to `Joining`.
//! Nothing here returns an error to the caller: failures are logged, shown on
//! the indicator, or turned into a transition.

use embassy_time::Duration;
use log::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::error::TxFailed;
use crate::hal::{BatterySensor, Board, Delay, HardwareContext, SerialPort};

use super::power::{Phase, PowerScheduler};
use super::position::{PositionFix, PositionSource};
use super::radio::{BytesSent, DeviceIdentity, RadioLink};
use super::telemetry;
use super::wake::{WakeEvent, WakeLatch};

/// Acknowledgment written to the co-processor after it raised the wake line.
pub const PEER_ACK: &[u8] = b"OK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    ColdStart,
    Joining,
    Acquiring,
    Transmitting,
    Sleeping,
    EmergencyHandling,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub identity: DeviceIdentity,
    /// Receiver retries per cycle before the fallback position is used.
    pub max_fix_attempts: u32,
    pub cycle_interval: Duration,
    pub emergency_interval: Duration,
    /// Wait before re-issuing a join request the stack refused.
    pub join_retry_interval: Duration,
    pub battery_scale: f32,
}

pub struct NodeController<'a, B: Board> {
    position: PositionSource<B::Gnss, B::Delay>,
    radio: RadioLink<B::Radio, B::Retention, B::Delay>,
    power: PowerScheduler<B::Power, B::Led, B::Delay>,
    peer: B::Peer,
    battery: B::Battery,
    delay: B::Delay,
    latch: &'a WakeLatch,
    config: ControllerConfig,
    state: NodeState,
    emergency_cycle: bool,
    fix: Option<PositionFix>,
    last_wake: Option<WakeEvent>,
    last_transmit: Option<Result<BytesSent, TxFailed>>,
    cycles: u32,
}

impl<'a, B: Board> NodeController<'a, B> {
    /// Distribute the board's peripherals to the components and start in `ColdStart`.
    pub fn new(hw: HardwareContext<B>, config: &NodeConfig, latch: &'a WakeLatch) -> anyhow::Result<Self> {
        let controller_config = config.controller_config().map_err(|e| anyhow::anyhow!("Invalid device identity: {}", e))?;
        let budget = config.duty_cycle_budget();
        info!(
            "Airtime per uplink {} ms at {}% duty cycle, floor {} s",
            budget.airtime().as_millis(),
            budget.duty_cycle() * 100.0,
            budget.floor().as_secs()
        );

        Ok(Self {
            position: PositionSource::new(hw.gnss, hw.delay.clone(), config.position_source_config()),
            radio: RadioLink::new(hw.radio, hw.retention, hw.delay.clone(), config.radio_link_config()),
            power: PowerScheduler::new(hw.power, hw.led, hw.delay.clone(), budget, config.wake_pins()),
            peer: hw.peer,
            battery: hw.battery,
            delay: hw.delay,
            latch,
            config: controller_config,
            state: NodeState::ColdStart,
            emergency_cycle: false,
            fix: None,
            last_wake: None,
            last_transmit: None,
            cycles: 0,
        })
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn last_wake(&self) -> Option<WakeEvent> {
        self.last_wake
    }

    pub fn last_fix(&self) -> Option<PositionFix> {
        self.fix
    }

    pub fn last_transmit(&self) -> Option<&Result<BytesSent, TxFailed>> {
        self.last_transmit.as_ref()
    }

    /// Completed transmit-and-sleep cycles.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Run the node forever. Never returns.
    pub async fn run(&mut self) {
        loop {
            self.step().await;
        }
    }

    /// Execute the current state and move to the next one.
    pub async fn step(&mut self) -> NodeState {
        let next = match self.state {
            NodeState::ColdStart => self.cold_start(),
            NodeState::Joining => self.joining().await,
            NodeState::Acquiring => self.acquiring().await,
            NodeState::Transmitting => self.transmitting().await,
            NodeState::Sleeping => self.sleeping().await,
            NodeState::EmergencyHandling => self.emergency(),
        };
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        next
    }

    fn cold_start(&mut self) -> NodeState {
        let wake = WakeEvent::from_reset(self.power.reset_cause(), self.latch);
        info!("Cold start: {:?}", wake);
        self.last_wake = Some(wake);
        self.resume(wake)
    }

    /// Restore the session after a reset or wake and pick the cycle to run.
    fn resume(&mut self, wake: WakeEvent) -> NodeState {
        let restored = self.radio.restore_session().is_some();
        match wake {
            WakeEvent::ExternalInterrupt => NodeState::EmergencyHandling,
            WakeEvent::PowerOn | WakeEvent::TimerExpired if restored => NodeState::Acquiring,
            WakeEvent::PowerOn | WakeEvent::TimerExpired => NodeState::Joining,
        }
    }

    async fn joining(&mut self) -> NodeState {
        loop {
            match self.radio.join(&self.config.identity, self.power.indicator_mut()).await {
                Ok(_) => break,
                Err(e) => {
                    warn!("{}, retrying in {} ms", e, self.config.join_retry_interval.as_millis());
                    self.delay.delay(self.config.join_retry_interval).await;
                }
            }
        }
        self.persist_session();
        NodeState::Acquiring
    }

    async fn acquiring(&mut self) -> NodeState {
        self.power.set_indicator(Phase::Acquiring);
        let fix = self.position.acquire_fix(self.config.max_fix_attempts).await;
        self.fix = Some(fix);
        NodeState::Transmitting
    }

    async fn transmitting(&mut self) -> NodeState {
        if !self.radio.is_joined() {
            warn!("Not joined at transmit time, rejoining");
            return NodeState::Joining;
        }
        let Some(fix) = self.fix else {
            return NodeState::Acquiring;
        };

        self.power.set_indicator(Phase::Transmitting);
        let battery = self.read_battery();
        let packet = telemetry::encode(&fix, battery);
        let result = self.radio.transmit(packet).await;
        match &result {
            Ok(BytesSent(n)) => info!(
                "Uplink sent ({} bytes): {:.6}, {:.6}, battery {}{}",
                n,
                fix.latitude,
                fix.longitude,
                battery,
                if fix.valid { "" } else { " (fallback position)" }
            ),
            Err(e) => warn!("Uplink failed, retrying next wake: {}", e),
        }
        self.last_transmit = Some(result);

        if !self.emergency_cycle {
            self.acknowledge_peer();
        }
        self.persist_session();
        NodeState::Sleeping
    }

    async fn sleeping(&mut self) -> NodeState {
        self.persist_session();
        let interval = if self.emergency_cycle {
            self.config.emergency_interval
        } else {
            self.config.cycle_interval
        };
        self.emergency_cycle = false;
        self.cycles += 1;

        let cause = self.power.sleep_for(interval).await;
        let wake = WakeEvent::from_wake(cause, self.latch);
        info!("Woke after cycle {}: {:?}", self.cycles, wake);
        self.last_wake = Some(wake);
        self.resume(wake)
    }

    fn emergency(&mut self) -> NodeState {
        info!("External alert, running an immediate cycle");
        self.acknowledge_peer();
        self.emergency_cycle = true;
        if self.radio.is_joined() {
            NodeState::Acquiring
        } else {
            NodeState::Joining
        }
    }

    fn acknowledge_peer(&mut self) {
        if let Err(e) = self.peer.write_all(PEER_ACK) {
            warn!("Failed to acknowledge co-processor: {}", e);
        }
    }

    fn read_battery(&mut self) -> f32 {
        match self.battery.read_raw() {
            Ok(raw) => raw as f32 * self.config.battery_scale,
            Err(e) => {
                warn!("Battery read failed: {}", e);
                0.0
            }
        }
    }

    fn persist_session(&mut self) {
        if let Err(e) = self.radio.save_session() {
            error!("Failed to persist session: {}", e);
        }
    }
}
