//! Sleep scheduling, wake-source arming and the status indicator.
//!
//! The duty-cycle floor is a hard lower bound on every armed timer: a caller
//! asking for less gets the floor.

use embassy_time::Duration;
use log::{debug, info};

use crate::hal::{Delay, PowerControl, ResetCause, Rgb, StatusLed, WakeCause, WakePin};

use super::airtime::DutyCycleBudget;

/// Indicator flash before the LED is switched off for deep sleep.
const SLEEP_FLASH: Duration = Duration::from_millis(100);

/// Operating phases shown on the status LED for field diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Joining,
    Acquiring,
    Transmitting,
    Sleeping,
}

impl Phase {
    pub const fn color(self) -> Rgb {
        match self {
            Phase::Joining => Rgb::RED,
            Phase::Acquiring => Rgb::PINK,
            Phase::Transmitting => Rgb::BLUE,
            Phase::Sleeping => Rgb::GREEN,
        }
    }
}

pub struct PowerScheduler<P: PowerControl, L: StatusLed, D: Delay> {
    power: P,
    led: L,
    delay: D,
    budget: DutyCycleBudget,
    wake_pins: Vec<WakePin>,
}

impl<P: PowerControl, L: StatusLed, D: Delay> PowerScheduler<P, L, D> {
    pub fn new(power: P, led: L, delay: D, budget: DutyCycleBudget, wake_pins: Vec<WakePin>) -> Self {
        Self {
            power,
            led,
            delay,
            budget,
            wake_pins,
        }
    }

    /// Minimum sleep between transmissions allowed by the duty-cycle limit.
    pub fn duty_cycle_floor(&self) -> Duration {
        self.budget.floor()
    }

    pub fn reset_cause(&mut self) -> ResetCause {
        self.power.reset_cause()
    }

    pub fn set_indicator(&mut self, phase: Phase) {
        debug!("Indicator: {:?}", phase);
        self.led.set(phase.color());
    }

    /// The LED, lent to the radio link while it blinks through a join.
    pub fn indicator_mut(&mut self) -> &mut L {
        &mut self.led
    }

    /// Arm the wake timer (clamped up to the floor) and the wake lines.
    /// Returns the duration actually armed.
    pub fn arm_wake_sources(&mut self, timer: Duration, pins: &[WakePin]) -> Duration {
        let armed = timer.max(self.duty_cycle_floor());
        self.power.arm_timer(armed);
        self.power.arm_wake_pins(pins);
        armed
    }

    /// Enter deep sleep for at least `duration` (never less than the floor).
    pub async fn sleep_for(&mut self, duration: Duration) -> WakeCause {
        if duration < self.duty_cycle_floor() {
            info!(
                "Requested sleep of {} ms is below the duty-cycle floor, sleeping {} ms",
                duration.as_millis(),
                self.duty_cycle_floor().as_millis()
            );
        }
        self.set_indicator(Phase::Sleeping);
        self.delay.delay(SLEEP_FLASH).await;
        self.led.set(Rgb::OFF);

        let pins = self.wake_pins.clone();
        let armed = self.arm_wake_sources(duration, &pins);
        info!("Deep sleep for {} s", armed.as_secs());
        let cause = self.power.deep_sleep().await;
        debug!("Woke from deep sleep: {:?}", cause);
        cause
    }
}
