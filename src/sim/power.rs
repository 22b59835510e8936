//! Simulated power domain, delay, status LED and battery ADC.
//!
//! Deep sleep resumes in place: the task waits for the armed timer or an
//! edge on an armed wake line, whichever comes first. Time is compressed by
//! the configured scale.

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};
use log::{debug, info};

use crate::error::HalError;
use crate::hal::{BatterySensor, Delay, PowerControl, ResetCause, Rgb, StatusLed, WakeCause, WakePin};

use super::types::{SimClock, WakeLine};

pub struct SimPower {
    clock: SimClock,
    line: &'static WakeLine,
    timer: Option<Duration>,
    pins: Vec<WakePin>,
}

impl SimPower {
    pub fn new(clock: SimClock, line: &'static WakeLine) -> Self {
        Self {
            clock,
            line,
            timer: None,
            pins: Vec::new(),
        }
    }
}

impl PowerControl for SimPower {
    fn reset_cause(&mut self) -> ResetCause {
        // The process starting is the only reset this board sees.
        ResetCause::PowerOn
    }

    fn arm_timer(&mut self, after: Duration) {
        self.timer = Some(after);
    }

    fn arm_wake_pins(&mut self, pins: &[WakePin]) {
        self.pins = pins.to_vec();
    }

    async fn deep_sleep(&mut self) -> WakeCause {
        let started = Instant::now();
        let deadline = self.timer.take().map(|after| started + self.clock.real(after));
        let cause = loop {
            let edge = match deadline {
                Some(deadline) => match select(Timer::at(deadline), self.line.wait()).await {
                    Either::First(_) => break WakeCause::Timer,
                    Either::Second(pin) => pin,
                },
                None => self.line.wait().await,
            };
            if self.pins.contains(&edge) {
                break WakeCause::Pin(edge);
            }
            debug!("Ignoring edge on unarmed line {:?}", edge);
        };
        self.pins.clear();
        info!("Slept {} ms wall-clock, woke by {:?}", started.elapsed().as_millis(), cause);
        cause
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SimDelay {
    clock: SimClock,
}

impl SimDelay {
    pub fn new(clock: SimClock) -> Self {
        Self { clock }
    }
}

impl Delay for SimDelay {
    async fn delay(&mut self, duration: Duration) {
        Timer::after(self.clock.real(duration)).await;
    }
}

#[derive(Debug, Default)]
pub struct SimLed {
    color: Option<Rgb>,
}

impl StatusLed for SimLed {
    fn set(&mut self, color: Rgb) {
        if self.color != Some(color) {
            debug!("LED #{:06x}", color.0);
            self.color = Some(color);
        }
    }
}

/// Battery ADC that loses one count per reading.
pub struct SimBattery {
    raw: u16,
}

impl SimBattery {
    pub fn new(raw: u16) -> Self {
        Self { raw }
    }
}

impl BatterySensor for SimBattery {
    fn read_raw(&mut self) -> Result<u16, HalError> {
        let raw = self.raw;
        self.raw = self.raw.saturating_sub(1);
        Ok(raw)
    }
}
