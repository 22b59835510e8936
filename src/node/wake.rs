//! Wake-reason arbitration.
//!
//! The external wake line's interrupt handler does exactly one thing: raise
//! the [`WakeLatch`]. All I/O stays in the main flow, which takes
//! the latch once per wake boundary and folds it together with the power
//! domain's reported cause into a [`WakeEvent`].

use core::sync::atomic::{AtomicBool, Ordering};

use crate::hal::{ResetCause, WakeCause};

/// Which controller path a wake runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEvent {
    PowerOn,
    TimerExpired,
    ExternalInterrupt,
}

impl WakeEvent {
    /// Classify a resume from deep sleep. A latched interrupt wins over a
    /// timer expiry that happened to be reported first.
    pub fn from_wake(cause: WakeCause, latch: &WakeLatch) -> Self {
        let latched = latch.take();
        match cause {
            WakeCause::Pin(_) => WakeEvent::ExternalInterrupt,
            WakeCause::Timer if latched => WakeEvent::ExternalInterrupt,
            WakeCause::Timer => WakeEvent::TimerExpired,
        }
    }

    pub fn from_reset(cause: ResetCause, latch: &WakeLatch) -> Self {
        match cause {
            ResetCause::PowerOn => {
                // Edges seen before the first boot completes mean nothing.
                latch.take();
                WakeEvent::PowerOn
            }
            ResetCause::DeepSleep(cause) => Self::from_wake(cause, latch),
        }
    }
}

/// Interrupt-to-main-loop handoff flag.
#[derive(Debug, Default)]
pub struct WakeLatch {
    raised: AtomicBool,
}

impl WakeLatch {
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Interrupt-context entry point for the wake line.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Read and clear.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::WakePin;

    #[test]
    fn pin_wake_is_external_interrupt() {
        let latch = WakeLatch::new();
        assert_eq!(WakeEvent::from_wake(WakeCause::Pin(WakePin(13)), &latch), WakeEvent::ExternalInterrupt);
    }

    #[test]
    fn latched_edge_overrides_timer() {
        let latch = WakeLatch::new();
        assert_eq!(WakeEvent::from_wake(WakeCause::Timer, &latch), WakeEvent::TimerExpired);
        latch.raise();
        assert_eq!(WakeEvent::from_wake(WakeCause::Timer, &latch), WakeEvent::ExternalInterrupt);
        assert!(!latch.is_raised());
    }

    #[test]
    fn power_on_discards_stale_edges() {
        let latch = WakeLatch::new();
        latch.raise();
        assert_eq!(WakeEvent::from_reset(ResetCause::PowerOn, &latch), WakeEvent::PowerOn);
        assert!(!latch.is_raised());
        assert_eq!(
            WakeEvent::from_reset(ResetCause::DeepSleep(WakeCause::Timer), &latch),
            WakeEvent::TimerExpired
        );
    }
}
