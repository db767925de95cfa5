//! Wall-clock synchronization for the main loop.
//!
//! Waiting for a far-away tag uses a coarse, interruptible sleep on the
//! physical-event channel; the tail of every wait is spun so the alarm
//! never fires before the requested instant.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::{PhysicalEvent, TimeValue};

/// Below this remaining delay the alarm stops sleeping and spins.
pub const SPIN_THRESHOLD: Duration = Duration::from_millis(25);

/// Outcome of a single [`Alarm::wait_until`] call.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The target instant was reached; `actual` is the measured wait,
    /// never shorter than requested.
    Expired { actual: Duration },
    /// An asynchronous physical event arrived before the target.
    Interrupted(PhysicalEvent),
}

/// A single-target wake-up primitive. At most one wait is in flight at a
/// time; starting a new wait supersedes any earlier target.
#[derive(Debug)]
pub struct Alarm {
    spin_threshold: Duration,
}

impl Default for Alarm {
    fn default() -> Self {
        Self {
            spin_threshold: SPIN_THRESHOLD,
        }
    }
}

impl Alarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until physical time reaches `target`, or an event arrives on
    /// `wake`. Returns immediately if the target is already in the past.
    #[tracing::instrument(skip(self, wake), fields(target = %target))]
    pub fn wait_until(&self, target: TimeValue, wake: &Receiver<PhysicalEvent>) -> WaitOutcome {
        let begin = TimeValue::now();
        loop {
            let now = TimeValue::now();
            if now >= target {
                break;
            }
            let remaining = target
                .saturating_sub(now)
                .to_duration()
                .unwrap_or(Duration::ZERO);
            if remaining > self.spin_threshold {
                match wake.recv_timeout(remaining - self.spin_threshold) {
                    Ok(event) => {
                        tracing::debug!(event = %event, "Sleep interrupted by physical event");
                        return WaitOutcome::Interrupted(event);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        // No senders left; fall back to a plain sleep.
                        std::thread::sleep(remaining.saturating_sub(self.spin_threshold));
                    }
                }
            } else {
                while TimeValue::now() < target {
                    std::hint::spin_loop();
                }
                break;
            }
        }
        let actual = TimeValue::now()
            .saturating_sub(begin)
            .to_duration()
            .unwrap_or(Duration::ZERO);
        WaitOutcome::Expired { actual }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_never_fires_early() {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let alarm = Alarm::new();
        let delay = TimeValue::from_nanos(5_000_000);
        let target = TimeValue::now().saturating_add(delay);
        match alarm.wait_until(target, &rx) {
            WaitOutcome::Expired { actual } => {
                assert!(actual >= Duration::from_millis(5));
            }
            WaitOutcome::Interrupted(_) => panic!("no event was sent"),
        }
        assert!(TimeValue::now() >= target);
    }

    #[test]
    fn test_alarm_interrupted_by_event() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let alarm = Alarm::new();
        tx.send(PhysicalEvent::Shutdown).unwrap();
        let target = TimeValue::now().saturating_add(TimeValue::new(10, 0));
        assert!(matches!(
            alarm.wait_until(target, &rx),
            WaitOutcome::Interrupted(PhysicalEvent::Shutdown)
        ));
    }

    #[test]
    fn test_past_target_returns_immediately() {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let alarm = Alarm::new();
        assert!(matches!(
            alarm.wait_until(TimeValue::ZERO, &rx),
            WaitOutcome::Expired { .. }
        ));
    }
}
