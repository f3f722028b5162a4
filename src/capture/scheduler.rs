//! When to ask the camera for the next capture.
//!
//! Video mode streams and needs one trigger at start. Still mode issues
//! one-shot captures and holds at least `min_delay` between consecutive
//! triggers. The retrigger runs on the consumer thread, from
//! [`FrameService::next`](super::FrameService::next), after the delivered
//! buffer has been recycled. The delivery callback never sleeps, so a slow
//! host only delays the next still, never the firmware.

use crate::error::CaptureError;
use crate::firmware::FirmwareError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source used for rate limiting.
pub trait Clock: Send {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall-clock-independent system clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated clock. Sleeping advances time instantly.
///
/// Clones share the same time, so a test can hold one copy while the
/// scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// The camera operations the scheduler drives.
pub trait Trigger {
    /// Re-sends exposure settings the firmware may drop between stills.
    fn reapply_exposure(&self) -> Result<(), FirmwareError>;

    fn start_capture(&self) -> Result<(), FirmwareError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Video: the firmware delivers continuously.
    Streaming,
    /// Still: a capture is outstanding.
    Armed,
    /// Still: a frame arrived, waiting out the minimum delay.
    Cooldown,
    /// No further triggers.
    Terminated,
}

/// Per-session capture trigger state machine.
pub struct CaptureScheduler {
    state: SchedulerState,
    still: bool,
    min_delay: Duration,
    last_trigger: Option<Duration>,
    clock: Box<dyn Clock>,
    triggers_issued: u64,
    trigger_failures: u64,
}

impl CaptureScheduler {
    /// Creates a scheduler. `min_delay` only matters in still mode.
    pub fn new(still: bool, min_delay: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            state: if still {
                SchedulerState::Armed
            } else {
                SchedulerState::Streaming
            },
            still,
            min_delay,
            last_trigger: None,
            clock,
            triggers_issued: 0,
            trigger_failures: 0,
        }
    }

    /// Issues the first capture.
    ///
    /// In still mode the call then holds for `settle` so exposure can
    /// stabilise before the first frame is expected. A refusal here is fatal.
    pub fn arm(&mut self, trigger: &dyn Trigger, settle: Duration) -> Result<(), CaptureError> {
        if self.state == SchedulerState::Terminated {
            return Err(CaptureError::NotStarted);
        }

        trigger.start_capture().map_err(CaptureError::CaptureTrigger)?;
        self.triggers_issued += 1;

        if self.still {
            if !settle.is_zero() {
                tracing::debug!(settle_ms = settle.as_millis() as u64, "Waiting for exposure to settle");
                self.clock.sleep(settle);
            }
            self.last_trigger = Some(self.clock.now());
            self.state = SchedulerState::Armed;
        } else {
            self.state = SchedulerState::Streaming;
        }

        tracing::debug!(state = ?self.state, "Capture armed");
        Ok(())
    }

    /// Called on the consumer thread after each delivered frame.
    ///
    /// Returns true if a new still capture was issued. A refused trigger is
    /// logged and counted; capture stays stalled until the host gives up.
    pub fn on_frame_delivered(&mut self, trigger: &dyn Trigger) -> bool {
        if self.state != SchedulerState::Armed {
            return false;
        }
        self.state = SchedulerState::Cooldown;

        let remaining = self.remaining_delay();
        if !remaining.is_zero() {
            tracing::trace!(remaining_ms = remaining.as_millis() as u64, "Still cooldown");
            self.clock.sleep(remaining);
        }

        if let Err(err) = trigger.reapply_exposure() {
            tracing::warn!(error = %err, "Unable to reapply shutter speed before still capture");
        }

        let issued = match trigger.start_capture() {
            Ok(()) => {
                self.triggers_issued += 1;
                true
            }
            Err(err) => {
                self.trigger_failures += 1;
                tracing::warn!(error = %err, "Still capture trigger failed");
                false
            }
        };
        self.last_trigger = Some(self.clock.now());
        self.state = SchedulerState::Armed;
        issued
    }

    /// Time still to wait before the next trigger is allowed.
    pub fn remaining_delay(&self) -> Duration {
        match self.last_trigger {
            Some(last) => self
                .min_delay
                .saturating_sub(self.clock.now().saturating_sub(last)),
            None => Duration::ZERO,
        }
    }

    pub fn terminate(&mut self) {
        if self.state != SchedulerState::Terminated {
            tracing::debug!(from = ?self.state, "Scheduler terminated");
            self.state = SchedulerState::Terminated;
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn triggers_issued(&self) -> u64 {
        self.triggers_issued
    }

    pub fn trigger_failures(&self) -> u64 {
        self.trigger_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::{Cell, RefCell};

    struct RecordingTrigger {
        clock: ManualClock,
        fired: RefCell<Vec<Duration>>,
        exposures: Cell<usize>,
        refuse: Cell<bool>,
    }

    impl RecordingTrigger {
        fn new(clock: &ManualClock) -> Self {
            Self {
                clock: clock.clone(),
                fired: RefCell::new(Vec::new()),
                exposures: Cell::new(0),
                refuse: Cell::new(false),
            }
        }
    }

    impl Trigger for RecordingTrigger {
        fn reapply_exposure(&self) -> Result<(), FirmwareError> {
            self.exposures.set(self.exposures.get() + 1);
            Ok(())
        }

        fn start_capture(&self) -> Result<(), FirmwareError> {
            if self.refuse.get() {
                return Err(FirmwareError::Rejected {
                    operation: "capture",
                    detail: "refused".to_owned(),
                });
            }
            self.fired.borrow_mut().push(self.clock.now());
            Ok(())
        }
    }

    #[test]
    fn test_video_streams_after_single_trigger() {
        let clock = ManualClock::new();
        let trigger = RecordingTrigger::new(&clock);
        let mut scheduler = CaptureScheduler::new(false, Duration::from_millis(66), Box::new(clock.clone()));

        scheduler.arm(&trigger, Duration::from_secs(2)).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Streaming);
        assert_eq!(clock.now(), Duration::ZERO);

        for _ in 0..5 {
            assert!(!scheduler.on_frame_delivered(&trigger));
        }
        assert_eq!(trigger.fired.borrow().len(), 1);
        assert_eq!(trigger.exposures.get(), 0);
    }

    #[test]
    fn test_still_waits_for_settle() {
        let clock = ManualClock::new();
        let trigger = RecordingTrigger::new(&clock);
        let mut scheduler = CaptureScheduler::new(true, Duration::from_millis(500), Box::new(clock.clone()));

        scheduler.arm(&trigger, Duration::from_millis(2500)).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Armed);
        assert_eq!(clock.now(), Duration::from_millis(2500));
        assert_eq!(scheduler.remaining_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_still_retrigger_honours_min_delay() {
        let clock = ManualClock::new();
        let trigger = RecordingTrigger::new(&clock);
        let mut scheduler = CaptureScheduler::new(true, Duration::from_millis(500), Box::new(clock.clone()));
        scheduler.arm(&trigger, Duration::ZERO).unwrap();

        clock.advance(Duration::from_millis(120));
        assert!(scheduler.on_frame_delivered(&trigger));

        assert_eq!(
            *trigger.fired.borrow(),
            vec![Duration::ZERO, Duration::from_millis(500)]
        );
        assert_eq!(trigger.exposures.get(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Armed);
    }

    #[test]
    fn test_slow_consumer_retriggers_immediately() {
        let clock = ManualClock::new();
        let trigger = RecordingTrigger::new(&clock);
        let mut scheduler = CaptureScheduler::new(true, Duration::from_millis(100), Box::new(clock.clone()));
        scheduler.arm(&trigger, Duration::ZERO).unwrap();

        clock.advance(Duration::from_millis(400));
        scheduler.on_frame_delivered(&trigger);
        assert_eq!(clock.now(), Duration::from_millis(400));
    }

    #[test]
    fn test_trigger_failure_mid_session_is_not_fatal() {
        let clock = ManualClock::new();
        let trigger = RecordingTrigger::new(&clock);
        let mut scheduler = CaptureScheduler::new(true, Duration::from_millis(10), Box::new(clock.clone()));
        scheduler.arm(&trigger, Duration::ZERO).unwrap();

        trigger.refuse.set(true);
        assert!(!scheduler.on_frame_delivered(&trigger));
        assert_eq!(scheduler.trigger_failures(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Armed);
    }

    #[test]
    fn test_arm_refusal_is_fatal() {
        let clock = ManualClock::new();
        let trigger = RecordingTrigger::new(&clock);
        trigger.refuse.set(true);
        let mut scheduler = CaptureScheduler::new(false, Duration::ZERO, Box::new(clock));

        assert!(matches!(
            scheduler.arm(&trigger, Duration::ZERO),
            Err(CaptureError::CaptureTrigger(_))
        ));
    }

    #[test]
    fn test_terminated_scheduler_never_triggers() {
        let clock = ManualClock::new();
        let trigger = RecordingTrigger::new(&clock);
        let mut scheduler = CaptureScheduler::new(true, Duration::from_millis(10), Box::new(clock.clone()));
        scheduler.arm(&trigger, Duration::ZERO).unwrap();

        scheduler.terminate();
        scheduler.terminate();
        assert!(!scheduler.on_frame_delivered(&trigger));
        assert_eq!(trigger.fired.borrow().len(), 1);
        assert!(scheduler.arm(&trigger, Duration::ZERO).is_err());
    }

    proptest! {
        #[test]
        fn prop_still_triggers_are_min_delay_apart(
            delay_ms in 1u64..2000,
            settle_ms in 0u64..3000,
            gaps in prop::collection::vec(0u64..3000, 1..50),
        ) {
            let clock = ManualClock::new();
            let trigger = RecordingTrigger::new(&clock);
            let min_delay = Duration::from_millis(delay_ms);
            let mut scheduler = CaptureScheduler::new(true, min_delay, Box::new(clock.clone()));
            scheduler.arm(&trigger, Duration::from_millis(settle_ms)).unwrap();

            for gap in gaps {
                clock.advance(Duration::from_millis(gap));
                prop_assert!(scheduler.on_frame_delivered(&trigger));
            }

            let fired = trigger.fired.borrow();
            for pair in fired.windows(2) {
                prop_assert!(pair[1] - pair[0] >= min_delay);
            }
        }
    }
}
