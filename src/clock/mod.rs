/// The audio clock seam between the beat scheduler and whatever makes the sound
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A precise output clock that can play a short tone at an exact time.
///
/// `now()` must be monotonic and independent of the scheduler's polling
/// timer. `schedule_tone` must return immediately; the tone is realized by
/// the implementation when its clock reaches `time`.
pub trait AudioClock: Send + Sync {
    fn now(&self) -> f64;

    fn schedule_tone(&self, time: f64, accent: bool, duration: f64, amplitude: f32);

    /// False once the underlying output has gone away.
    fn is_ready(&self) -> bool {
        true
    }
}

/// A tone as received by an [`AudioClock`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledTone {
    pub time: f64,
    /// The clock's `now()` when the tone was handed over.
    pub scheduled_at: f64,
    pub accent: bool,
    pub duration: f64,
    pub amplitude: f32,
}

/// Hand-driven clock that records every tone it is given.
///
/// Cloning shares the same clock, so a test can keep one handle while the
/// scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Arc<ManualInner>,
}

#[derive(Debug, Default)]
struct ManualInner {
    now: Mutex<f64>,
    tones: Mutex<Vec<ScheduledTone>>,
    unavailable: AtomicBool,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(seconds: f64) -> Self {
        let clock = Self::new();
        clock.set(seconds);
        clock
    }

    pub fn set(&self, seconds: f64) {
        let mut now = self.inner.now.lock().unwrap_or_else(PoisonError::into_inner);
        // Never run backwards.
        if seconds > *now {
            *now = seconds;
        }
    }

    pub fn advance(&self, seconds: f64) {
        let mut now = self.inner.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += seconds.max(0.0);
    }

    pub fn set_ready(&self, ready: bool) {
        self.inner.unavailable.store(!ready, Ordering::SeqCst);
    }

    pub fn tones(&self) -> Vec<ScheduledTone> {
        self.inner
            .tones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn tone_count(&self) -> usize {
        self.inner
            .tones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        *self.inner.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule_tone(&self, time: f64, accent: bool, duration: f64, amplitude: f32) {
        let scheduled_at = self.now();
        self.inner
            .tones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ScheduledTone {
                time,
                scheduled_at,
                accent,
                duration,
                amplitude,
            });
    }

    fn is_ready(&self) -> bool {
        !self.inner.unavailable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_monotonic() {
        let clock = ManualClock::starting_at(2.0);
        clock.set(1.0);
        assert_eq!(clock.now(), 2.0);
        clock.advance(0.5);
        assert_eq!(clock.now(), 2.5);
        clock.advance(-3.0);
        assert_eq!(clock.now(), 2.5);
    }

    #[test]
    fn test_clones_share_state() {
        let clock = ManualClock::starting_at(0.125);
        let handle: Arc<dyn AudioClock> = Arc::new(clock.clone());
        handle.schedule_tone(0.25, true, 0.03, 0.5);
        clock.advance(1.0);

        assert_eq!(handle.now(), 1.125);
        assert_eq!(
            clock.tones(),
            vec![ScheduledTone {
                time: 0.25,
                scheduled_at: 0.125,
                accent: true,
                duration: 0.03,
                amplitude: 0.5,
            }]
        );
    }

    #[test]
    fn test_ready_flag() {
        let clock = ManualClock::new();
        assert!(clock.is_ready());
        clock.set_ready(false);
        assert!(!clock.is_ready());
    }
}
