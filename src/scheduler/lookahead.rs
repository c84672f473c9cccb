/// Lookahead batch computation - decides which beats fall inside the window
use crate::tempo::{BeatEvent, TempoConfig};

/// Beat bookkeeping for one run of the metronome.
///
/// The gap after the last scheduled beat is derived from the tempo read at
/// the moment the next beat is scheduled, so a tempo change lands on the very
/// next beat and never moves one that is already queued. A beat is never
/// placed before the audio clock's current time.
#[derive(Debug, Clone)]
pub struct Lookahead {
    start_time: f64,
    last_event_time: Option<f64>,
    next_index: u64,
    current_beat_in_measure: u32,
}

impl Lookahead {
    pub fn new(start_time: f64) -> Self {
        Self {
            start_time,
            last_event_time: None,
            next_index: 0,
            current_beat_in_measure: 0,
        }
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn current_beat_in_measure(&self) -> u32 {
        self.current_beat_in_measure
    }

    /// When the next beat sounds if it is scheduled at `now`.
    ///
    /// A faster tempo can pull `last + gap` behind the clock; the beat then
    /// sounds immediately instead of being handed over already late.
    fn next_event_time(&self, now: f64, config: &TempoConfig) -> f64 {
        let due = match self.last_event_time {
            Some(last) => last + config.seconds_per_beat(),
            None => self.start_time,
        };
        due.max(now)
    }

    /// Emit every beat earlier than `now + window`, in order.
    ///
    /// Returns how many beats were emitted.
    pub fn fill<F>(&mut self, now: f64, window: f64, config: &TempoConfig, mut emit: F) -> usize
    where
        F: FnMut(BeatEvent),
    {
        let horizon = now + window;
        let mut emitted = 0;

        loop {
            let time = self.next_event_time(now, config);
            if time >= horizon {
                break;
            }

            let index = self.next_index;
            emit(BeatEvent {
                time,
                index,
                beat_in_measure: config.beat_in_measure(index),
                accent: config.is_accent(index),
            });

            self.last_event_time = Some(time);
            self.next_index += 1;
            self.current_beat_in_measure = config.beat_in_measure(self.next_index);
            emitted += 1;
        }

        emitted
    }
}
