/// Follows scheduled beats as the audio clock reaches them, for displays
use std::collections::VecDeque;

use crate::tempo::BeatEvent;

/// Holds polled beats until their audio-clock time has passed.
///
/// The scheduler enqueues up to a lookahead window early; a display that
/// lights on `poll_events` alone would run ahead of the sound.
#[derive(Debug, Default)]
pub struct BeatFollower {
    pending: VecDeque<BeatEvent>,
    current: Option<BeatEvent>,
}

impl BeatFollower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = BeatEvent>,
    {
        self.pending.extend(events);
    }

    /// Release every beat due at `now`, oldest first.
    pub fn advance(&mut self, now: f64) -> Vec<BeatEvent> {
        let mut due = Vec::new();
        while let Some(event) = self.pending.front() {
            if event.time > now {
                break;
            }
            if let Some(event) = self.pending.pop_front() {
                due.push(event);
            }
        }
        if let Some(last) = due.last() {
            self.current = Some(*last);
        }
        due
    }

    /// The most recent beat that has sounded.
    pub fn current(&self) -> Option<BeatEvent> {
        self.current
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
    }
}
