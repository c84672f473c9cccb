/// Beat scheduler - polls coarsely, enqueues clicks precisely on the audio clock
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::clock::AudioClock;
use crate::error::{MetronomeError, Result};
use crate::settings::Settings;
use crate::tempo::{BeatEvent, TempoConfig};

pub mod follower;
pub mod lookahead;

pub use follower::BeatFollower;
pub use lookahead::Lookahead;

/// State shared between the caller and the scheduling thread.
struct Shared {
    config: TempoConfig,
    running: bool,
    /// Bumped on every start so a worker from an earlier run never resumes.
    generation: u64,
    lookahead: Option<Lookahead>,
    events: VecDeque<BeatEvent>,
    worker: Option<JoinHandle<()>>,
}

impl Shared {
    fn schedule_batch(&mut self, clock: &dyn AudioClock, settings: &Settings) -> usize {
        let Some(lookahead) = self.lookahead.as_mut() else {
            return 0;
        };

        let config = self.config;
        let events = &mut self.events;
        lookahead.fill(clock.now(), settings.lookahead_secs, &config, |event| {
            clock.schedule_tone(
                event.time,
                event.accent,
                settings.click_duration_secs,
                config.volume(),
            );

            if settings.event_backlog > 0 {
                if events.len() >= settings.event_backlog {
                    events.pop_front();
                }
                events.push_back(event);
            }
        })
    }
}

struct Inner {
    shared: Mutex<Shared>,
    wake: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drift-free metronome driven by an [`AudioClock`].
///
/// A dedicated thread wakes every poll interval and hands the clock every
/// beat that falls inside the lookahead window. Timer jitter only changes
/// *when* a beat is enqueued, never the time it sounds at.
pub struct BeatScheduler {
    clock: Option<Arc<dyn AudioClock>>,
    settings: Settings,
    inner: Arc<Inner>,
}

impl BeatScheduler {
    pub fn new(clock: Arc<dyn AudioClock>) -> Self {
        Self::build(Some(clock), Settings::default())
    }

    /// Fails with `Config` if the settings do not validate.
    pub fn with_settings(clock: Arc<dyn AudioClock>, settings: Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self::build(Some(clock), settings))
    }

    /// A scheduler with no audio output; `start()` always fails.
    pub fn detached(settings: Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self::build(None, settings))
    }

    /// Open a clock, falling back to a detached scheduler if that fails.
    pub fn acquire<F>(settings: Settings, open: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Arc<dyn AudioClock>>,
    {
        settings.validate()?;
        match open() {
            Ok(clock) => Ok(Self::build(Some(clock), settings)),
            Err(e) => {
                warn!(error = %e, "no audio clock, metronome will stay silent");
                Ok(Self::build(None, settings))
            }
        }
    }

    fn build(clock: Option<Arc<dyn AudioClock>>, settings: Settings) -> Self {
        let shared = Shared {
            config: TempoConfig::default(),
            running: false,
            generation: 0,
            lookahead: None,
            events: VecDeque::new(),
            worker: None,
        };

        Self {
            clock,
            settings,
            inner: Arc::new(Inner {
                shared: Mutex::new(shared),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn start(&self, config: TempoConfig) -> Result<()> {
        let mut shared = self.inner.lock();
        if shared.running {
            return Err(MetronomeError::AlreadyRunning);
        }

        let clock = match &self.clock {
            Some(clock) if clock.is_ready() => Arc::clone(clock),
            Some(_) => {
                return Err(MetronomeError::audio_unavailable(
                    "audio output is no longer running",
                ))
            }
            None => {
                return Err(MetronomeError::audio_unavailable(
                    "no audio output was acquired",
                ))
            }
        };
        config.validate()?;

        let generation = shared.generation + 1;
        let inner = Arc::clone(&self.inner);
        let settings = self.settings.clone();
        let worker_clock = Arc::clone(&clock);
        let worker = thread::Builder::new()
            .name("mtrnm-scheduler".to_string())
            .spawn(move || run_scheduler(inner, worker_clock, settings, generation))?;

        let start_time = clock.now();
        shared.generation = generation;
        shared.config = config;
        shared.running = true;
        shared.lookahead = Some(Lookahead::new(start_time));
        shared.events.clear();
        shared.worker = Some(worker);

        info!(
            bpm = config.bpm(),
            beats_per_measure = config.beats_per_measure(),
            start_time,
            "metronome started"
        );
        Ok(())
    }

    /// Stop scheduling. Beats already handed to the clock may still sound.
    pub fn stop(&self) {
        let worker = {
            let mut shared = self.inner.lock();
            if !shared.running {
                return;
            }
            shared.running = false;
            shared.lookahead = None;
            shared.worker.take()
        };
        self.inner.wake.notify_all();

        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("scheduler thread panicked");
            }
        }
        info!("metronome stopped");
    }

    pub fn update_tempo(&self, bpm: f64) -> Result<()> {
        self.inner.lock().config.set_bpm(bpm)?;
        debug!(bpm, "tempo updated");
        Ok(())
    }

    pub fn update_time_signature(&self, beats_per_measure: u32) -> Result<()> {
        self.inner
            .lock()
            .config
            .set_beats_per_measure(beats_per_measure)?;
        debug!(beats_per_measure, "time signature updated");
        Ok(())
    }

    pub fn update_volume(&self, volume: f32) -> Result<()> {
        self.inner.lock().config.set_volume(volume)?;
        Ok(())
    }

    pub fn update_accent(&self, accent_first_beat: bool) {
        self.inner.lock().config.set_accent_first_beat(accent_first_beat);
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Beat position used for display; 0 while stopped.
    pub fn current_beat_in_measure(&self) -> u32 {
        self.inner
            .lock()
            .lookahead
            .as_ref()
            .map_or(0, Lookahead::current_beat_in_measure)
    }

    pub fn next_beat_index(&self) -> u64 {
        self.inner
            .lock()
            .lookahead
            .as_ref()
            .map_or(0, Lookahead::next_index)
    }

    pub fn config(&self) -> TempoConfig {
        self.inner.lock().config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The audio clock, if one was acquired.
    pub fn clock(&self) -> Option<&Arc<dyn AudioClock>> {
        self.clock.as_ref()
    }

    /// Drain the beats enqueued since the last call.
    pub fn poll_events(&self) -> Vec<BeatEvent> {
        self.inner.lock().events.drain(..).collect()
    }
}

impl Drop for BeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_scheduler(
    inner: Arc<Inner>,
    clock: Arc<dyn AudioClock>,
    settings: Settings,
    generation: u64,
) {
    let mut shared = inner.lock();
    loop {
        if !shared.running || shared.generation != generation {
            break;
        }

        let scheduled = shared.schedule_batch(clock.as_ref(), &settings);
        if scheduled > 0 {
            debug!(
                scheduled,
                next_index = shared.lookahead.as_ref().map_or(0, Lookahead::next_index),
                "beats enqueued"
            );
        }

        shared = inner
            .wake
            .wait_timeout(shared, settings.poll_interval())
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}
