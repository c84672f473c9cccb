/// Audio output using cpal - the rendered frame count is the audio clock
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

use crate::clock::AudioClock;
use crate::error::{MetronomeError, Result};
use crate::settings::Settings;

/// Decay constant of the click envelope over its full length.
const CLICK_DECAY: f32 = 5.0;

/// One click tone, positioned on the absolute frame timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickVoice {
    start_frame: u64,
    length: u64,
    frequency: f32,
    amplitude: f32,
}

impl ClickVoice {
    pub fn new(start_frame: u64, length: u64, frequency: f32, amplitude: f32) -> Self {
        Self {
            start_frame,
            length: length.max(1),
            frequency,
            amplitude,
        }
    }

    /// Sine burst with exponential decay; silent outside the voice.
    pub fn sample_at(&self, frame: u64, sample_rate: f32) -> f32 {
        if frame < self.start_frame || self.is_finished(frame) {
            return 0.0;
        }

        let offset = (frame - self.start_frame) as f32;
        let t = offset / sample_rate;
        let envelope = (-CLICK_DECAY * offset / self.length as f32).exp();
        (t * self.frequency * std::f32::consts::TAU).sin() * envelope * self.amplitude
    }

    pub fn is_finished(&self, frame: u64) -> bool {
        frame >= self.start_frame + self.length
    }
}

/// State shared by the stream callback and every clock handle.
struct ClockState {
    sample_rate: f64,
    frames_rendered: AtomicU64,
    pending: Mutex<Vec<ClickVoice>>,
    ready: AtomicBool,
}

impl ClockState {
    fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            frames_rendered: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
            ready: AtomicBool::new(true),
        }
    }
}

/// Runs inside the audio callback, mixing queued clicks into each buffer.
struct ClickMixer {
    state: Arc<ClockState>,
    voices: Vec<ClickVoice>,
}

impl ClickMixer {
    fn new(state: Arc<ClockState>) -> Self {
        Self {
            state,
            voices: Vec::with_capacity(16),
        }
    }

    fn render(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let buffer_start = self.state.frames_rendered.load(Ordering::Acquire);

        {
            let mut pending = self
                .state
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for mut voice in pending.drain(..) {
                // Late clicks play at once rather than being cut short.
                voice.start_frame = voice.start_frame.max(buffer_start);
                self.voices.push(voice);
            }
        }

        let sample_rate = self.state.sample_rate as f32;
        for (i, frame) in data.chunks_mut(channels).enumerate() {
            let position = buffer_start + i as u64;
            let value: f32 = self
                .voices
                .iter()
                .map(|voice| voice.sample_at(position, sample_rate))
                .sum();
            let value = value.clamp(-1.0, 1.0);
            for sample in frame.iter_mut() {
                *sample = value;
            }
        }

        let frames = (data.len() / channels) as u64;
        let buffer_end = buffer_start + frames;
        self.voices.retain(|voice| !voice.is_finished(buffer_end));
        self.state
            .frames_rendered
            .store(buffer_end, Ordering::Release);
    }
}

/// Thread-safe handle onto a running cpal stream's clock.
pub struct CpalClock {
    state: Arc<ClockState>,
    accent_frequency: f32,
    beat_frequency: f32,
}

impl CpalClock {
    fn new(state: Arc<ClockState>, settings: &Settings) -> Self {
        Self {
            state,
            accent_frequency: settings.accent_frequency,
            beat_frequency: settings.beat_frequency,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.state.sample_rate
    }
}

impl AudioClock for CpalClock {
    fn now(&self) -> f64 {
        self.state.frames_rendered.load(Ordering::Acquire) as f64 / self.state.sample_rate
    }

    fn schedule_tone(&self, time: f64, accent: bool, duration: f64, amplitude: f32) {
        if amplitude <= 0.0 {
            return;
        }

        let sample_rate = self.state.sample_rate;
        let start_frame = (time * sample_rate).round().max(0.0) as u64;
        let length = (duration * sample_rate).round().max(1.0) as u64;
        let frequency = if accent {
            self.accent_frequency
        } else {
            self.beat_frequency
        };

        self.state
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ClickVoice::new(start_frame, length, frequency, amplitude));
    }

    fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::Acquire)
    }
}

/// Owns the output stream. Keep it alive on the thread that opened it; the
/// clock handles stop reporting ready once it is dropped.
pub struct AudioOutput {
    _stream: cpal::Stream,
    clock: Arc<CpalClock>,
}

impl AudioOutput {
    pub fn open(settings: &Settings) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| MetronomeError::audio_unavailable("no default output device"))?;
        let config = device.default_output_config().map_err(|e| {
            MetronomeError::audio_unavailable(format!("no output config: {}", e))
        })?;

        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(MetronomeError::audio_unavailable(format!(
                "unsupported sample format {:?}",
                config.sample_format()
            )));
        }

        let sample_rate = config.sample_rate().0;
        let channels = usize::from(config.channels());
        let state = Arc::new(ClockState::new(f64::from(sample_rate)));
        let mut mixer = ClickMixer::new(Arc::clone(&state));
        let error_state = Arc::clone(&state);

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mixer.render(data, channels);
                },
                move |err| {
                    error!(error = %err, "audio stream error");
                    error_state.ready.store(false, Ordering::Release);
                },
                None,
            )
            .map_err(|e| MetronomeError::audio_unavailable(format!("build stream failed: {}", e)))?;
        stream
            .play()
            .map_err(|e| MetronomeError::audio_unavailable(format!("play stream failed: {}", e)))?;

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!(device = %device_name, sample_rate, channels, "audio output opened");

        Ok(Self {
            _stream: stream,
            clock: Arc::new(CpalClock::new(state, settings)),
        })
    }

    pub fn clock(&self) -> Arc<dyn AudioClock> {
        self.clock.clone()
    }

    pub fn sample_rate(&self) -> f64 {
        self.clock.sample_rate()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.clock.state.ready.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f64 = 48_000.0;

    fn offline() -> (CpalClock, ClickMixer) {
        let state = Arc::new(ClockState::new(RATE));
        let clock = CpalClock::new(Arc::clone(&state), &Settings::default());
        (clock, ClickMixer::new(state))
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0, |max, s| max.max(s.abs()))
    }

    #[test]
    fn test_clock_counts_rendered_frames() {
        let (clock, mut mixer) = offline();
        assert_eq!(clock.now(), 0.0);

        let mut buffer = vec![0.0; 4800];
        mixer.render(&mut buffer, 1);
        assert!((clock.now() - 0.1).abs() < 1e-12);

        let mut stereo = vec![0.0; 9600];
        mixer.render(&mut stereo, 2);
        assert!((clock.now() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_click_starts_at_its_frame() {
        let (clock, mut mixer) = offline();
        clock.schedule_tone(0.01, true, 0.03, 0.5);

        let mut buffer = vec![1.0; 4800];
        mixer.render(&mut buffer, 1);

        assert!(buffer[..480].iter().all(|&s| s == 0.0));
        let burst = peak(&buffer[480..480 + 1440]);
        assert!(burst > 0.05);
        assert!(burst <= 0.5);
        assert!(buffer[480 + 1440..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_late_click_plays_immediately() {
        let (clock, mut mixer) = offline();
        let mut buffer = vec![0.0; 480];
        mixer.render(&mut buffer, 1);

        clock.schedule_tone(0.0, false, 0.03, 0.8);
        mixer.render(&mut buffer, 1);
        assert!(peak(&buffer[..100]) > 0.05);
    }

    #[test]
    fn test_channels_carry_same_sample() {
        let (clock, mut mixer) = offline();
        clock.schedule_tone(0.0, true, 0.03, 1.0);

        let mut buffer = vec![0.0; 2 * 960];
        mixer.render(&mut buffer, 2);
        for frame in buffer.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert!(peak(&buffer) > 0.1);
    }

    #[test]
    fn test_silent_tones_are_dropped() {
        let (clock, mut mixer) = offline();
        clock.schedule_tone(0.0, true, 0.03, 0.0);

        let mut buffer = vec![0.0; 960];
        mixer.render(&mut buffer, 1);
        assert_eq!(peak(&buffer), 0.0);
        assert!(mixer.voices.is_empty());
    }

    #[test]
    fn test_finished_voices_are_released() {
        let (clock, mut mixer) = offline();
        clock.schedule_tone(0.0, true, 0.01, 1.0);

        let mut buffer = vec![0.0; 4800];
        mixer.render(&mut buffer, 1);
        assert!(mixer.voices.is_empty());
    }

    #[test]
    fn test_voice_envelope_decays() {
        let voice = ClickVoice::new(100, 1000, 440.0, 1.0);
        assert_eq!(voice.sample_at(99, 48_000.0), 0.0);
        assert_eq!(voice.sample_at(1100, 48_000.0), 0.0);
        assert!(voice.is_finished(1100));

        let early = peak(&(100..300).map(|f| voice.sample_at(f, 48_000.0)).collect::<Vec<_>>());
        let late = peak(&(900..1100).map(|f| voice.sample_at(f, 48_000.0)).collect::<Vec<_>>());
        assert!(early > late);
    }
}
