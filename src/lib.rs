/// MTRNM - A drift-free metronome library
///
/// This library provides the core components for building a metronome:
/// - Lookahead beat scheduling against a precise audio clock
/// - Audio output through cpal, where the rendered frame count is the clock
/// - MIDI output for driving external sound modules
/// - Validated tempo configuration and TOML-loadable scheduler settings

pub mod audio;
pub mod clock;
pub mod error;
pub mod midi;
pub mod scheduler;
pub mod settings;
pub mod tempo;

// Re-export commonly used types
pub use audio::{AudioOutput, CpalClock};
pub use clock::{AudioClock, ManualClock, ScheduledTone};
pub use error::{MetronomeError, Result};
pub use midi::{midi_note_name, MidiClock};
pub use scheduler::{BeatFollower, BeatScheduler, Lookahead};
pub use settings::Settings;
pub use tempo::{BeatEvent, TempoConfig, COMMON_TIME_SIGNATURES, MAX_BPM, MIN_BPM};
