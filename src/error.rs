/// Error types for the metronome core and its audio/MIDI backends
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetronomeError>;

#[derive(Debug, Error)]
pub enum MetronomeError {
    /// `start()` was called while the scheduler was already running.
    #[error("metronome is already running")]
    AlreadyRunning,

    /// No audio clock could be acquired, or the acquired one stopped working.
    #[error("audio output unavailable: {0}")]
    AudioUnavailable(String),

    #[error("tempo {0} BPM is outside the supported range")]
    InvalidTempo(f64),

    #[error("{0} beats per measure is not a supported time signature")]
    InvalidTimeSignature(u32),

    #[error("volume {0} is outside [0, 1]")]
    InvalidVolume(f32),

    #[error("MIDI error: {0}")]
    Midi(String),

    #[error("GUI error: {0}")]
    Gui(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetronomeError {
    pub fn audio_unavailable(reason: impl Into<String>) -> Self {
        Self::AudioUnavailable(reason.into())
    }
}
