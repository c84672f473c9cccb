/// Tempo configuration - the caller-owned knobs the scheduler reads on every batch
use serde::{Deserialize, Serialize};

use crate::error::{MetronomeError, Result};

pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 240.0;
pub const MAX_BEATS_PER_MEASURE: u32 = 16;

/// Time signatures offered by the UI.
pub const COMMON_TIME_SIGNATURES: [u32; 4] = [2, 3, 4, 6];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    bpm: f64,
    beats_per_measure: u32,
    accent_first_beat: bool,
    volume: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            beats_per_measure: 4,
            accent_first_beat: true,
            volume: 0.8,
        }
    }
}

impl TempoConfig {
    pub fn new(bpm: f64, beats_per_measure: u32) -> Result<Self> {
        Ok(Self {
            bpm: validate_bpm(bpm)?,
            beats_per_measure: validate_beats(beats_per_measure)?,
            ..Self::default()
        })
    }

    pub fn with_accent(mut self, accent_first_beat: bool) -> Self {
        self.accent_first_beat = accent_first_beat;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Result<Self> {
        self.volume = validate_volume(volume)?;
        Ok(self)
    }

    /// Re-checks every field; configs that came through serde skip the constructors.
    pub fn validate(&self) -> Result<()> {
        validate_bpm(self.bpm)?;
        validate_beats(self.beats_per_measure)?;
        validate_volume(self.volume)?;
        Ok(())
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        self.bpm = validate_bpm(bpm)?;
        Ok(())
    }

    pub fn beats_per_measure(&self) -> u32 {
        self.beats_per_measure
    }

    pub fn set_beats_per_measure(&mut self, beats: u32) -> Result<()> {
        self.beats_per_measure = validate_beats(beats)?;
        Ok(())
    }

    pub fn accent_first_beat(&self) -> bool {
        self.accent_first_beat
    }

    pub fn set_accent_first_beat(&mut self, accent: bool) {
        self.accent_first_beat = accent;
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.volume = validate_volume(volume)?;
        Ok(())
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Position of beat `index` within its measure.
    pub fn beat_in_measure(&self, index: u64) -> u32 {
        (index % u64::from(self.beats_per_measure)) as u32
    }

    pub fn is_accent(&self, index: u64) -> bool {
        self.accent_first_beat && self.beat_in_measure(index) == 0
    }
}

fn validate_bpm(bpm: f64) -> Result<f64> {
    if bpm.is_finite() && (MIN_BPM..=MAX_BPM).contains(&bpm) {
        Ok(bpm)
    } else {
        Err(MetronomeError::InvalidTempo(bpm))
    }
}

fn validate_beats(beats: u32) -> Result<u32> {
    if (1..=MAX_BEATS_PER_MEASURE).contains(&beats) {
        Ok(beats)
    } else {
        Err(MetronomeError::InvalidTimeSignature(beats))
    }
}

fn validate_volume(volume: f32) -> Result<f32> {
    if volume.is_finite() && (0.0..=1.0).contains(&volume) {
        Ok(volume)
    } else {
        Err(MetronomeError::InvalidVolume(volume))
    }
}

/// One scheduled click, handed to the audio clock ahead of time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatEvent {
    /// Audio-clock time in seconds.
    pub time: f64,
    /// Count of events scheduled before this one since start.
    pub index: u64,
    pub beat_in_measure: u32,
    pub accent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TempoConfig::default();
        assert_eq!(config.bpm(), 120.0);
        assert_eq!(config.beats_per_measure(), 4);
        assert!(config.accent_first_beat());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_tempo() {
        assert!(matches!(
            TempoConfig::new(39.9, 4),
            Err(MetronomeError::InvalidTempo(_))
        ));
        assert!(matches!(
            TempoConfig::new(241.0, 4),
            Err(MetronomeError::InvalidTempo(_))
        ));
        assert!(TempoConfig::new(f64::NAN, 4).is_err());
        assert!(TempoConfig::new(40.0, 4).is_ok());
        assert!(TempoConfig::new(240.0, 4).is_ok());
    }

    #[test]
    fn test_failed_update_leaves_value() {
        let mut config = TempoConfig::new(90.0, 3).unwrap();
        assert!(config.set_bpm(500.0).is_err());
        assert_eq!(config.bpm(), 90.0);
        assert!(config.set_beats_per_measure(0).is_err());
        assert_eq!(config.beats_per_measure(), 3);
        assert!(config.set_volume(1.5).is_err());
        assert_eq!(config.volume(), 0.8);
    }

    #[test]
    fn test_accent_placement() {
        let config = TempoConfig::new(120.0, 3).unwrap();
        let accents: Vec<u64> = (0..10).filter(|&i| config.is_accent(i)).collect();
        assert_eq!(accents, vec![0, 3, 6, 9]);

        let unaccented = config.with_accent(false);
        assert!((0..10).all(|i| !unaccented.is_accent(i)));
    }

    #[test]
    fn test_seconds_per_beat() {
        let config = TempoConfig::new(60.0, 4).unwrap();
        assert_eq!(config.seconds_per_beat(), 1.0);
    }

    #[test]
    fn test_deserialized_config_is_checked() {
        let config: TempoConfig = toml::from_str("bpm = 300.0").unwrap();
        assert!(config.validate().is_err());
        assert_eq!(config.beats_per_measure(), 4);
    }
}
