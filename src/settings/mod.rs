/// Scheduler timing and click voicing, loadable from a TOML file
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{MetronomeError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How far ahead of the audio clock beats are enqueued.
    pub lookahead_secs: f64,
    /// Wake-up period of the scheduling thread.
    pub poll_interval_ms: u64,
    pub click_duration_secs: f64,
    pub accent_frequency: f32,
    pub beat_frequency: f32,
    /// Beat events kept for `poll_events` before the oldest are dropped.
    pub event_backlog: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lookahead_secs: 0.1,
            poll_interval_ms: 25,
            click_duration_secs: 0.03,
            accent_frequency: 1000.0,
            beat_frequency: 800.0,
            event_backlog: 256,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)
            .map_err(|e| MetronomeError::Config(format!("parse TOML failed: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| MetronomeError::Config(format!("serialize TOML failed: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lookahead_secs.is_finite() && self.lookahead_secs > 0.0) {
            return Err(MetronomeError::Config(format!(
                "lookahead_secs must be positive, got {}",
                self.lookahead_secs
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(MetronomeError::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if !(self.click_duration_secs.is_finite() && self.click_duration_secs > 0.0) {
            return Err(MetronomeError::Config(format!(
                "click_duration_secs must be positive, got {}",
                self.click_duration_secs
            )));
        }
        for frequency in [self.accent_frequency, self.beat_frequency] {
            if !(frequency.is_finite() && frequency > 0.0) {
                return Err(MetronomeError::Config(format!(
                    "click frequencies must be positive, got {}",
                    frequency
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_use_defaults() {
        let settings = Settings::from_toml_str("poll_interval_ms = 10").unwrap();
        assert_eq!(settings.poll_interval_ms, 10);
        assert_eq!(settings.lookahead_secs, 0.1);
        assert_eq!(settings.event_backlog, 256);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut settings = Settings::default();
        settings.accent_frequency = 1500.0;
        let text = settings.to_toml_string().unwrap();
        assert_eq!(Settings::from_toml_str(&text).unwrap(), settings);
    }

    #[test]
    fn test_rejects_non_positive_timing() {
        assert!(matches!(
            Settings::from_toml_str("lookahead_secs = 0.0"),
            Err(MetronomeError::Config(_))
        ));
        assert!(Settings::from_toml_str("poll_interval_ms = 0").is_err());
        assert!(Settings::from_toml_str("lookahead_secs = \"soon\"").is_err());
    }

    #[test]
    fn test_rejects_non_finite_values() {
        let mut settings = Settings::default();
        settings.accent_frequency = f32::NAN;
        assert!(matches!(settings.validate(), Err(MetronomeError::Config(_))));

        let mut settings = Settings::default();
        settings.beat_frequency = f32::INFINITY;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.lookahead_secs = f64::NAN;
        assert!(settings.validate().is_err());

        assert!(Settings::from_toml_str("beat_frequency = nan").is_err());
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Settings::load(Path::new("/nonexistent/mtrnm.toml"));
        assert!(matches!(result, Err(MetronomeError::Io(_))));
    }
}
