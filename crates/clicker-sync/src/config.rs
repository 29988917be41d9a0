//! Session configuration, loadable from YAML.

use clicker_econ::CLICK_GAIN;
use clicker_store::{CollectionPaths, DEFAULT_APP_ID};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Timing and namespacing for one client session. Every field has a default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Namespace for the shared collections.
    pub app_id: String,
    /// Economy tick period.
    pub tick_interval_ms: u64,
    /// Write-back period.
    pub flush_interval_ms: u64,
    /// Most recent chat messages kept in view.
    pub chat_window: usize,
    /// Score per manual click.
    pub click_gain: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            tick_interval_ms: 1_000,
            flush_interval_ms: 2_000,
            chat_window: 50,
            click_gain: CLICK_GAIN,
        }
    }
}

impl SessionConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 || self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("intervals must be > 0".into()));
        }
        if self.chat_window == 0 {
            return Err(ConfigError::Invalid("chat_window must be > 0".into()));
        }
        if !self.click_gain.is_finite() || self.click_gain <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "click_gain must be finite and > 0, got {}",
                self.click_gain
            )));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn paths(&self) -> CollectionPaths {
        CollectionPaths::for_app(&self.app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_cadence() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.tick_interval(), Duration::from_secs(1));
        assert_eq!(cfg.flush_interval(), Duration::from_secs(2));
        assert_eq!(cfg.chat_window, 50);
        assert_eq!(cfg.click_gain, CLICK_GAIN);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg = SessionConfig::from_yaml_str("app_id: retro/ignored\nflush_interval_ms: 500\n")
            .unwrap();
        assert_eq!(cfg.flush_interval_ms, 500);
        assert_eq!(cfg.tick_interval_ms, 1_000);
        assert_eq!(cfg.paths().players, "artifacts/retro/public/data/scores");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            SessionConfig::from_yaml_str("tick_interval_ms: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_yaml_str("chat_window: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_yaml_str("click_gain: -1.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_yaml_str("tick_interval_ms: [1]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            SessionConfig::load("/nonexistent/clicker.yaml"),
            Err(ConfigError::Io(_))
        ));
    }
}
