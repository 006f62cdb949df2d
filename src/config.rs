//! Application configuration
//!
//! Loaded from `<config-dir>/pdfmill/config.yaml`. Every field has a default
//! so a missing or partial file works; a malformed file logs a warning and
//! falls back to defaults rather than refusing to start.

use std::path::PathBuf;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::task::DEFAULT_CANCEL_GRACE;
use crate::task::preflight::SizeLimits;
use crate::task::progress::{DEFAULT_MIN_INTERVAL, DEFAULT_MIN_STEP, ProgressThrottle};
use crate::undo::UndoConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub limits: SizeLimits,
    #[serde(default)]
    pub undo: UndoConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Seconds after a cancel in which a fresh output file is removed
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
}

fn default_cancel_grace_secs() -> u64 {
    DEFAULT_CANCEL_GRACE.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: SizeLimits::default(),
            undo: UndoConfig::default(),
            throttle: ThrottleConfig::default(),
            cancel_grace_secs: default_cancel_grace_secs(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    /// Read the user config, falling back to defaults on any problem
    #[must_use]
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    #[must_use]
    pub fn load_from(path: &std::path::Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("cannot read {}: {e}; using defaults", path.display());
                return Self::default();
            }
        };
        match serde_yaml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("malformed config {}: {e}; using defaults", path.display());
                Self::default()
            }
        }
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("pdfmill").join("config.yaml"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_min_step")]
    pub min_step: u8,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_min_step() -> u8 {
    DEFAULT_MIN_STEP
}

fn default_min_interval_ms() -> u64 {
    DEFAULT_MIN_INTERVAL.as_millis() as u64
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_step: DEFAULT_MIN_STEP,
            min_interval_ms: DEFAULT_MIN_INTERVAL.as_millis() as u64,
        }
    }
}

impl ThrottleConfig {
    #[must_use]
    pub fn build(&self) -> ProgressThrottle {
        ProgressThrottle::new(self.min_step, Duration::from_millis(self.min_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "undo:\n  max_history: 5\n").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.undo.max_history, 5);
        assert_eq!(config.undo.max_age_hours, 24);
        assert_eq!(config.limits.min_pdf_size, crate::task::MIN_PDF_SIZE);
        assert_eq!(config.throttle.min_step, 1);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.yaml"));
        assert_eq!(config.cancel_grace(), DEFAULT_CANCEL_GRACE);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "limits: [this is not a map]").unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config.undo.max_history, 50);
    }
}
