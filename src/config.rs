//! Pacer configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PacerError;

/// Pacer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Target dispatches per second at startup
    #[serde(rename = "initial-rate", default = "default_initial_rate")]
    pub initial_rate: u32,

    /// Lower bound for the target rate
    #[serde(rename = "min-rate", default)]
    pub min_rate: u32,

    /// Upper bound for the target rate; defaults to twice the initial rate
    #[serde(rename = "max-rate", default)]
    pub max_rate: Option<u32>,

    /// Efficiency sampling window in milliseconds
    #[serde(rename = "sample-interval-ms", default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

fn default_initial_rate() -> u32 {
    10
}

fn default_sample_interval_ms() -> u64 {
    1_000
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            initial_rate: default_initial_rate(),
            min_rate: 0,
            max_rate: None,
            sample_interval_ms: default_sample_interval_ms(),
        }
    }
}

impl PacerConfig {
    /// Create a configuration with the given initial rate and default bounds
    pub fn new(initial_rate: u32) -> Self {
        Self {
            initial_rate,
            ..Default::default()
        }
    }

    /// The upper bound in effect: explicit `max-rate`, or twice the initial rate
    pub fn effective_max(&self) -> u32 {
        self.max_rate
            .unwrap_or_else(|| self.initial_rate.saturating_mul(2))
    }

    /// The sampling window as a Duration
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Validate configuration before use
    ///
    /// A zero initial rate would make the pacing interval infinite, so it is
    /// rejected here rather than guessed around at dispatch time. Call this
    /// early (spawn does) to fail fast with a clear error.
    pub fn validate(&self) -> Result<(), PacerError> {
        if self.initial_rate == 0 {
            return Err(PacerError::ZeroRate);
        }
        if self.min_rate > self.initial_rate {
            return Err(PacerError::MinAboveInitial {
                min: self.min_rate,
                initial: self.initial_rate,
            });
        }
        if let Some(max) = self.max_rate {
            if max < self.initial_rate {
                return Err(PacerError::MaxBelowInitial {
                    max,
                    initial: self.initial_rate,
                });
            }
        }
        if self.sample_interval_ms == 0 {
            return Err(PacerError::ZeroSampleInterval);
        }
        Ok(())
    }

    /// Load configuration, falling back from explicit path to `.pacer.yml`
    /// in the working directory to the user config dir, then to defaults
    ///
    /// An explicit path that fails to load is an error; a broken file further
    /// down the chain only logs a warning and the search continues.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).with_context(|| format!("unreadable config at {}", path.display()));
        }

        let candidates = std::iter::once(PathBuf::from(".pacer.yml"))
            .chain(dirs::config_dir().map(|dir| dir.join("pacer").join("pacer.yml")));

        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!(path = %candidate.display(), error = %e, "skipping unreadable config");
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("reading config file")?;
        let config: Self = serde_yaml::from_str(&content).context("parsing config file")?;

        tracing::info!(path = %path.as_ref().display(), "loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PacerConfig::default();
        assert_eq!(config.initial_rate, 10);
        assert_eq!(config.min_rate, 0);
        assert_eq!(config.max_rate, None);
        assert_eq!(config.sample_interval_ms, 1_000);
    }

    #[test]
    fn test_effective_max_defaults_to_double() {
        let config = PacerConfig::new(10);
        assert_eq!(config.effective_max(), 20);

        let config = PacerConfig {
            max_rate: Some(15),
            ..PacerConfig::new(10)
        };
        assert_eq!(config.effective_max(), 15);
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let config = PacerConfig::new(0);
        assert!(matches!(config.validate(), Err(PacerError::ZeroRate)));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let config = PacerConfig {
            min_rate: 11,
            ..PacerConfig::new(10)
        };
        assert!(matches!(config.validate(), Err(PacerError::MinAboveInitial { .. })));

        let config = PacerConfig {
            max_rate: Some(9),
            ..PacerConfig::new(10)
        };
        assert!(matches!(config.validate(), Err(PacerError::MaxBelowInitial { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_sample_interval() {
        let config = PacerConfig {
            sample_interval_ms: 0,
            ..PacerConfig::new(10)
        };
        assert!(matches!(config.validate(), Err(PacerError::ZeroSampleInterval)));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(PacerConfig::new(10).validate().is_ok());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "initial-rate: 25").unwrap();
        writeln!(file, "min-rate: 5").unwrap();
        writeln!(file, "max-rate: 100").unwrap();
        writeln!(file, "sample-interval-ms: 500").unwrap();

        let path = file.path().to_path_buf();
        let config = PacerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.initial_rate, 25);
        assert_eq!(config.min_rate, 5);
        assert_eq!(config.max_rate, Some(100));
        assert_eq!(config.sample_interval_ms, 500);
    }

    #[test]
    fn test_load_partial_yaml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "initial-rate: 7").unwrap();

        let path = file.path().to_path_buf();
        let config = PacerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.initial_rate, 7);
        assert_eq!(config.min_rate, 0);
        assert_eq!(config.sample_interval_ms, 1_000);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/pacer.yml");
        assert!(PacerConfig::load(Some(&path)).is_err());
    }
}
