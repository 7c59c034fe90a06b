//! Top-level configuration.
//!
//! Every field defaults to the values in [`crate::constants`]; a host can
//! override any subset from JSON.

use serde::{Deserialize, Serialize};

use crate::constants::QUERY_TIMEOUT_SECS;
use crate::error::{NarratorError, Result};
use crate::playback::PlaybackConfig;
use crate::sampler::SamplerConfig;

/// Configuration for a narrator session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NarratorConfig {
    pub sampler: SamplerConfig,
    pub playback: PlaybackConfig,
    pub query: QueryConfig,
}

/// Feature query settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Server-side timeout requested from the feature source. Default: 25
    pub timeout_secs: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: QUERY_TIMEOUT_SECS,
        }
    }
}

impl NarratorConfig {
    /// Parse a (possibly partial) JSON configuration and validate it.
    ///
    /// # Example
    /// ```
    /// use route_narrator::NarratorConfig;
    ///
    /// let config = NarratorConfig::from_json(r#"{"playback": {"cooldown_ms": 5000}}"#).unwrap();
    /// assert_eq!(config.playback.cooldown_ms, 5000);
    /// assert_eq!(config.sampler.min_samples, 4);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NarratorConfig =
            serde_json::from_str(json).map_err(|e| NarratorError::ConfigError {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sampler.validate()?;
        self.playback.validate()?;
        if self.query.timeout_secs == 0 {
            return Err(NarratorError::ConfigError {
                message: "query timeout must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(NarratorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_override() {
        let config = NarratorConfig::from_json(
            r#"{"sampler": {"max_samples": 14}, "query": {"timeout_secs": 60}}"#,
        )
        .unwrap();
        assert_eq!(config.sampler.max_samples, 14);
        assert_eq!(config.sampler.min_samples, 4);
        assert_eq!(config.query.timeout_secs, 60);
        assert_eq!(config.playback, PlaybackConfig::default());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            NarratorConfig::from_json("{not json"),
            Err(NarratorError::ConfigError { .. })
        ));
        assert!(NarratorConfig::from_json(r#"{"playback": {"tick_interval_ms": 0}}"#).is_err());
        assert!(NarratorConfig::from_json(r#"{"sampler": {"min_samples": 99}}"#).is_err());
    }
}
