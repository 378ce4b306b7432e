//! Batching engine configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::PipelineError;

/// Immutable configuration for a [`crate::batch::BatchingProcessor`].
///
/// Constructed either via [`BatchConfigBuilder`] in-process or by
/// deserializing from a host application's own config file (YAML/JSON/TOML)
/// alongside its other settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    /// Upper bound on items per emitted batch. Must be greater than zero.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Maximum age of an open batch before it is forced to flush.
    /// `Duration::ZERO` disables time-based flushing entirely.
    #[serde(default = "default_max_batch_open", deserialize_with = "duration_millis::deserialize")]
    pub max_batch_open: Duration,
    /// Concurrency cap for batch dispatch. Must be greater than zero.
    #[serde(default = "default_max_inflight_batches")]
    pub max_inflight_batches: usize,
}

fn default_max_batch_size() -> usize {
    50
}

fn default_max_batch_open() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_inflight_batches() -> usize {
    1
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_batch_open: default_max_batch_open(),
            max_inflight_batches: default_max_inflight_batches(),
        }
    }
}

impl BatchConfig {
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.max_batch_size == 0 {
            return Err(PipelineError::InvalidConfiguration {
                message: "max_batch_size must be greater than zero".to_string(),
            });
        }
        if self.max_inflight_batches == 0 {
            return Err(PipelineError::InvalidConfiguration {
                message: "max_inflight_batches must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`BatchConfig`], following the value-with-defaults idiom:
/// every field starts at its documented default and can be overridden one
/// at a time before `build()` validates the result.
#[derive(Debug, Clone)]
pub struct BatchConfigBuilder {
    inner: BatchConfig,
}

impl Default for BatchConfigBuilder {
    fn default() -> Self {
        Self {
            inner: BatchConfig::default(),
        }
    }
}

impl BatchConfigBuilder {
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.inner.max_batch_size = size;
        self
    }

    pub fn max_batch_open(mut self, duration: Duration) -> Self {
        self.inner.max_batch_open = duration;
        self
    }

    pub fn max_inflight_batches(mut self, count: usize) -> Self {
        self.inner.max_inflight_batches = count;
        self
    }

    pub fn build(self) -> Result<BatchConfig, PipelineError> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BatchConfig::default();
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.max_inflight_batches, 1);
        assert!(config.max_batch_open > Duration::ZERO);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = BatchConfig::builder()
            .max_batch_size(2)
            .max_batch_open(Duration::from_millis(500))
            .max_inflight_batches(3)
            .build()
            .unwrap();
        assert_eq!(config.max_batch_size, 2);
        assert_eq!(config.max_batch_open, Duration::from_millis(500));
        assert_eq!(config.max_inflight_batches, 3);
    }

    #[test]
    fn zero_max_batch_size_is_rejected() {
        let err = BatchConfig::builder().max_batch_size(0).build();
        assert!(err.is_err());
    }

    #[test]
    fn zero_max_inflight_is_rejected() {
        let err = BatchConfig::builder().max_inflight_batches(0).build();
        assert!(err.is_err());
    }

    #[test]
    fn deserializes_from_json_with_defaults() {
        let config: BatchConfig = serde_json::from_str(r#"{"maxBatchSize": 25}"#).unwrap();
        assert_eq!(config.max_batch_size, 25);
        assert_eq!(config.max_inflight_batches, 1);
    }
}
