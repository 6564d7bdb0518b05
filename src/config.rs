//! Configuration for the icefall sink writer.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for one writer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Interval between periodic bucket inspections, in milliseconds.
    #[serde(default = "default_bucket_check_interval_ms")]
    pub bucket_check_interval_ms: i64,
    /// Id of this parallel writer instance.
    #[serde(default)]
    pub subtask_id: u32,
    /// Capacity of the element channel when driven by the async adapter.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_bucket_check_interval_ms() -> i64 {
    60_000
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            bucket_check_interval_ms: default_bucket_check_interval_ms(),
            subtask_id: 0,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl WriterConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile { source })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: WriterConfig =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_check_interval_ms <= 0 {
            return Err(ConfigError::NonPositiveCheckInterval {
                value: self.bucket_check_interval_ms,
            });
        }
        Ok(())
    }
}
