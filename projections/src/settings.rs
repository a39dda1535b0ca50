//! Environment overrides for actualizer tuning.
//!
//! | Variable | Applies to |
//! |---|---|
//! | `PLOGVIEW_INTENTS_LIMIT` | [`AsyncActualizerConfig::intents_limit`] |
//! | `PLOGVIEW_BUNDLES_LIMIT` | [`AsyncActualizerConfig::bundles_limit`] |
//! | `PLOGVIEW_FLUSH_INTERVAL_MS` | [`AsyncActualizerConfig::flush_interval`] |
//! | `PLOGVIEW_FLUSH_POSITION_INTERVAL_MS` | [`AsyncActualizerConfig::flush_position_interval`] |
//! | `PLOGVIEW_ERROR_DELAY_MS` | [`AsyncActualizerConfig::error_delay`] |
//! | `PLOGVIEW_QUEUE_CAPACITY` | [`AsyncActualizerConfig::queue_capacity`] |
//!
//! Unset variables leave the configured value alone.

use crate::config::{AsyncActualizerConfig, AsyncActualizerConfigBuilder};
use std::time::Duration;
use thiserror::Error;

/// Error type for settings parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// A variable is set but its value is unusable.
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Tuning overrides read from the environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    /// Maximum intents per event.
    pub intents_limit: Option<usize>,
    /// Bundled writes that force a flush.
    pub bundles_limit: Option<usize>,
    /// Flush timer period.
    pub flush_interval: Option<Duration>,
    /// Maximum time between checkpoint writes.
    pub flush_position_interval: Option<Duration>,
    /// Delay before restarting after an error.
    pub error_delay: Option<Duration>,
    /// Reader to pipeline queue capacity.
    pub queue_capacity: Option<usize>,
}

impl Settings {
    /// Read settings from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] if a variable is set to something
    /// that is not a positive integer.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] for malformed or zero values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let count = |var: &'static str| -> Result<Option<usize>, SettingsError> {
            lookup(var).map(|value| parse_positive(var, &value)).transpose()
        };
        let millis = |var: &'static str| -> Result<Option<Duration>, SettingsError> {
            Ok(count(var)?.map(|ms| Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))))
        };

        Ok(Self {
            intents_limit: count("PLOGVIEW_INTENTS_LIMIT")?,
            bundles_limit: count("PLOGVIEW_BUNDLES_LIMIT")?,
            flush_interval: millis("PLOGVIEW_FLUSH_INTERVAL_MS")?,
            flush_position_interval: millis("PLOGVIEW_FLUSH_POSITION_INTERVAL_MS")?,
            error_delay: millis("PLOGVIEW_ERROR_DELAY_MS")?,
            queue_capacity: count("PLOGVIEW_QUEUE_CAPACITY")?,
        })
    }

    /// Apply the overrides to a configuration builder.
    #[must_use]
    pub fn apply(&self, mut builder: AsyncActualizerConfigBuilder) -> AsyncActualizerConfigBuilder {
        if let Some(limit) = self.intents_limit {
            builder = builder.intents_limit(limit);
        }
        if let Some(limit) = self.bundles_limit {
            builder = builder.bundles_limit(limit);
        }
        if let Some(interval) = self.flush_interval {
            builder = builder.flush_interval(interval);
        }
        if let Some(interval) = self.flush_position_interval {
            builder = builder.flush_position_interval(interval);
        }
        if let Some(delay) = self.error_delay {
            builder = builder.error_delay(delay);
        }
        if let Some(capacity) = self.queue_capacity {
            builder = builder.queue_capacity(capacity);
        }
        builder
    }

    /// Apply the overrides to a finished configuration.
    #[must_use]
    pub fn apply_to(&self, config: &AsyncActualizerConfig) -> AsyncActualizerConfig {
        let builder = AsyncActualizerConfig::builder(config.app.clone(), config.partition)
            .intents_limit(config.intents_limit)
            .bundles_limit(config.bundles_limit)
            .flush_interval(config.flush_interval)
            .flush_position_interval(config.flush_position_interval)
            .error_delay(config.error_delay)
            .queue_capacity(config.queue_capacity);
        self.apply(builder).build()
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<usize, SettingsError> {
    let invalid = |reason: String| SettingsError::Invalid {
        var,
        value: value.to_string(),
        reason,
    };
    let parsed: usize = value.trim().parse().map_err(|e| invalid(format!("{e}")))?;
    if parsed == 0 {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(parsed)
}
