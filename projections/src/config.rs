//! Actualizer configuration.
//!
//! Configuration is fixed at construction. Zero limits and zero durations
//! passed to the builders fall back to the documented defaults.

use plogview_core::intents::DEFAULT_INTENTS_LIMIT;
use plogview_core::{AppQName, Offset, PartitionId, ProjectionKey, QName, SecretReader, WorkspaceId};
use std::sync::Arc;
use std::time::Duration;

/// Default number of bundled view writes that forces a flush.
pub const DEFAULT_BUNDLES_LIMIT: usize = 100;

/// Default period of the flush timer.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Default maximum time between checkpoint writes while events are skipped.
pub const DEFAULT_FLUSH_POSITION_INTERVAL: Duration = Duration::from_secs(60);

/// Default delay before an actualizer restarts after an error.
pub const DEFAULT_ERROR_DELAY: Duration = Duration::from_secs(30);

/// Default number of workpieces queued between the reader and the pipeline.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Number of events read from the log per request.
pub const PLOG_READ_BATCH_SIZE: usize = 50;

/// Configuration of one async actualizer.
///
/// # Example
///
/// ```
/// use plogview_core::{AppQName, PartitionId};
/// use plogview_projections::AsyncActualizerConfig;
/// use std::time::Duration;
///
/// let config = AsyncActualizerConfig::builder(AppQName::new("acme", "shop"), PartitionId::new(1))
///     .bundles_limit(1)
///     .flush_interval(Duration::from_millis(10))
///     .build();
///
/// assert_eq!(config.bundles_limit, 1);
/// assert_eq!(config.intents_limit, 100);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsyncActualizerConfig {
    /// Application the actualizer belongs to.
    pub app: AppQName,
    /// Partition whose log is read.
    pub partition: PartitionId,
    /// Maximum intents a single event may produce.
    pub intents_limit: usize,
    /// Bundled writes that force a flush.
    pub bundles_limit: usize,
    /// Flush timer period.
    pub flush_interval: Duration,
    /// Maximum time between checkpoint writes.
    pub flush_position_interval: Duration,
    /// Delay before restarting after an error.
    pub error_delay: Duration,
    /// Capacity of the reader to pipeline queue.
    pub queue_capacity: usize,
}

impl AsyncActualizerConfig {
    /// Start building a configuration with defaults.
    #[must_use]
    pub fn builder(app: AppQName, partition: PartitionId) -> AsyncActualizerConfigBuilder {
        AsyncActualizerConfigBuilder {
            config: Self {
                app,
                partition,
                intents_limit: DEFAULT_INTENTS_LIMIT,
                bundles_limit: DEFAULT_BUNDLES_LIMIT,
                flush_interval: DEFAULT_FLUSH_INTERVAL,
                flush_position_interval: DEFAULT_FLUSH_POSITION_INTERVAL,
                error_delay: DEFAULT_ERROR_DELAY,
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
            },
        }
    }

    /// Same configuration for another partition.
    #[must_use]
    pub fn for_partition(&self, partition: PartitionId) -> Self {
        Self {
            partition,
            ..self.clone()
        }
    }

    /// Broker key announcing new events in this partition's log.
    #[must_use]
    pub fn plog_key(&self) -> ProjectionKey {
        ProjectionKey::plog_updates(self.app.clone(), self.partition)
    }
}

/// Builder for [`AsyncActualizerConfig`].
#[derive(Clone, Debug)]
pub struct AsyncActualizerConfigBuilder {
    config: AsyncActualizerConfig,
}

impl AsyncActualizerConfigBuilder {
    /// Maximum intents per event (0 keeps the default).
    #[must_use]
    pub const fn intents_limit(mut self, limit: usize) -> Self {
        if limit > 0 {
            self.config.intents_limit = limit;
        }
        self
    }

    /// Bundled writes that force a flush (0 keeps the default).
    #[must_use]
    pub const fn bundles_limit(mut self, limit: usize) -> Self {
        if limit > 0 {
            self.config.bundles_limit = limit;
        }
        self
    }

    /// Flush timer period (zero keeps the default).
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.config.flush_interval = interval;
        }
        self
    }

    /// Maximum time between checkpoint writes (zero keeps the default).
    #[must_use]
    pub const fn flush_position_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.config.flush_position_interval = interval;
        }
        self
    }

    /// Delay before restarting after an error.
    ///
    /// Zero is allowed and means "retry at once".
    #[must_use]
    pub const fn error_delay(mut self, delay: Duration) -> Self {
        self.config.error_delay = delay;
        self
    }

    /// Reader to pipeline queue capacity (0 keeps the default).
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        if capacity > 0 {
            self.config.queue_capacity = capacity;
        }
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> AsyncActualizerConfig {
        self.config
    }
}

/// Callback fired after a sync commit for every changed `(view, workspace)`.
pub type ViewNotifier = Arc<dyn Fn(&QName, WorkspaceId, Offset) + Send + Sync>;

/// Configuration of a sync actualizer.
#[derive(Clone)]
pub struct SyncActualizerConfig {
    /// Partition the actualizer serves.
    pub partition: PartitionId,
    /// Maximum intents per event per projector.
    pub intents_limit: usize,
    /// Secrets available to projectors.
    pub secrets: Option<Arc<dyn SecretReader>>,
    /// Notified after each successful commit.
    pub notify: Option<ViewNotifier>,
}

impl SyncActualizerConfig {
    /// Configuration with defaults for `partition`.
    #[must_use]
    pub const fn new(partition: PartitionId) -> Self {
        Self {
            partition,
            intents_limit: DEFAULT_INTENTS_LIMIT,
            secrets: None,
            notify: None,
        }
    }

    /// Maximum intents per event per projector (0 keeps the default).
    #[must_use]
    pub const fn with_intents_limit(mut self, limit: usize) -> Self {
        if limit > 0 {
            self.intents_limit = limit;
        }
        self
    }

    /// Secrets available to projectors.
    #[must_use]
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretReader>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Callback fired after each successful commit.
    #[must_use]
    pub fn with_notifier(mut self, notify: ViewNotifier) -> Self {
        self.notify = Some(notify);
        self
    }
}

impl std::fmt::Debug for SyncActualizerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncActualizerConfig")
            .field("partition", &self.partition)
            .field("intents_limit", &self.intents_limit)
            .field("secrets", &self.secrets.is_some())
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> AsyncActualizerConfigBuilder {
        AsyncActualizerConfig::builder(AppQName::new("acme", "shop"), PartitionId::new(3))
    }

    #[test]
    fn defaults() {
        let config = builder().build();
        assert_eq!(config.intents_limit, 100);
        assert_eq!(config.bundles_limit, 100);
        assert_eq!(config.flush_interval, Duration::from_millis(100));
        assert_eq!(config.flush_position_interval, Duration::from_secs(60));
        assert_eq!(config.error_delay, Duration::from_secs(30));
        assert_eq!(config.queue_capacity, 16);
    }

    #[test]
    fn zero_values_keep_defaults() {
        let config = builder()
            .intents_limit(0)
            .bundles_limit(0)
            .flush_interval(Duration::ZERO)
            .queue_capacity(0)
            .error_delay(Duration::ZERO)
            .build();
        assert_eq!(config.intents_limit, DEFAULT_INTENTS_LIMIT);
        assert_eq!(config.bundles_limit, DEFAULT_BUNDLES_LIMIT);
        assert_eq!(config.flush_interval, DEFAULT_FLUSH_INTERVAL);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.error_delay, Duration::ZERO);
    }

    #[test]
    fn for_partition_keeps_everything_else() {
        let config = builder().bundles_limit(7).build();
        let other = config.for_partition(PartitionId::new(9));
        assert_eq!(other.partition, PartitionId::new(9));
        assert_eq!(other.bundles_limit, 7);
        assert_eq!(other.app, config.app);
    }

    #[test]
    fn plog_key_uses_partition_as_workspace() {
        let key = builder().build().plog_key();
        assert_eq!(key.projection, QName::new("sys", "PLogUpdates"));
        assert_eq!(key.workspace, WorkspaceId::new(3));
    }
}
