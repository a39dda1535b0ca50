//! Notification broker seam.
//!
//! The broker lets actualizers sleep until the log grows instead of polling
//! it, and lets readers of views learn that a view changed.
//!
//! # Model
//!
//! ```text
//! update(key, offset) ──► projection `key` current offset
//!                                  │
//!             channel ── subscribe(key)
//!                │
//!                ▼
//!      watch_channel(channel) ──► Notification { key, offset } ...
//! ```
//!
//! A channel belongs to one subscriber and may hold many subscriptions.
//! Notifications are coalesced: a slow watcher sees the latest offset of each
//! projection, not every intermediate one.

use crate::intents::SYS_PACKAGE;
use crate::names::{AppQName, Offset, PartitionId, QName, WorkspaceId};
use futures::Stream;
use futures::future::BoxFuture;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Error type for broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The channel does not exist (never created, expired or already closed).
    #[error("Channel does not exist: {0}")]
    ChannelDoesNotExist(ChannelId),

    /// The channel already has an active watcher.
    #[error("Channel is already watched: {0}")]
    AlreadyWatched(ChannelId),

    /// A broker quota was exceeded.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(&'static str),

    /// Transport or backend failure.
    #[error("Broker error: {0}")]
    Other(String),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Identifier of a notification channel.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    /// Create a channel id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity of the `sys` projection the partition log announces its growth on.
pub const PLOG_UPDATES_ENTITY: &str = "PLogUpdates";

/// What a subscription watches: one projection of one workspace of one app.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectionKey {
    /// Application.
    pub app: AppQName,
    /// Projection (view) name.
    pub projection: QName,
    /// Workspace.
    pub workspace: WorkspaceId,
}

impl ProjectionKey {
    /// Create a projection key.
    #[must_use]
    pub const fn new(app: AppQName, projection: QName, workspace: WorkspaceId) -> Self {
        Self {
            app,
            projection,
            workspace,
        }
    }

    /// Key on which the log of `partition` announces new events.
    ///
    /// The partition id doubles as the workspace id.
    #[must_use]
    pub fn plog_updates(app: AppQName, partition: PartitionId) -> Self {
        Self::new(
            app,
            QName::new(SYS_PACKAGE, PLOG_UPDATES_ENTITY),
            WorkspaceId::from(partition),
        )
    }
}

impl fmt::Display for ProjectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}[{}]", self.app, self.projection, self.workspace)
    }
}

/// A projection reached a new offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Projection that changed.
    pub key: ProjectionKey,
    /// Its new highest offset.
    pub offset: Offset,
}

/// Stream of notifications for one watched channel.
///
/// The stream ends when the channel is closed or expires. Dropping it stops
/// watching and releases the channel.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// Publish/subscribe notification broker.
///
/// Must be safe for many concurrent subscribers.
pub trait Broker: Send + Sync {
    /// Open a channel for `subject` that lives at most `lifetime`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::QuotaExceeded`] if the subject or the broker has
    /// too many channels.
    fn new_channel(&self, subject: &str, lifetime: Duration) -> BoxFuture<'_, Result<ChannelId>>;

    /// Subscribe `channel` to updates of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ChannelDoesNotExist`] for an unknown channel, or
    /// [`BrokerError::QuotaExceeded`] when subscription quotas are exhausted.
    fn subscribe<'a>(
        &'a self,
        channel: &'a ChannelId,
        key: ProjectionKey,
    ) -> BoxFuture<'a, Result<()>>;

    /// Remove the subscription of `channel` to `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ChannelDoesNotExist`] for an unknown channel.
    fn unsubscribe<'a>(
        &'a self,
        channel: &'a ChannelId,
        key: &'a ProjectionKey,
    ) -> BoxFuture<'a, Result<()>>;

    /// Start watching `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ChannelDoesNotExist`] for an unknown channel or
    /// [`BrokerError::AlreadyWatched`] if another watcher is active.
    fn watch_channel(&self, channel: &ChannelId) -> Result<NotificationStream>;

    /// Close `channel` and drop its subscriptions. Ends any stream watching it.
    ///
    /// Closing an unknown or already closed channel does nothing.
    fn close_channel(&self, channel: &ChannelId);

    /// Announce that projection `key` reached `offset`.
    fn update(&self, key: ProjectionKey, offset: Offset);
}
