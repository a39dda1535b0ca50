//! In-process notification broker.
//!
//! [`LocalBroker`] keeps the current offset of every projection it has heard
//! of and, per channel subscription, the offset last delivered. Waking a
//! watcher delivers every subscription whose current offset moved past the
//! delivered one, so bursts of updates collapse into one notification per
//! projection.

use futures::future::BoxFuture;
use plogview_core::broker::Result;
use plogview_core::{Broker, BrokerError, ChannelId, Notification, NotificationStream, Offset, ProjectionKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Broker limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quotas {
    /// Open channels in total.
    pub channels: usize,
    /// Open channels per subject.
    pub channels_per_subject: usize,
    /// Subscriptions in total.
    pub subscriptions: usize,
    /// Subscriptions per subject.
    pub subscriptions_per_subject: usize,
}

impl Default for Quotas {
    fn default() -> Self {
        Self {
            channels: 1000,
            channels_per_subject: 100,
            subscriptions: 10_000,
            subscriptions_per_subject: 1000,
        }
    }
}

struct Channel {
    subject: String,
    /// Delivered offset per subscribed projection.
    subscriptions: HashMap<ProjectionKey, Offset>,
    notify: Arc<Notify>,
    created: Instant,
    lifetime: Duration,
    watched: bool,
}

#[derive(Default)]
struct SubjectUsage {
    channels: usize,
    subscriptions: usize,
}

#[derive(Default)]
struct BrokerState {
    projections: HashMap<ProjectionKey, Offset>,
    channels: HashMap<ChannelId, Channel>,
    subjects: HashMap<String, SubjectUsage>,
    subscriptions: usize,
}

impl BrokerState {
    fn remove_channel(&mut self, id: &ChannelId) {
        let Some(channel) = self.channels.remove(id) else {
            return;
        };
        self.subscriptions -= channel.subscriptions.len();
        if let Some(usage) = self.subjects.get_mut(&channel.subject) {
            usage.channels -= 1;
            usage.subscriptions -= channel.subscriptions.len();
            if usage.channels == 0 {
                self.subjects.remove(&channel.subject);
            }
        }
    }

    /// Subscriptions of `id` that moved since last delivery, or `None` once
    /// the channel is gone or expired.
    fn take_updates(&mut self, id: &ChannelId) -> Option<Vec<Notification>> {
        let channel = self.channels.get_mut(id)?;
        if channel.created.elapsed() > channel.lifetime {
            return None;
        }
        let mut updates = Vec::new();
        for (key, delivered) in &mut channel.subscriptions {
            let current = self.projections.get(key).copied().unwrap_or(Offset::NULL);
            if current > *delivered {
                *delivered = current;
                updates.push(Notification {
                    key: key.clone(),
                    offset: current,
                });
            }
        }
        Some(updates)
    }
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the channel when its notification stream is dropped.
struct WatchGuard {
    state: Arc<Mutex<BrokerState>>,
    channel: ChannelId,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        lock(&self.state).remove_channel(&self.channel);
        tracing::trace!(channel = %self.channel, "Channel closed");
    }
}

/// In-process [`Broker`].
///
/// # Example
///
/// ```
/// use plogview_core::{AppQName, Broker, Offset, ProjectionKey, QName, WorkspaceId};
/// use plogview_projections::LocalBroker;
/// use futures::StreamExt;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let broker = LocalBroker::default();
/// let key = ProjectionKey::new(AppQName::new("acme", "shop"), QName::new("sys", "PLogUpdates"), WorkspaceId::new(1));
///
/// let channel = broker.new_channel("reader", Duration::from_secs(60)).await.unwrap();
/// broker.subscribe(&channel, key.clone()).await.unwrap();
/// let mut notifications = broker.watch_channel(&channel).unwrap();
///
/// broker.update(key.clone(), Offset::new(1));
/// broker.update(key.clone(), Offset::new(2));
///
/// let first = notifications.next().await.unwrap();
/// assert_eq!(first.offset, Offset::new(2));
/// # });
/// ```
#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
    quotas: Quotas,
    next_id: Arc<AtomicU64>,
}

impl LocalBroker {
    /// Create a broker with the given quotas.
    #[must_use]
    pub fn new(quotas: Quotas) -> Self {
        Self {
            quotas,
            ..Self::default()
        }
    }

    /// Number of open channels.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        lock(&self.state).channels.len()
    }

    /// Number of subscriptions across all channels.
    #[must_use]
    pub fn num_subscriptions(&self) -> usize {
        lock(&self.state).subscriptions
    }

    /// Last offset announced for `key`.
    #[must_use]
    pub fn current_offset(&self, key: &ProjectionKey) -> Offset {
        lock(&self.state)
            .projections
            .get(key)
            .copied()
            .unwrap_or(Offset::NULL)
    }

    fn open_channel(&self, subject: &str, lifetime: Duration) -> Result<ChannelId> {
        let mut state = lock(&self.state);
        if state.channels.len() >= self.quotas.channels {
            return Err(BrokerError::QuotaExceeded("channels"));
        }
        let usage = state.subjects.entry(subject.to_string()).or_default();
        if usage.channels >= self.quotas.channels_per_subject {
            return Err(BrokerError::QuotaExceeded("channels per subject"));
        }
        usage.channels += 1;

        let id = ChannelId::new(format!(
            "ch-{}",
            self.next_id.fetch_add(1, Ordering::Relaxed) + 1
        ));
        state.channels.insert(
            id.clone(),
            Channel {
                subject: subject.to_string(),
                subscriptions: HashMap::new(),
                notify: Arc::new(Notify::new()),
                created: Instant::now(),
                lifetime,
                watched: false,
            },
        );
        Ok(id)
    }

    fn add_subscription(&self, id: &ChannelId, key: ProjectionKey) -> Result<()> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let channel = state
            .channels
            .get_mut(id)
            .ok_or_else(|| BrokerError::ChannelDoesNotExist(id.clone()))?;
        if channel.subscriptions.contains_key(&key) {
            return Ok(());
        }
        if state.subscriptions >= self.quotas.subscriptions {
            return Err(BrokerError::QuotaExceeded("subscriptions"));
        }
        let usage = state.subjects.entry(channel.subject.clone()).or_default();
        if usage.subscriptions >= self.quotas.subscriptions_per_subject {
            return Err(BrokerError::QuotaExceeded("subscriptions per subject"));
        }

        usage.subscriptions += 1;
        state.subscriptions += 1;
        state.projections.entry(key.clone()).or_insert(Offset::NULL);
        channel.subscriptions.insert(key, Offset::NULL);
        Ok(())
    }

    fn remove_subscription(&self, id: &ChannelId, key: &ProjectionKey) -> Result<()> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let channel = state
            .channels
            .get_mut(id)
            .ok_or_else(|| BrokerError::ChannelDoesNotExist(id.clone()))?;
        if channel.subscriptions.remove(key).is_some() {
            state.subscriptions -= 1;
            if let Some(usage) = state.subjects.get_mut(&channel.subject) {
                usage.subscriptions -= 1;
            }
        }
        Ok(())
    }
}

impl Broker for LocalBroker {
    fn new_channel(&self, subject: &str, lifetime: Duration) -> BoxFuture<'_, Result<ChannelId>> {
        let result = self.open_channel(subject, lifetime);
        Box::pin(async move { result })
    }

    fn subscribe<'a>(&'a self, channel: &'a ChannelId, key: ProjectionKey) -> BoxFuture<'a, Result<()>> {
        let result = self.add_subscription(channel, key);
        Box::pin(async move { result })
    }

    fn unsubscribe<'a>(&'a self, channel: &'a ChannelId, key: &'a ProjectionKey) -> BoxFuture<'a, Result<()>> {
        let result = self.remove_subscription(channel, key);
        Box::pin(async move { result })
    }

    fn watch_channel(&self, channel: &ChannelId) -> Result<NotificationStream> {
        let notify = {
            let mut state = lock(&self.state);
            let entry = state
                .channels
                .get_mut(channel)
                .ok_or_else(|| BrokerError::ChannelDoesNotExist(channel.clone()))?;
            if entry.watched {
                return Err(BrokerError::AlreadyWatched(channel.clone()));
            }
            entry.watched = true;
            entry.notify.clone()
        };
        let guard = WatchGuard {
            state: self.state.clone(),
            channel: channel.clone(),
        };

        Ok(Box::pin(async_stream::stream! {
            let guard = guard;
            loop {
                notify.notified().await;
                let Some(updates) = lock(&guard.state).take_updates(&guard.channel) else {
                    break;
                };
                for update in updates {
                    yield update;
                }
            }
        }))
    }

    fn close_channel(&self, channel: &ChannelId) {
        let mut state = lock(&self.state);
        if let Some(entry) = state.channels.get(channel) {
            // Wake the watcher so its stream sees the channel gone and ends.
            entry.notify.notify_one();
        }
        state.remove_channel(channel);
    }

    fn update(&self, key: ProjectionKey, offset: Offset) {
        let mut state = lock(&self.state);
        state.projections.insert(key.clone(), offset);
        for channel in state.channels.values() {
            if channel.subscriptions.contains_key(&key) {
                channel.notify.notify_one();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use plogview_core::{AppQName, QName, WorkspaceId};

    fn key(workspace: u64) -> ProjectionKey {
        ProjectionKey::new(
            AppQName::new("acme", "shop"),
            QName::new("sys", "PLogUpdates"),
            WorkspaceId::new(workspace),
        )
    }

    async fn next(stream: &mut NotificationStream) -> Option<Notification> {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn delivers_latest_offset_per_projection() {
        let broker = LocalBroker::default();
        let channel = broker.new_channel("s", Duration::from_secs(60)).await.unwrap();
        broker.subscribe(&channel, key(1)).await.unwrap();
        broker.subscribe(&channel, key(2)).await.unwrap();
        let mut stream = broker.watch_channel(&channel).unwrap();

        broker.update(key(1), Offset::new(3));
        broker.update(key(1), Offset::new(5));

        let first = next(&mut stream).await.unwrap();
        assert_eq!(first.key, key(1));
        assert_eq!(first.offset, Offset::new(5));

        broker.update(key(2), Offset::new(1));
        let second = next(&mut stream).await.unwrap();
        assert_eq!(second.key, key(2));
        assert_eq!(second.offset, Offset::new(1));
    }

    #[tokio::test]
    async fn unrelated_updates_do_not_wake() {
        let broker = LocalBroker::default();
        let channel = broker.new_channel("s", Duration::from_secs(60)).await.unwrap();
        broker.subscribe(&channel, key(1)).await.unwrap();
        let mut stream = broker.watch_channel(&channel).unwrap();

        broker.update(key(2), Offset::new(9));
        let woke = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(woke.is_err());
        assert_eq!(broker.current_offset(&key(2)), Offset::new(9));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broker = LocalBroker::default();
        let channel = broker.new_channel("s", Duration::from_secs(60)).await.unwrap();
        broker.subscribe(&channel, key(1)).await.unwrap();
        assert_eq!(broker.num_subscriptions(), 1);

        broker.unsubscribe(&channel, &key(1)).await.unwrap();
        assert_eq!(broker.num_subscriptions(), 0);

        let mut stream = broker.watch_channel(&channel).unwrap();
        broker.update(key(1), Offset::new(1));
        let woke = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(woke.is_err());
    }

    #[tokio::test]
    async fn dropping_the_stream_closes_the_channel() {
        let broker = LocalBroker::default();
        let channel = broker.new_channel("s", Duration::from_secs(60)).await.unwrap();
        broker.subscribe(&channel, key(1)).await.unwrap();

        let stream = broker.watch_channel(&channel).unwrap();
        assert!(matches!(
            broker.watch_channel(&channel),
            Err(BrokerError::AlreadyWatched(_))
        ));
        drop(stream);

        assert_eq!(broker.num_channels(), 0);
        assert_eq!(broker.num_subscriptions(), 0);
        assert!(matches!(
            broker.subscribe(&channel, key(1)).await,
            Err(BrokerError::ChannelDoesNotExist(_))
        ));
    }

    #[tokio::test]
    async fn closing_the_channel_ends_stream_and_frees_quota() {
        let broker = LocalBroker::new(Quotas {
            channels_per_subject: 1,
            ..Quotas::default()
        });
        let channel = broker.new_channel("s", Duration::from_secs(60)).await.unwrap();
        broker.subscribe(&channel, key(1)).await.unwrap();
        let mut stream = broker.watch_channel(&channel).unwrap();

        broker.close_channel(&channel);
        broker.close_channel(&channel);

        assert!(next(&mut stream).await.is_none());
        assert_eq!(broker.num_channels(), 0);
        assert_eq!(broker.num_subscriptions(), 0);
        broker.new_channel("s", Duration::from_secs(60)).await.unwrap();
    }

    #[tokio::test]
    async fn expired_channel_ends_stream() {
        let broker = LocalBroker::default();
        let channel = broker.new_channel("s", Duration::from_millis(1)).await.unwrap();
        broker.subscribe(&channel, key(1)).await.unwrap();
        let mut stream = broker.watch_channel(&channel).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.update(key(1), Offset::new(1));
        assert!(next(&mut stream).await.is_none());
    }

    #[tokio::test]
    async fn quotas_are_enforced() {
        let broker = LocalBroker::new(Quotas {
            channels: 2,
            channels_per_subject: 1,
            subscriptions: 10,
            subscriptions_per_subject: 1,
        });

        let channel = broker.new_channel("a", Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            broker.new_channel("a", Duration::from_secs(60)).await,
            Err(BrokerError::QuotaExceeded("channels per subject"))
        );
        broker.new_channel("b", Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            broker.new_channel("c", Duration::from_secs(60)).await,
            Err(BrokerError::QuotaExceeded("channels"))
        );

        broker.subscribe(&channel, key(1)).await.unwrap();
        assert_eq!(
            broker.subscribe(&channel, key(2)).await,
            Err(BrokerError::QuotaExceeded("subscriptions per subject"))
        );
    }
}
