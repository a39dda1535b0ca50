//! Tests for the in-memory collaborators working together.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use plogview_core::{
    AppQName, BoxFuture, Broker, BrokerError, ChannelId, EventLog, NotificationStream, Offset,
    PartitionId, ProjectionKey, QName, ReadLimit, WorkspaceId,
};
use plogview_testing::{CounterProjector, InMemoryEventLog, InMemoryViewStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingBroker {
    updates: Mutex<Vec<(ProjectionKey, Offset)>>,
}

impl Broker for RecordingBroker {
    fn new_channel(&self, _subject: &str, _lifetime: Duration) -> BoxFuture<'_, Result<ChannelId, BrokerError>> {
        Box::pin(async { Ok(ChannelId::new("ch")) })
    }

    fn subscribe<'a>(&'a self, _channel: &'a ChannelId, _key: ProjectionKey) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async { Ok(()) })
    }

    fn unsubscribe<'a>(&'a self, _channel: &'a ChannelId, _key: &'a ProjectionKey) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async { Ok(()) })
    }

    fn watch_channel(&self, channel: &ChannelId) -> Result<NotificationStream, BrokerError> {
        Err(BrokerError::ChannelDoesNotExist(channel.clone()))
    }

    fn close_channel(&self, _channel: &ChannelId) {}

    fn update(&self, key: ProjectionKey, offset: Offset) {
        self.updates.lock().unwrap().push((key, offset));
    }
}

#[tokio::test]
async fn appends_are_announced_per_partition() {
    let broker = Arc::new(RecordingBroker::default());
    let app = AppQName::new("test", "app");
    let log = InMemoryEventLog::with_broker(broker.clone(), app.clone());

    log.append(PartitionId::new(1), WorkspaceId::new(1001), QName::new("test", "Ev"));
    log.append(PartitionId::new(2), WorkspaceId::new(1001), QName::new("test", "Ev"));
    log.append(PartitionId::new(1), WorkspaceId::new(1002), QName::new("test", "Ev"));

    let updates = broker.updates.lock().unwrap().clone();
    assert_eq!(
        updates,
        vec![
            (ProjectionKey::plog_updates(app.clone(), PartitionId::new(1)), Offset::new(1)),
            (ProjectionKey::plog_updates(app.clone(), PartitionId::new(2)), Offset::new(1)),
            (ProjectionKey::plog_updates(app, PartitionId::new(1)), Offset::new(2)),
        ]
    );
}

#[tokio::test]
async fn counter_projects_log_into_store() {
    let log = InMemoryEventLog::new();
    let views = Arc::new(InMemoryViewStore::new());
    let counter = CounterProjector::incrementor();
    let p = PartitionId::new(1);
    for ws in [1001, 1002, 1001] {
        log.append(p, WorkspaceId::new(ws), QName::new("test", "Ev"));
    }

    // Drive the projector by hand, committing after every event.
    let projector = counter.projector();
    let state = ReadThrough(views.clone());
    for event in log.read(p, Offset::new(1), ReadLimit::ToTheEnd).await.unwrap() {
        let mut intents = plogview_core::Intents::new(10);
        projector.func().apply(&event, &state, &mut intents).await.unwrap();
        plogview_core::ViewStore::put_batch(views.as_ref(), intents.drain().collect())
            .await
            .unwrap();
    }

    assert_eq!(counter.count(&views, WorkspaceId::new(1001)), Some(2));
    assert_eq!(counter.count(&views, WorkspaceId::new(1002)), Some(1));
    assert_eq!(views.keys_of(counter.view()).len(), 2);
}

struct ReadThrough(Arc<InMemoryViewStore>);

impl plogview_core::State for ReadThrough {
    fn get<'a>(
        &'a self,
        key: &'a plogview_core::ViewKey,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, plogview_core::StoreError>> {
        plogview_core::ViewStore::get(self.0.as_ref(), key)
    }

    fn secret(&self, name: &str) -> Result<Vec<u8>, plogview_core::SecretError> {
        Err(plogview_core::SecretError::NotFound(name.to_string()))
    }
}
