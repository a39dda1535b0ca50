//! In-memory partition log.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use plogview_core::{
    AppQName, Broker, BoxFuture, EventLog, LogError, LogEvent, Offset, PartitionId,
    ProjectionKey, QName, ReadLimit, WorkspaceId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct Partition {
    events: Vec<Arc<LogEvent>>,
    wlog: HashMap<WorkspaceId, Offset>,
}

/// Append-only partition log kept in memory.
///
/// Offsets start at 1 in every partition. When a broker is attached, every
/// append is announced on the partition's `sys.PLogUpdates` key, which is what
/// wakes idle async actualizers.
///
/// # Example
///
/// ```
/// use plogview_core::{EventLog, Offset, PartitionId, QName, ReadLimit, WorkspaceId};
/// use plogview_testing::InMemoryEventLog;
///
/// # tokio_test::block_on(async {
/// let log = InMemoryEventLog::new();
/// let partition = PartitionId::new(1);
///
/// let offset = log.append(partition, WorkspaceId::new(1001), QName::new("test", "Ev"));
/// assert_eq!(offset, Offset::new(1));
///
/// let events = log.read(partition, Offset::new(1), ReadLimit::ToTheEnd).await.unwrap();
/// assert_eq!(events.len(), 1);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    partitions: Arc<RwLock<HashMap<PartitionId, Partition>>>,
    announce: Option<(Arc<dyn Broker>, AppQName)>,
    failing_reads: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl InMemoryEventLog {
    /// Create an empty log that announces nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty log announcing appends of `app` on `broker`.
    #[must_use]
    pub fn with_broker(broker: Arc<dyn Broker>, app: AppQName) -> Self {
        Self {
            announce: Some((broker, app)),
            ..Self::default()
        }
    }

    /// Append an event called `name` to `workspace`.
    ///
    /// Returns the offset the event was given.
    pub fn append(&self, partition: PartitionId, workspace: WorkspaceId, name: QName) -> Offset {
        self.append_with(partition, |offset| LogEvent::new(offset, workspace, name))
    }

    /// Append the event built by `make` from the next free offset.
    ///
    /// The workspace log offset is assigned here, so whatever `make` sets is
    /// replaced by the next offset of the event's workspace.
    pub fn append_with(&self, partition: PartitionId, make: impl FnOnce(Offset) -> LogEvent) -> Offset {
        let offset = {
            let mut partitions = self.partitions.write().unwrap();
            let partition = partitions.entry(partition).or_default();
            let offset = Offset::new(partition.events.len() as u64 + 1);
            let event = make(offset);
            let wlog = partition
                .wlog
                .entry(event.workspace())
                .and_modify(|o| *o = o.next())
                .or_insert(Offset::new(1));
            let event = event.with_wlog_offset(*wlog);
            partition.events.push(Arc::new(event));
            offset
        };

        if let Some((broker, app)) = &self.announce {
            broker.update(ProjectionKey::plog_updates(app.clone(), partition), offset);
        }
        offset
    }

    /// Make the next `count` reads fail.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Number of events in `partition`.
    #[must_use]
    pub fn len(&self, partition: PartitionId) -> usize {
        self.partitions
            .read()
            .unwrap()
            .get(&partition)
            .map_or(0, |p| p.events.len())
    }

    /// Check if `partition` has no events.
    #[must_use]
    pub fn is_empty(&self, partition: PartitionId) -> bool {
        self.len(partition) == 0
    }

    /// Number of reads served so far, failed ones included.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl EventLog for InMemoryEventLog {
    fn read(
        &self,
        partition: PartitionId,
        from: Offset,
        limit: ReadLimit,
    ) -> BoxFuture<'_, Result<Vec<Arc<LogEvent>>, LogError>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let result = if self.take_failure() {
            Err(LogError::ReadFailed {
                partition,
                from,
                reason: "injected read failure".to_string(),
            })
        } else {
            let partitions = self.partitions.read().unwrap();
            let events = partitions.get(&partition).map_or_else(Vec::new, |p| {
                let mut events = Vec::new();
                for event in p.events.iter().filter(|e| e.offset() >= from) {
                    if limit.is_reached(events.len()) {
                        break;
                    }
                    events.push(Arc::clone(event));
                }
                events
            });
            Ok(events)
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev() -> QName {
        QName::new("test", "Ev")
    }

    #[tokio::test]
    async fn reads_from_offset_with_limit() {
        let log = InMemoryEventLog::new();
        let p = PartitionId::new(1);
        for _ in 0..5 {
            log.append(p, WorkspaceId::new(1001), ev());
        }

        let events = log.read(p, Offset::new(2), ReadLimit::Count(2)).await.unwrap();
        let offsets: Vec<_> = events.iter().map(|e| e.offset().value()).collect();
        assert_eq!(offsets, vec![2, 3]);

        let rest = log.read(p, Offset::new(4), ReadLimit::ToTheEnd).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(log.read(p, Offset::new(6), ReadLimit::ToTheEnd).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn assigns_workspace_offsets() {
        let log = InMemoryEventLog::new();
        let p = PartitionId::new(1);
        log.append(p, WorkspaceId::new(1001), ev());
        log.append(p, WorkspaceId::new(1002), ev());
        log.append(p, WorkspaceId::new(1001), ev());

        let events = log.read(p, Offset::new(1), ReadLimit::ToTheEnd).await.unwrap();
        let wlog: Vec<_> = events.iter().map(|e| e.wlog_offset().value()).collect();
        assert_eq!(wlog, vec![1, 1, 2]);
    }

    #[tokio::test]
    async fn unknown_partition_reads_empty() {
        let log = InMemoryEventLog::new();
        let events = log
            .read(PartitionId::new(9), Offset::new(1), ReadLimit::ToTheEnd)
            .await
            .unwrap();
        assert!(events.is_empty());
        assert!(log.is_empty(PartitionId::new(9)));
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let log = InMemoryEventLog::new();
        let p = PartitionId::new(1);
        log.append(p, WorkspaceId::new(1001), ev());
        log.fail_next_reads(1);

        assert!(log.read(p, Offset::new(1), ReadLimit::ToTheEnd).await.is_err());
        assert!(log.read(p, Offset::new(1), ReadLimit::ToTheEnd).await.is_ok());
        assert_eq!(log.reads(), 2);
    }
}
