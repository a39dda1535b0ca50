//! Processing pipeline of an async actualizer.
//!
//! ```text
//! reader ──► bounded queue ──► Projector stage ──► ErrorHandler stage
//!                                    ▲
//!                          flush timer (FlushTick)
//! ```
//!
//! The pipeline runs in its own task. The bounded queue is the only
//! backpressure: when the projector stage falls behind, [`Pipeline::send`]
//! waits. Stages form a closed set ([`Stage`]) and are driven in order; a
//! stage either consumes a signal or passes one on.

use crate::cancel::ReadContext;
use crate::error::{ActualizerError, Result};
use crate::filter::is_acceptable;
use crate::host_state::BundledState;
use crate::metrics::{ActualizerLabels, ActualizerMetrics};
use crate::offsets::{OffsetStore, offsets_view};
use plogview_core::{Broker, LogEvent, Offset, ProjectionKey, Projector, ViewKey};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// One event travelling through the pipeline.
pub(crate) struct Workpiece {
    event: Arc<LogEvent>,
    offset: Offset,
}

impl Workpiece {
    pub(crate) fn new(event: Arc<LogEvent>) -> Self {
        let offset = event.offset();
        Self { event, offset }
    }

    /// Release the event handle. Called once, when the workpiece leaves the pipeline.
    fn release(self) {
        drop(self.event);
    }
}

/// What flows between stages.
pub(crate) enum Signal {
    Work(Workpiece),
    FlushTick,
    Failed(ActualizerError),
}

/// Pipeline stages.
pub(crate) enum Stage {
    Projector(Box<ProjectorStage>),
    ErrorHandler(ErrorHandler),
}

impl Stage {
    async fn process(&mut self, signal: Signal) -> Option<Signal> {
        match self {
            Self::Projector(stage) => stage.process(signal).await,
            Self::ErrorHandler(handler) => handler.process(signal),
        }
    }
}

/// Applies the projector to workpieces and flushes its bundle.
pub(crate) struct ProjectorStage {
    projector: Projector,
    state: BundledState,
    broker: Arc<dyn Broker>,
    metrics: Arc<dyn ActualizerMetrics>,
    labels: ActualizerLabels,
    in_error: Arc<AtomicBool>,
    flush_position_interval: Duration,
    /// Offset of the last workpiece not yet covered by a flush.
    current: Offset,
    accepted_since_save: bool,
    last_save: Instant,
    failed: bool,
}

impl ProjectorStage {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        projector: Projector,
        state: BundledState,
        broker: Arc<dyn Broker>,
        metrics: Arc<dyn ActualizerMetrics>,
        labels: ActualizerLabels,
        in_error: Arc<AtomicBool>,
        flush_position_interval: Duration,
    ) -> Self {
        Self {
            projector,
            state,
            broker,
            metrics,
            labels,
            in_error,
            flush_position_interval,
            current: Offset::NULL,
            accepted_since_save: false,
            last_save: Instant::now(),
            failed: false,
        }
    }

    async fn process(&mut self, signal: Signal) -> Option<Signal> {
        if self.failed {
            match signal {
                Signal::Failed(err) => return Some(Signal::Failed(err)),
                Signal::Work(work) => work.release(),
                Signal::FlushTick => {}
            }
            return None;
        }

        let result = match signal {
            Signal::Failed(err) => return Some(Signal::Failed(err)),
            Signal::Work(work) => {
                let result = self.handle(&work).await;
                work.release();
                result
            }
            Signal::FlushTick => self.flush().await,
        };

        match result {
            Ok(()) => None,
            Err(err) => {
                // Everything after a failure is discarded; the actualizer
                // restarts from the persisted checkpoint.
                self.failed = true;
                Some(Signal::Failed(err))
            }
        }
    }

    async fn handle(&mut self, work: &Workpiece) -> Result<()> {
        self.current = work.offset;
        self.metrics.current_offset(&self.labels, work.offset);

        if !is_acceptable(&self.projector, &work.event) {
            return Ok(());
        }

        self.state
            .invoke(&self.projector, &work.event)
            .await
            .map_err(|source| ActualizerError::projector(self.projector.name(), &work.event, source))?;
        self.accepted_since_save = true;

        let ready = self.state.apply_intents()?;
        if ready || self.projector.is_non_buffered() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.current.is_null() {
            return Ok(());
        }
        let offset = self.current;

        let stored = if self.accepted_since_save
            || self.last_save.elapsed() >= self.flush_position_interval
        {
            let (key, value) = OffsetStore::row(self.labels.partition, self.projector.name(), offset)?;
            self.state.put_system_row(key, value);
            Some(offset)
        } else {
            None
        };

        self.state.apply_intents()?;
        let written = self.state.flush_bundle().await?;

        self.current = Offset::NULL;
        if stored.is_some() {
            self.accepted_since_save = false;
            self.last_save = Instant::now();
        }

        self.notify_changed(&written, offset);
        self.metrics.flushed(&self.labels, stored);
        if self.in_error.swap(false, Ordering::AcqRel) {
            self.metrics.projector_in_error(&self.labels, false);
        }

        tracing::debug!(
            projector = %self.projector.name(),
            partition = %self.labels.partition,
            offset = %offset,
            rows = written.len(),
            checkpoint = stored.is_some(),
            "Flushed"
        );
        Ok(())
    }

    fn notify_changed(&self, written: &[ViewKey], offset: Offset) {
        let offsets = offsets_view();
        let changed: BTreeSet<_> = written
            .iter()
            .filter(|key| key.view != offsets)
            .map(|key| (key.view.clone(), key.workspace))
            .collect();
        for (view, workspace) in changed {
            self.broker.update(
                ProjectionKey::new(self.labels.app.clone(), view, workspace),
                offset,
            );
        }
    }
}

/// Turns failures into a cancelled read session.
pub(crate) struct ErrorHandler {
    ctx: ReadContext,
    metrics: Arc<dyn ActualizerMetrics>,
    labels: ActualizerLabels,
    in_error: Arc<AtomicBool>,
}

impl ErrorHandler {
    pub(crate) fn new(
        ctx: ReadContext,
        metrics: Arc<dyn ActualizerMetrics>,
        labels: ActualizerLabels,
        in_error: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ctx,
            metrics,
            labels,
            in_error,
        }
    }

    fn process(&self, signal: Signal) -> Option<Signal> {
        match signal {
            Signal::Failed(err) => {
                if !self.in_error.swap(true, Ordering::AcqRel) {
                    self.metrics.projector_in_error(&self.labels, true);
                }
                self.ctx.cancel_with_error(err);
            }
            Signal::Work(work) => work.release(),
            Signal::FlushTick => {}
        }
        None
    }
}

/// Handle to a running pipeline task.
///
/// Dropping the handle without [`Pipeline::close`] aborts the task: queued
/// and bundled work is lost and nothing more is flushed.
pub(crate) struct Pipeline {
    tx: Option<mpsc::Sender<Workpiece>>,
    task: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the pipeline task.
    pub(crate) fn start(stages: Vec<Stage>, flush_interval: Duration, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_stages(stages, rx, flush_interval));
        Self {
            tx: Some(tx),
            task: Some(task),
        }
    }

    /// Queue a workpiece, waiting while the queue is full.
    pub(crate) async fn send(&self, work: Workpiece) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(ActualizerError::PipelineClosed)?;
        tx.send(work).await.map_err(|_| ActualizerError::PipelineClosed)
    }

    /// Stop accepting work, let queued work drain and wait for the task.
    ///
    /// A healthy projector stage flushes one last time on the way out.
    pub(crate) async fn close(mut self) {
        drop(self.tx.take());
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Pipeline task failed");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

async fn run_stages(mut stages: Vec<Stage>, mut rx: mpsc::Receiver<Workpiece>, flush_interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let signal = tokio::select! {
            work = rx.recv() => match work {
                Some(work) => Signal::Work(work),
                None => break,
            },
            _ = ticker.tick() => Signal::FlushTick,
        };
        drive(&mut stages, signal).await;
    }

    drive(&mut stages, Signal::FlushTick).await;
}

async fn drive(stages: &mut [Stage], signal: Signal) {
    let mut next = Some(signal);
    for stage in stages.iter_mut() {
        match next.take() {
            Some(signal) => next = stage.process(signal).await,
            None => return,
        }
    }
    if let Some(Signal::Work(work)) = next {
        work.release();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRecorder;
    use plogview_core::{
        AppQName, BoxFuture, BrokerError, ChannelId, Intents, NotificationStream, PartitionId,
        ProjectorError, ProjectorFn, QName, State, StateExt, StoreError, ViewStore, WorkspaceId,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::watch;

    #[derive(Default)]
    struct MapStore {
        rows: Mutex<HashMap<ViewKey, Vec<u8>>>,
        batches: Mutex<usize>,
    }

    impl ViewStore for MapStore {
        fn get<'a>(&'a self, key: &'a ViewKey) -> BoxFuture<'a, std::result::Result<Option<Vec<u8>>, StoreError>> {
            let value = self.rows.lock().unwrap().get(key).cloned();
            Box::pin(async move { Ok(value) })
        }

        fn put_batch(&self, batch: Vec<(ViewKey, Vec<u8>)>) -> BoxFuture<'_, std::result::Result<(), StoreError>> {
            self.rows.lock().unwrap().extend(batch);
            *self.batches.lock().unwrap() += 1;
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct RecordingBroker {
        updates: Mutex<Vec<(ProjectionKey, Offset)>>,
    }

    impl Broker for RecordingBroker {
        fn new_channel(&self, _subject: &str, _lifetime: Duration) -> BoxFuture<'_, plogview_core::broker::Result<ChannelId>> {
            Box::pin(async { Err(BrokerError::Other("unused".to_string())) })
        }

        fn subscribe<'a>(&'a self, _channel: &'a ChannelId, _key: ProjectionKey) -> BoxFuture<'a, plogview_core::broker::Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn unsubscribe<'a>(&'a self, _channel: &'a ChannelId, _key: &'a ProjectionKey) -> BoxFuture<'a, plogview_core::broker::Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn watch_channel(&self, channel: &ChannelId) -> plogview_core::broker::Result<NotificationStream> {
            Err(BrokerError::ChannelDoesNotExist(channel.clone()))
        }

        fn close_channel(&self, _channel: &ChannelId) {}

        fn update(&self, key: ProjectionKey, offset: Offset) {
            self.updates.lock().unwrap().push((key, offset));
        }
    }

    fn counter_key(workspace: WorkspaceId) -> ViewKey {
        ViewKey::new(QName::new("test", "Counter"), workspace, "count")
    }

    struct Increment;

    impl ProjectorFn for Increment {
        fn apply<'a>(
            &'a self,
            event: &'a LogEvent,
            state: &'a dyn State,
            intents: &'a mut Intents,
        ) -> BoxFuture<'a, std::result::Result<(), ProjectorError>> {
            Box::pin(async move {
                if event.workspace() == WorkspaceId::new(99) {
                    return Err(ProjectorError::failed("boom"));
                }
                let key = counter_key(event.workspace());
                let count: i32 = state.get_value(&key).await?.unwrap_or(0);
                intents.put_value(key, &(count + 1))?;
                Ok(())
            })
        }
    }

    struct Fixture {
        store: Arc<MapStore>,
        broker: Arc<RecordingBroker>,
        ctx: ReadContext,
        in_error: Arc<AtomicBool>,
        _shutdown: watch::Sender<bool>,
    }

    impl Fixture {
        fn new() -> Self {
            let (shutdown, rx) = watch::channel(false);
            Self {
                store: Arc::new(MapStore::default()),
                broker: Arc::new(RecordingBroker::default()),
                ctx: ReadContext::new(rx),
                in_error: Arc::new(AtomicBool::new(false)),
                _shutdown: shutdown,
            }
        }

        fn pipeline(&self, projector: Projector, bundles_limit: usize, flush_interval: Duration) -> Pipeline {
            let labels = ActualizerLabels {
                app: AppQName::new("test", "app"),
                partition: PartitionId::new(1),
                projector: projector.name().clone(),
            };
            let metrics: Arc<dyn ActualizerMetrics> = Arc::new(MetricsRecorder);
            let stage = ProjectorStage::new(
                projector,
                BundledState::new(self.store.clone(), None, 10, bundles_limit),
                self.broker.clone(),
                metrics.clone(),
                labels.clone(),
                self.in_error.clone(),
                Duration::from_secs(60),
            );
            let handler = ErrorHandler::new(self.ctx.clone(), metrics, labels, self.in_error.clone());
            Pipeline::start(
                vec![Stage::Projector(Box::new(stage)), Stage::ErrorHandler(handler)],
                flush_interval,
                4,
            )
        }

        fn checkpoint(&self) -> Offset {
            let key = OffsetStore::key(PartitionId::new(1), &QName::new("test", "Incrementor"));
            self.store
                .rows
                .lock()
                .unwrap()
                .get(&key)
                .map(|bytes| {
                    let record: crate::offsets::OffsetRecord = bincode::deserialize(bytes).unwrap();
                    Offset::new(u64::try_from(record.offset).unwrap())
                })
                .unwrap_or(Offset::NULL)
        }
    }

    fn projector() -> Projector {
        Projector::new(QName::new("test", "Incrementor"), Arc::new(Increment))
    }

    fn work(offset: u64, workspace: u64) -> Workpiece {
        Workpiece::new(Arc::new(LogEvent::new(
            Offset::new(offset),
            WorkspaceId::new(workspace),
            QName::new("test", "Inc"),
        )))
    }

    #[tokio::test]
    async fn bundle_limit_one_flushes_every_event() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(projector(), 1, Duration::from_secs(3600));

        pipeline.send(work(1, 7)).await.unwrap();
        pipeline.send(work(2, 7)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while fixture.checkpoint() != Offset::new(2) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pipeline.close().await;

        let updates = fixture.broker.updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].0.projection, QName::new("test", "Counter"));
        assert_eq!(updates[1].1, Offset::new(2));
    }

    #[tokio::test]
    async fn timer_flushes_large_bundles() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(projector(), 1000, Duration::from_millis(20));

        pipeline.send(work(1, 7)).await.unwrap();
        assert_eq!(fixture.checkpoint(), Offset::NULL);

        tokio::time::timeout(Duration::from_secs(1), async {
            while fixture.checkpoint() != Offset::new(1) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pipeline.close().await;
    }

    #[tokio::test]
    async fn close_flushes_remaining_work() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(projector(), 1000, Duration::from_secs(3600));

        for offset in 1..=3 {
            pipeline.send(work(offset, 7)).await.unwrap();
        }
        pipeline.close().await;

        assert_eq!(fixture.checkpoint(), Offset::new(3));
        assert_eq!(*fixture.store.batches.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn dropping_without_close_loses_unflushed_work() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(projector(), 1000, Duration::from_secs(3600));

        for offset in 1..=3 {
            pipeline.send(work(offset, 7)).await.unwrap();
        }
        drop(pipeline);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(fixture.checkpoint(), Offset::NULL);
        assert_eq!(*fixture.store.batches.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_cancels_context_and_stops_flushing() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(projector(), 1000, Duration::from_secs(3600));

        pipeline.send(work(1, 7)).await.unwrap();
        pipeline.send(work(2, 99)).await.unwrap();
        pipeline.send(work(3, 7)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), fixture.ctx.cancelled())
            .await
            .unwrap();
        pipeline.close().await;

        assert!(matches!(
            fixture.ctx.error(),
            Some(ActualizerError::Projector { .. })
        ));
        assert!(fixture.in_error.load(Ordering::Acquire));
        assert_eq!(fixture.checkpoint(), Offset::NULL);
        assert_eq!(*fixture.store.batches.lock().unwrap(), 0);
    }
}
