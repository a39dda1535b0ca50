//! Async actualizer: one projector driven over one partition's log.
//!
//! # Lifecycle
//!
//! ```text
//!                ┌──────────────┐  init failed   ┌──────────────┐
//!   start ──────►│Uninitialized │──────────────► │ ErrorBackoff │
//!                └──────┬───────┘                └──────┬───────┘
//!                       │ init ok                       │ after_error(delay)
//!                       ▼                               │
//!                ┌──────────────┐   error        ◄──────┘
//!          ┌────►│  CatchingUp  │──────────────► ErrorBackoff
//!          │     └──────┬───────┘
//!          │            │ reached end / target
//!          │            ▼
//!          │     ┌──────────────┐   error
//!          └─────│   Watching   │──────────────► ErrorBackoff
//!   notification └──────────────┘
//!
//!   shutdown from any state ──► Stopped
//! ```
//!
//! An actualizer starts from its persisted checkpoint, reads the log in
//! batches, hands every event to its [pipeline](crate::pipeline) and then
//! sleeps on a broker channel until the log grows. Any failure tears the
//! session down, goes through the error logger, waits and starts over from
//! the persisted checkpoint. Events between the checkpoint and the failure
//! are delivered again, so projectors must be idempotent.

use crate::cancel::{ReadContext, is_shutdown, wait_shutdown};
use crate::config::{AsyncActualizerConfig, PLOG_READ_BATCH_SIZE};
use crate::error::{ActualizerError, Result};
use crate::host_state::BundledState;
use crate::metrics::{ActualizerLabels, ActualizerMetrics, MetricsRecorder};
use crate::offsets::OffsetStore;
use crate::pipeline::{ErrorHandler, Pipeline, ProjectorStage, Stage, Workpiece};
use futures::StreamExt;
use futures::future::BoxFuture;
use plogview_core::broker::Result as BrokerResult;
use plogview_core::{
    Broker, ChannelId, EventLog, LogEvent, NotificationStream, Offset, ProjectorFactory, QName,
    ReadLimit, SecretReader, ViewStore,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio::sync::watch;

/// Lifetime requested for the notification channel: effectively forever.
const CHANNEL_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Waits before a restart. Receives the configured error delay.
pub type AfterErrorFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Reports an actualizer error. Receives the actualizer name.
pub type ErrorLogger = Arc<dyn Fn(&str, &ActualizerError) + Send + Sync>;

/// Collaborators of an async actualizer.
#[derive(Clone)]
pub struct AsyncActualizerDeps {
    /// Partition log.
    pub log: Arc<dyn EventLog>,
    /// View and checkpoint storage.
    pub views: Arc<dyn ViewStore>,
    /// Notification broker.
    pub broker: Arc<dyn Broker>,
    /// Secrets for projectors.
    pub secrets: Option<Arc<dyn SecretReader>>,
    /// Delay before a restart. Defaults to `tokio::time::sleep`.
    pub after_error: AfterErrorFn,
    /// Error sink. Defaults to `tracing::error!`.
    pub log_error: ErrorLogger,
    /// Metrics sink. Defaults to [`MetricsRecorder`].
    pub metrics: Arc<dyn ActualizerMetrics>,
}

impl AsyncActualizerDeps {
    /// Dependencies with default delay, error logger and metrics.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>, views: Arc<dyn ViewStore>, broker: Arc<dyn Broker>) -> Self {
        Self {
            log,
            views,
            broker,
            secrets: None,
            after_error: Arc::new(|delay| Box::pin(tokio::time::sleep(delay))),
            log_error: Arc::new(|name, err| {
                tracing::error!(actualizer = name, error = %err, "Actualizer failed");
            }),
            metrics: Arc::new(MetricsRecorder),
        }
    }

    /// Secrets available to projectors.
    #[must_use]
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretReader>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Replace the restart delay.
    #[must_use]
    pub fn with_after_error(mut self, after_error: AfterErrorFn) -> Self {
        self.after_error = after_error;
        self
    }

    /// Replace the error logger.
    #[must_use]
    pub fn with_error_logger(mut self, log_error: ErrorLogger) -> Self {
        self.log_error = log_error;
        self
    }

    /// Replace the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn ActualizerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Live resources of one read session.
struct Session {
    ctx: ReadContext,
    pipeline: Pipeline,
    notifications: NotificationStream,
    channel: ChannelId,
    /// Last offset handed to the pipeline.
    offset: Offset,
}

enum Phase {
    Uninitialized,
    CatchingUp(Session, Option<Offset>),
    Watching(Session),
    ErrorBackoff(ActualizerError),
    Stopped,
}

/// Drives one projector over one partition.
///
/// # Example
///
/// ```ignore
/// let config = AsyncActualizerConfig::builder(app, PartitionId::new(1)).build();
/// let deps = AsyncActualizerDeps::new(log, views, broker);
/// let actualizer = AsyncActualizer::new(config, incrementor_factory, deps);
///
/// let (shutdown, rx) = tokio::sync::watch::channel(false);
/// let task = tokio::spawn(actualizer.run(rx));
/// // ...
/// shutdown.send(true).ok();
/// task.await?;
/// ```
pub struct AsyncActualizer {
    config: AsyncActualizerConfig,
    factory: ProjectorFactory,
    deps: AsyncActualizerDeps,
    projector: QName,
    name: String,
    in_error: Arc<AtomicBool>,
}

impl AsyncActualizer {
    /// Create an actualizer for the projector built by `factory`.
    #[must_use]
    pub fn new(config: AsyncActualizerConfig, factory: ProjectorFactory, deps: AsyncActualizerDeps) -> Self {
        let projector = factory(config.partition).name().clone();
        let name = format!("{projector} [{}]", config.partition);
        Self {
            config,
            factory,
            deps,
            projector,
            name,
            in_error: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Actualizer name: `"<projector> [<partition>]"`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Projector name.
    #[must_use]
    pub const fn projector(&self) -> &QName {
        &self.projector
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped).
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            actualizer = %self.name,
            app = %self.config.app,
            "Starting actualizer"
        );

        let mut phase = Phase::Uninitialized;
        loop {
            phase = match phase {
                Phase::Uninitialized => self.start(&shutdown).await,
                Phase::CatchingUp(session, till) => self.catch_up(session, till).await,
                Phase::Watching(session) => self.watch(session).await,
                Phase::ErrorBackoff(err) => self.back_off(&err, &shutdown).await,
                Phase::Stopped => break,
            };
        }

        tracing::info!(actualizer = %self.name, "Actualizer stopped");
    }

    async fn start(&self, shutdown: &watch::Receiver<bool>) -> Phase {
        if is_shutdown(shutdown) {
            return Phase::Stopped;
        }
        match self.init(shutdown).await {
            Ok(session) => {
                tracing::info!(
                    actualizer = %self.name,
                    offset = %session.offset,
                    "Actualizer initialized"
                );
                Phase::CatchingUp(session, None)
            }
            Err(err) => Phase::ErrorBackoff(err),
        }
    }

    async fn init(&self, shutdown: &watch::Receiver<bool>) -> Result<Session> {
        let projector = (self.factory)(self.config.partition);
        let offset = OffsetStore::new(self.deps.views.clone())
            .read(self.config.partition, projector.name())
            .await?;

        let broker = &self.deps.broker;
        let channel = broker.new_channel(&self.name, CHANNEL_LIFETIME).await?;
        let notifications = match self.watch_log_updates(&channel).await {
            Ok(notifications) => notifications,
            Err(err) => {
                broker.close_channel(&channel);
                return Err(err.into());
            }
        };

        let ctx = ReadContext::new(shutdown.clone());
        let labels = ActualizerLabels {
            app: self.config.app.clone(),
            partition: self.config.partition,
            projector: projector.name().clone(),
        };
        let state = BundledState::new(
            self.deps.views.clone(),
            self.deps.secrets.clone(),
            self.config.intents_limit,
            self.config.bundles_limit,
        );
        let stage = ProjectorStage::new(
            projector,
            state,
            self.deps.broker.clone(),
            self.deps.metrics.clone(),
            labels.clone(),
            self.in_error.clone(),
            self.config.flush_position_interval,
        );
        let handler = ErrorHandler::new(
            ctx.clone(),
            self.deps.metrics.clone(),
            labels,
            self.in_error.clone(),
        );
        let pipeline = Pipeline::start(
            vec![Stage::Projector(Box::new(stage)), Stage::ErrorHandler(handler)],
            self.config.flush_interval,
            self.config.queue_capacity,
        );

        Ok(Session {
            ctx,
            pipeline,
            notifications,
            channel,
            offset,
        })
    }

    async fn watch_log_updates(&self, channel: &ChannelId) -> BrokerResult<NotificationStream> {
        self.deps.broker.subscribe(channel, self.config.plog_key()).await?;
        self.deps.broker.watch_channel(channel)
    }

    async fn catch_up(&self, mut session: Session, till: Option<Offset>) -> Phase {
        match self.read(&mut session, till).await {
            Ok(()) if session.ctx.is_cancelled() => self.stop(session).await,
            Ok(()) => Phase::Watching(session),
            Err(err) => self.fail(session, err).await,
        }
    }

    async fn watch(&self, mut session: Session) -> Phase {
        let next = tokio::select! {
            notification = session.notifications.next() => Some(notification),
            () = session.ctx.cancelled() => None,
        };

        match next {
            Some(Some(notification)) if notification.offset > session.offset => {
                tracing::trace!(
                    actualizer = %self.name,
                    offset = %notification.offset,
                    "Log grew"
                );
                Phase::CatchingUp(session, Some(notification.offset))
            }
            Some(Some(_)) => Phase::Watching(session),
            Some(None) => self.fail(session, ActualizerError::NotificationsClosed).await,
            None => self.stop(session).await,
        }
    }

    async fn back_off(&self, err: &ActualizerError, shutdown: &watch::Receiver<bool>) -> Phase {
        (self.deps.log_error)(&self.name, err);
        if is_shutdown(shutdown) {
            return Phase::Stopped;
        }
        tokio::select! {
            () = (self.deps.after_error)(self.config.error_delay) => Phase::Uninitialized,
            () = wait_shutdown(shutdown) => Phase::Stopped,
        }
    }

    /// The session was cancelled: by an error (restart) or by shutdown (exit).
    async fn stop(&self, session: Session) -> Phase {
        let shutdown = session.ctx.is_shutdown();
        match self.teardown(session).await {
            Some(err) if !shutdown => Phase::ErrorBackoff(err),
            Some(err) => {
                (self.deps.log_error)(&self.name, &err);
                Phase::Stopped
            }
            None if shutdown => Phase::Stopped,
            None => Phase::Uninitialized,
        }
    }

    /// Tear the session down after `err`. A different error the pipeline
    /// recorded meanwhile goes to the error logger as well.
    async fn fail(&self, session: Session, err: ActualizerError) -> Phase {
        if let Some(recorded) = self.teardown(session).await {
            if recorded != err {
                (self.deps.log_error)(&self.name, &recorded);
            }
        }
        Phase::ErrorBackoff(err)
    }

    /// Close the pipeline and release the subscription; return the session's error.
    async fn teardown(&self, session: Session) -> Option<ActualizerError> {
        let Session {
            ctx,
            pipeline,
            notifications,
            channel,
            offset,
        } = session;

        pipeline.close().await;
        drop(notifications);
        self.deps.broker.close_channel(&channel);
        tracing::debug!(
            actualizer = %self.name,
            channel = %channel,
            offset = %offset,
            "Session closed"
        );
        ctx.error()
    }

    /// Read from the last handled offset up to `till` (or the end of the log).
    async fn read(&self, session: &mut Session, till: Option<Offset>) -> Result<()> {
        'batches: loop {
            if session.ctx.is_cancelled() {
                break;
            }

            let from = session.offset.next();
            let limit = match till {
                None => PLOG_READ_BATCH_SIZE,
                Some(till) if till < from => break,
                Some(till) => usize::try_from(till.value() - from.value() + 1)
                    .map_or(PLOG_READ_BATCH_SIZE, |left| left.min(PLOG_READ_BATCH_SIZE)),
            };

            let batch = tokio::select! {
                batch = self.deps.log.read(self.config.partition, from, ReadLimit::Count(limit)) => batch?,
                () = session.ctx.cancelled() => break,
            };
            if batch.is_empty() {
                break;
            }

            for event in batch {
                if session.ctx.is_cancelled() {
                    break 'batches;
                }
                self.handle_event(session, event).await?;
            }
        }

        match session.ctx.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Hand one event to the pipeline; the session offset moves only on success.
    async fn handle_event(&self, session: &mut Session, event: Arc<LogEvent>) -> Result<()> {
        let offset = event.offset();
        if offset <= session.offset {
            return Ok(());
        }

        tokio::select! {
            sent = session.pipeline.send(Workpiece::new(event)) => sent?,
            () = session.ctx.cancelled() => return Ok(()),
        }
        session.offset = offset;
        tracing::trace!(actualizer = %self.name, offset = %offset, "Event queued");
        Ok(())
    }
}
