//! Sync actualizer: projectors run inline with event ingestion.
//!
//! Every projector wired into a [`SyncActualizer`] is a branch. For each
//! event all branches run concurrently, each validating its own intents.
//! The results are then committed together in one batch, or, if any branch
//! failed, discarded together. There is no buffering and no checkpoint:
//! the caller owns retries.

use crate::config::SyncActualizerConfig;
use crate::error::{ActualizerError, Result};
use crate::filter::is_acceptable;
use crate::host_state::ViewReader;
use futures::future::join_all;
use plogview_core::{Intents, LogEvent, Projector, ProjectorFactory, QName, ViewStore};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Maps an ingestion work item to the event projectors see.
pub type WorkToEvent<W> = Arc<dyn Fn(&W) -> Arc<LogEvent> + Send + Sync>;

struct Branch {
    projector: Projector,
    reader: ViewReader,
    intents: Intents,
}

impl Branch {
    async fn run(&mut self, event: &LogEvent) -> Result<()> {
        if !is_acceptable(&self.projector, event) {
            return Ok(());
        }
        self.projector
            .func()
            .apply(event, &self.reader, &mut self.intents)
            .await
            .map_err(|source| ActualizerError::projector(self.projector.name(), event, source))?;
        self.intents.validate()?;
        Ok(())
    }
}

/// Runs one or more projectors per event with all-or-nothing commits.
///
/// # Example
///
/// ```ignore
/// let mut actualizer = SyncActualizer::new(
///     SyncActualizerConfig::new(PartitionId::new(1)),
///     views,
///     incrementor_factory,
///     [decrementor_factory],
/// );
///
/// actualizer.handle(&event).await?;
/// ```
pub struct SyncActualizer<W = Arc<LogEvent>> {
    config: SyncActualizerConfig,
    views: Arc<dyn ViewStore>,
    branches: Vec<Branch>,
    work_to_event: WorkToEvent<W>,
}

impl SyncActualizer<Arc<LogEvent>> {
    /// Create an actualizer whose work items are the events themselves.
    #[must_use]
    pub fn new(
        config: SyncActualizerConfig,
        views: Arc<dyn ViewStore>,
        first: ProjectorFactory,
        others: impl IntoIterator<Item = ProjectorFactory>,
    ) -> Self {
        Self::with_mapping(
            config,
            views,
            Arc::new(|event: &Arc<LogEvent>| Arc::clone(event)),
            first,
            others,
        )
    }
}

impl<W> SyncActualizer<W> {
    /// Create an actualizer that maps work items to events with `work_to_event`.
    #[must_use]
    pub fn with_mapping(
        config: SyncActualizerConfig,
        views: Arc<dyn ViewStore>,
        work_to_event: WorkToEvent<W>,
        first: ProjectorFactory,
        others: impl IntoIterator<Item = ProjectorFactory>,
    ) -> Self {
        let branches = std::iter::once(first)
            .chain(others)
            .map(|factory| Branch {
                projector: factory(config.partition),
                reader: ViewReader::new(views.clone(), config.secrets.clone()),
                intents: Intents::new(config.intents_limit),
            })
            .collect();

        Self {
            config,
            views,
            branches,
            work_to_event,
        }
    }

    /// Names of the wired projectors, in branch order.
    #[must_use]
    pub fn projectors(&self) -> Vec<QName> {
        self.branches
            .iter()
            .map(|branch| branch.projector.name().clone())
            .collect()
    }

    /// Run every projector for `work` and commit their writes together.
    ///
    /// # Errors
    ///
    /// Returns the first failing branch's error (in branch order) after
    /// discarding every branch's intents, or the store error if the commit
    /// fails. Nothing is written in either case.
    pub async fn handle(&mut self, work: &W) -> Result<()> {
        let event = (self.work_to_event)(work);

        let results = join_all(self.branches.iter_mut().map(|branch| branch.run(&event))).await;
        if let Some(err) = results.into_iter().find_map(std::result::Result::err) {
            for branch in &mut self.branches {
                branch.intents.clear();
            }
            tracing::debug!(
                partition = %self.config.partition,
                offset = %event.offset(),
                error = %err,
                "Sync projection aborted"
            );
            return Err(err);
        }

        let batch: Vec<_> = self
            .branches
            .iter_mut()
            .flat_map(|branch| branch.intents.drain().collect::<Vec<_>>())
            .collect();
        if batch.is_empty() {
            return Ok(());
        }

        let changed: BTreeSet<_> = batch
            .iter()
            .map(|(key, _)| (key.view.clone(), key.workspace))
            .collect();
        self.views.put_batch(batch).await?;

        if let Some(notify) = &self.config.notify {
            for (view, workspace) in &changed {
                notify(view, *workspace, event.offset());
            }
        }
        Ok(())
    }
}
