//! Sample projectors.

use crate::views::InMemoryViewStore;
use plogview_core::{
    BoxFuture, Intents, LogEvent, Projector, ProjectorError, ProjectorFactory, ProjectorFn, QName,
    State, StateExt, ViewKey, WorkspaceId,
};
use std::sync::Arc;
use std::time::Duration;

/// Workspace the stock counters refuse to project.
pub const FAILING_WORKSPACE: WorkspaceId = WorkspaceId::new(1099);

const COUNT_KEY: &str = "count";

/// Projector keeping one `i32` counter per workspace.
///
/// Each accepted event adds `delta` to the workspace's row in `view`. The
/// update reads the current value first, so replaying an event is visible:
/// tests use that to check what was redelivered.
///
/// # Example
///
/// ```
/// use plogview_core::PartitionId;
/// use plogview_testing::CounterProjector;
///
/// let counter = CounterProjector::incrementor();
/// let factory = counter.clone().factory();
/// assert_eq!(factory(PartitionId::new(1)).name(), counter.name());
/// ```
#[derive(Clone, Debug)]
pub struct CounterProjector {
    name: QName,
    view: QName,
    delta: i32,
    fail_on: Option<WorkspaceId>,
    delay: Option<Duration>,
    events: Vec<QName>,
}

impl CounterProjector {
    /// Create a counter adding `delta` per event.
    #[must_use]
    pub const fn new(name: QName, view: QName, delta: i32) -> Self {
        Self {
            name,
            view,
            delta,
            fail_on: None,
            delay: None,
            events: Vec::new(),
        }
    }

    /// `test.Incrementor`: adds one, fails on [`FAILING_WORKSPACE`].
    #[must_use]
    pub fn incrementor() -> Self {
        Self::new(
            QName::new("test", "Incrementor"),
            QName::new("test", "IncrementorView"),
            1,
        )
        .failing_on(Some(FAILING_WORKSPACE))
    }

    /// `test.Decrementor`: subtracts one, fails on [`FAILING_WORKSPACE`].
    #[must_use]
    pub fn decrementor() -> Self {
        Self::new(
            QName::new("test", "Decrementor"),
            QName::new("test", "DecrementorView"),
            -1,
        )
        .failing_on(Some(FAILING_WORKSPACE))
    }

    /// Refuse events of `workspace`, or nothing.
    #[must_use]
    pub const fn failing_on(mut self, workspace: Option<WorkspaceId>) -> Self {
        self.fail_on = workspace;
        self
    }

    /// Sleep this long in every invocation.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Accept only events with these names.
    #[must_use]
    pub fn on_events(mut self, events: impl IntoIterator<Item = QName>) -> Self {
        self.events.extend(events);
        self
    }

    /// Projector name.
    #[must_use]
    pub const fn name(&self) -> &QName {
        &self.name
    }

    /// View the counter is kept in.
    #[must_use]
    pub const fn view(&self) -> &QName {
        &self.view
    }

    /// Row holding the counter of `workspace`.
    #[must_use]
    pub fn key(&self, workspace: WorkspaceId) -> ViewKey {
        ViewKey::new(self.view.clone(), workspace, COUNT_KEY)
    }

    /// Current counter of `workspace` in `views`.
    #[must_use]
    pub fn count(&self, views: &InMemoryViewStore, workspace: WorkspaceId) -> Option<i32> {
        views.value(&self.key(workspace))
    }

    /// Build the projector descriptor.
    #[must_use]
    pub fn projector(&self) -> Projector {
        let func = CountFn {
            view: self.view.clone(),
            delta: self.delta,
            fail_on: self.fail_on,
            delay: self.delay,
        };
        let projector = Projector::new(self.name.clone(), Arc::new(func));
        if self.events.is_empty() {
            projector
        } else {
            projector.on_events(self.events.clone())
        }
    }

    /// Factory building the same projector for every partition.
    #[must_use]
    pub fn factory(self) -> ProjectorFactory {
        Arc::new(move |_| self.projector())
    }
}

struct CountFn {
    view: QName,
    delta: i32,
    fail_on: Option<WorkspaceId>,
    delay: Option<Duration>,
}

impl ProjectorFn for CountFn {
    fn apply<'a>(
        &'a self,
        event: &'a LogEvent,
        state: &'a dyn State,
        intents: &'a mut Intents,
    ) -> BoxFuture<'a, Result<(), ProjectorError>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_on == Some(event.workspace()) {
                return Err(ProjectorError::failed(format!(
                    "workspace {} is not projectable",
                    event.workspace()
                )));
            }

            let key = ViewKey::new(self.view.clone(), event.workspace(), COUNT_KEY);
            let count: i32 = state.get_value(&key).await?.unwrap_or(0);
            intents.put_value(key, &(count + self.delta))?;
            Ok(())
        })
    }
}
