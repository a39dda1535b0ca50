//! Projectors: named units of projection logic.
//!
//! # Overview
//!
//! A [`Projector`] pairs a [`ProjectorFn`] with the declarations the engine
//! needs to drive it:
//!
//! - **Event filter**: event type names the projector wants
//! - **Argument filter**: argument type names the projector wants (used only
//!   when no event filter is declared)
//! - **Error events**: whether events whose command failed are delivered
//! - **Non-buffered**: whether every accepted event must be flushed at once
//!
//! Descriptors are created by a [`ProjectorFactory`] once per partition at
//! deploy time and are never mutated afterwards.
//!
//! # Example
//!
//! ```ignore
//! struct Incrementor;
//!
//! impl ProjectorFn for Incrementor {
//!     fn apply<'a>(
//!         &'a self,
//!         event: &'a LogEvent,
//!         state: &'a dyn State,
//!         intents: &'a mut Intents,
//!     ) -> BoxFuture<'a, Result<(), ProjectorError>> {
//!         Box::pin(async move {
//!             let key = ViewKey::new(QName::new("app", "Counter"), event.workspace(), "count");
//!             let count: i32 = state.get_value(&key).await?.unwrap_or(0);
//!             intents.put_value(key, &(count + 1))?;
//!             Ok(())
//!         })
//!     }
//! }
//!
//! let projector = Projector::new(QName::new("app", "Incrementor"), Arc::new(Incrementor))
//!     .on_events([QName::new("app", "Increment")]);
//! ```

use crate::event::{LogEvent, PayloadError};
use crate::intents::{Intents, IntentsError};
use crate::names::{PartitionId, QName};
use crate::state::{SecretError, State};
use crate::view::StoreError;
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error type returned by projector functions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectorError {
    /// Projection logic rejected the event.
    #[error("Projector failed: {0}")]
    Failed(String),

    /// Reading state failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Recording an intent failed.
    #[error(transparent)]
    Intents(#[from] IntentsError),

    /// Reading a secret failed.
    #[error(transparent)]
    Secret(#[from] SecretError),

    /// The event payload could not be decoded.
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl ProjectorError {
    /// Shorthand for [`ProjectorError::Failed`].
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Projection logic for one event.
///
/// Implementations read through `state` and record writes in `intents`.
/// They must be idempotent: after a crash the async actualizer redelivers
/// every event after the last persisted checkpoint.
///
/// # Dyn Compatibility
///
/// The method returns a boxed future so projectors of different types can be
/// stored side by side as `Arc<dyn ProjectorFn>`.
pub trait ProjectorFn: Send + Sync {
    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectorError`] if the event cannot be projected. The
    /// actualizer then discards the invocation's intents.
    fn apply<'a>(
        &'a self,
        event: &'a LogEvent,
        state: &'a dyn State,
        intents: &'a mut Intents,
    ) -> BoxFuture<'a, Result<(), ProjectorError>>;
}

/// Immutable projector descriptor.
#[derive(Clone)]
pub struct Projector {
    name: QName,
    func: Arc<dyn ProjectorFn>,
    events: HashSet<QName>,
    args: HashSet<QName>,
    handle_errors: bool,
    non_buffered: bool,
}

impl Projector {
    /// Create a projector that accepts every non-error event.
    #[must_use]
    pub fn new(name: QName, func: Arc<dyn ProjectorFn>) -> Self {
        Self {
            name,
            func,
            events: HashSet::new(),
            args: HashSet::new(),
            handle_errors: false,
            non_buffered: false,
        }
    }

    /// Restrict the projector to the given event type names.
    #[must_use]
    pub fn on_events(mut self, events: impl IntoIterator<Item = QName>) -> Self {
        self.events.extend(events);
        self
    }

    /// Restrict the projector to events whose argument has one of the given type names.
    #[must_use]
    pub fn on_args(mut self, args: impl IntoIterator<Item = QName>) -> Self {
        self.args.extend(args);
        self
    }

    /// Deliver events that carry an error marker.
    #[must_use]
    pub const fn handle_errors(mut self) -> Self {
        self.handle_errors = true;
        self
    }

    /// Flush after every accepted event instead of bundling.
    #[must_use]
    pub const fn non_buffered(mut self) -> Self {
        self.non_buffered = true;
        self
    }

    /// Projector name.
    #[must_use]
    pub const fn name(&self) -> &QName {
        &self.name
    }

    /// Projection logic.
    #[must_use]
    pub fn func(&self) -> &dyn ProjectorFn {
        self.func.as_ref()
    }

    /// Declared event type filter (empty when none).
    #[must_use]
    pub const fn events(&self) -> &HashSet<QName> {
        &self.events
    }

    /// Declared argument type filter (empty when none).
    #[must_use]
    pub const fn args(&self) -> &HashSet<QName> {
        &self.args
    }

    /// Whether error events are delivered.
    #[must_use]
    pub const fn wants_errors(&self) -> bool {
        self.handle_errors
    }

    /// Whether every accepted event forces a flush.
    #[must_use]
    pub const fn is_non_buffered(&self) -> bool {
        self.non_buffered
    }
}

impl fmt::Debug for Projector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projector")
            .field("name", &self.name)
            .field("events", &self.events)
            .field("args", &self.args)
            .field("handle_errors", &self.handle_errors)
            .field("non_buffered", &self.non_buffered)
            .finish_non_exhaustive()
    }
}

/// Builds the projector descriptor for a partition.
pub type ProjectorFactory = Arc<dyn Fn(PartitionId) -> Projector + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl ProjectorFn for Noop {
        fn apply<'a>(
            &'a self,
            _event: &'a LogEvent,
            _state: &'a dyn State,
            _intents: &'a mut Intents,
        ) -> BoxFuture<'a, Result<(), ProjectorError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn builder_sets_declarations() {
        let projector = Projector::new(QName::new("t", "p"), Arc::new(Noop))
            .on_events([QName::new("t", "a"), QName::new("t", "b")])
            .on_args([QName::new("t", "arg")])
            .handle_errors()
            .non_buffered();

        assert_eq!(projector.name(), &QName::new("t", "p"));
        assert_eq!(projector.events().len(), 2);
        assert!(projector.args().contains(&QName::new("t", "arg")));
        assert!(projector.wants_errors());
        assert!(projector.is_non_buffered());
    }

    #[test]
    fn defaults_declare_nothing() {
        let projector = Projector::new(QName::new("t", "p"), Arc::new(Noop));
        assert!(projector.events().is_empty());
        assert!(projector.args().is_empty());
        assert!(!projector.wants_errors());
        assert!(!projector.is_non_buffered());
    }

    #[test]
    fn debug_omits_function() {
        let projector = Projector::new(QName::new("t", "p"), Arc::new(Noop));
        let rendered = format!("{projector:?}");
        assert!(rendered.contains("t.p"));
        assert!(rendered.contains(".."));
    }
}
