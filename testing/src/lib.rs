//! # plogview testing
//!
//! Testing utilities for plogview actualizers.
//!
//! This crate provides:
//! - [`InMemoryEventLog`]: partition log backed by vectors, announcing appends
//!   on a [`Broker`](plogview_core::Broker)
//! - [`InMemoryViewStore`]: view store backed by a map, with failure injection
//! - [`CounterProjector`]: sample projector counting events per workspace
//! - [`ErrorRecorder`], [`StaticSecrets`], [`wait_until`]: test plumbing
//! - [`properties`]: proptest strategies for names and events
//!
//! ## Example
//!
//! ```ignore
//! use plogview_testing::{CounterProjector, InMemoryEventLog, InMemoryViewStore};
//!
//! #[tokio::test]
//! async fn counts_events() {
//!     let log = InMemoryEventLog::new();
//!     let views = InMemoryViewStore::new();
//!     let counter = CounterProjector::incrementor();
//!
//!     log.append(partition, WorkspaceId::new(1001), counter.event());
//!     // run an actualizer over `log` and `views` ...
//!     assert_eq!(views.count(&counter, WorkspaceId::new(1001)), Some(1));
//! }
//! ```

mod log;
mod projectors;
pub mod properties;
mod support;
mod views;

pub use log::InMemoryEventLog;
pub use projectors::{CounterProjector, FAILING_WORKSPACE};
pub use support::{ErrorRecorder, StaticSecrets, init_tracing, wait_until};
pub use views::InMemoryViewStore;
