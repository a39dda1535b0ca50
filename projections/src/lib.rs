//! Actualizers for plogview.
//!
//! # Overview
//!
//! An *actualizer* keeps a view up to date with the partition log by feeding
//! events to a projector. This crate provides both kinds:
//!
//! - **[`AsyncActualizer`]**: one background task per (application, partition,
//!   projector). Reads from its checkpoint, bundles writes, flushes on size,
//!   on a timer or per event, and sleeps on the [`Broker`](plogview_core::Broker)
//!   while the log is idle. At-least-once: projectors must be idempotent.
//! - **[`SyncActualizer`]**: runs projectors inline with ingestion and commits
//!   their writes all together or not at all.
//!
//! Around them:
//!
//! - **[`ActualizerRegistry`]**: deploy/undeploy of a partition's actualizers
//! - **[`OffsetStore`]**: persisted checkpoints in the `sys.projection_offsets` view
//! - **[`is_acceptable`]**: which events a projector sees
//! - **[`LocalBroker`]**: in-process notification broker
//! - **[`Settings`]**, **[`metrics`]**: environment tuning and metrics
//!
//! # Data Flow
//!
//! ```text
//! EventLog ──read batches──► AsyncActualizer ──► Pipeline
//!    ▲                            ▲               ├─ Projector stage ──flush──► ViewStore
//!    │                            │               └─ ErrorHandler ──cancel──┐
//!  append ──► Broker::update ─────┘ notification                            │
//!                                       restart from checkpoint ◄───────────┘
//! ```

pub mod async_actualizer;
pub mod broker;
mod cancel;
pub mod config;
pub mod error;
pub mod filter;
mod host_state;
pub mod metrics;
pub mod offsets;
mod pipeline;
pub mod registry;
pub mod settings;
pub mod sync_actualizer;

pub use async_actualizer::{AfterErrorFn, AsyncActualizer, AsyncActualizerDeps, ErrorLogger};
pub use broker::{LocalBroker, Quotas};
pub use cancel::child_shutdown;
pub use config::{
    AsyncActualizerConfig, AsyncActualizerConfigBuilder, SyncActualizerConfig, ViewNotifier,
};
pub use error::ActualizerError;
pub use filter::is_acceptable;
pub use metrics::{ActualizerMetrics, MetricsRecorder, describe_metrics};
pub use offsets::{OffsetRecord, OffsetStore, offsets_view};
pub use registry::{ActualizerRegistry, AppDeployment, RegistryError};
pub use settings::{Settings, SettingsError};
pub use sync_actualizer::{SyncActualizer, WorkToEvent};
