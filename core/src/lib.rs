//! # plogview core
//!
//! Core types and collaborator traits for the plogview projection engine.
//!
//! The engine keeps materialized views consistent with an append-only,
//! partitioned event log. This crate holds everything the engine and its
//! collaborators agree on, and nothing that does work:
//!
//! - **Names**: [`QName`], [`AppQName`], [`Offset`], [`PartitionId`], [`WorkspaceId`]
//! - **Events**: [`LogEvent`], the immutable log entry handed to projectors
//! - **Projectors**: [`Projector`] descriptors and the [`ProjectorFn`] logic trait
//! - **Intents**: [`Intents`], pending view writes produced by a projector
//! - **Seams**: [`EventLog`], [`ViewStore`], [`Broker`], [`State`], [`SecretReader`]
//!
//! ## Data Flow
//!
//! ```text
//! EventLog ──► actualizer ──► ProjectorFn(event, &dyn State, &mut Intents)
//!                  │                                   │
//!                  │◄──────────── intents ─────────────┘
//!                  ▼
//!              ViewStore (view rows + checkpoint) ──► Broker::update
//! ```
//!
//! The actualizers themselves live in `plogview-projections`.

pub mod broker;
pub mod event;
pub mod intents;
pub mod log;
pub mod names;
pub mod projector;
pub mod state;
pub mod view;

pub use broker::{Broker, BrokerError, ChannelId, Notification, NotificationStream, ProjectionKey};
pub use event::{EventErrorMarker, LogEvent, PayloadError};
pub use intents::{Intents, IntentsError};
pub use log::{EventLog, LogError, ReadLimit};
pub use names::{AppQName, Offset, PartitionId, QName, WorkspaceId};
pub use projector::{Projector, ProjectorError, ProjectorFactory, ProjectorFn};
pub use state::{SecretError, SecretReader, State, StateExt};
pub use view::{StoreError, ViewKey, ViewStore};

// Re-exported so projector implementations can name the boxed future type
// without depending on `futures` directly.
pub use futures::future::BoxFuture;
