//! Error types for actualizers.

use plogview_core::{
    BrokerError, IntentsError, LogError, Offset, ProjectorError, QName, StoreError, WorkspaceId,
};
use thiserror::Error;

/// Error type for actualizer operations.
///
/// Every variant is `Clone` so the first error can be recorded in the
/// actualizer's read context and handed to both the error logger and the
/// restart loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActualizerError {
    /// A projector function failed for an event.
    #[error("{projector}: wsid[{workspace}] offset[{wlog_offset}]: {source}")]
    Projector {
        /// Failing projector.
        projector: QName,
        /// Workspace of the event.
        workspace: WorkspaceId,
        /// Workspace log offset of the event.
        wlog_offset: Offset,
        /// What the projector reported.
        #[source]
        source: ProjectorError,
    },

    /// Intents failed validation or exceeded a limit.
    #[error(transparent)]
    Intents(#[from] IntentsError),

    /// View or checkpoint storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reading the partition log failed.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The notification broker failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The notification stream ended while the actualizer was watching it.
    #[error("Notification stream closed")]
    NotificationsClosed,

    /// The processing pipeline no longer accepts workpieces.
    #[error("Pipeline is closed")]
    PipelineClosed,
}

impl ActualizerError {
    pub(crate) fn projector(projector: &QName, event: &plogview_core::LogEvent, source: ProjectorError) -> Self {
        Self::Projector {
            projector: projector.clone(),
            workspace: event.workspace(),
            wlog_offset: event.wlog_offset(),
            source,
        }
    }
}

/// Result type for actualizer operations.
pub type Result<T> = std::result::Result<T, ActualizerError>;
