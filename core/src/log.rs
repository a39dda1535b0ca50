//! Partition log (PLog) reader seam.
//!
//! The log is an ordered, append-only, partitioned sequence of events. Offsets
//! inside a partition start at 1 and increase by one per event. Actualizers
//! only ever read it.

use crate::event::LogEvent;
use crate::names::{Offset, PartitionId};
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

/// Error type for log reads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The partition is not served by this log.
    #[error("Unknown partition: {0}")]
    UnknownPartition(PartitionId),

    /// Backend failure while reading.
    #[error("Failed to read partition {partition} from offset {from}: {reason}")]
    ReadFailed {
        /// Partition being read.
        partition: PartitionId,
        /// First requested offset.
        from: Offset,
        /// Failure description.
        reason: String,
    },
}

/// How many events a single read may return.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadLimit {
    /// Everything up to the current end of the log.
    ToTheEnd,
    /// At most this many events.
    Count(usize),
}

impl ReadLimit {
    /// Whether `read` events already satisfy this limit.
    #[must_use]
    pub const fn is_reached(self, read: usize) -> bool {
        match self {
            Self::ToTheEnd => false,
            Self::Count(n) => read >= n,
        }
    }
}

/// Read access to partition logs.
pub trait EventLog: Send + Sync {
    /// Read events of `partition` starting at offset `from` (inclusive), in
    /// increasing offset order.
    ///
    /// An empty result means there is nothing at or after `from` yet.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] if the partition is unknown or the read fails.
    fn read(
        &self,
        partition: PartitionId,
        from: Offset,
        limit: ReadLimit,
    ) -> BoxFuture<'_, Result<Vec<Arc<LogEvent>>, LogError>>;
}
