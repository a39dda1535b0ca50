//! Pending view writes produced by a projector invocation.
//!
//! A projector never writes to view storage directly. It records *intents*;
//! the actualizer decides when they are validated, bundled, committed or
//! discarded.

use crate::names::QName;
use crate::view::ViewKey;
use serde::Serialize;
use thiserror::Error;

/// Package reserved for engine-owned views (checkpoints and the like).
pub const SYS_PACKAGE: &str = "sys";

/// Default maximum number of intents a single event may produce.
pub const DEFAULT_INTENTS_LIMIT: usize = 100;

/// Error type for intent operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntentsError {
    /// The projector produced more intents than allowed for one event.
    #[error("Intents limit exceeded: at most {limit} intents per event")]
    LimitExceeded {
        /// Configured limit.
        limit: usize,
    },

    /// The intent targets a view owned by the engine.
    #[error("View {0} is reserved and cannot be written by projectors")]
    ReservedView(QName),

    /// The intent has an empty row key.
    #[error("Intent for view {0} has an empty row key")]
    EmptyKey(QName),

    /// The value could not be encoded.
    #[error("Failed to encode intent value: {0}")]
    Codec(String),
}

/// Ordered set of pending view writes.
///
/// Writes to the same key are kept in order; the last one wins when the
/// intents are applied.
///
/// # Examples
///
/// ```
/// use plogview_core::intents::Intents;
/// use plogview_core::names::{QName, WorkspaceId};
/// use plogview_core::view::ViewKey;
///
/// let mut intents = Intents::new(2);
/// let key = ViewKey::new(QName::new("app", "Totals"), WorkspaceId::new(1), "total");
///
/// intents.put_value(key.clone(), &1_i32).unwrap();
/// intents.put_value(key.clone(), &2_i32).unwrap();
/// assert!(intents.put_value(key, &3_i32).is_err()); // limit reached
/// assert_eq!(intents.len(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct Intents {
    limit: usize,
    writes: Vec<(ViewKey, Vec<u8>)>,
}

impl Intents {
    /// Create an empty intents set allowing at most `limit` writes.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            limit,
            writes: Vec::new(),
        }
    }

    /// Record a raw write.
    ///
    /// # Errors
    ///
    /// Returns [`IntentsError::LimitExceeded`] if the limit is already reached.
    pub fn put(&mut self, key: ViewKey, value: Vec<u8>) -> Result<(), IntentsError> {
        if self.writes.len() >= self.limit {
            return Err(IntentsError::LimitExceeded { limit: self.limit });
        }
        self.writes.push((key, value));
        Ok(())
    }

    /// Record a write of a value encoded with `bincode`.
    ///
    /// # Errors
    ///
    /// Returns [`IntentsError::Codec`] if the value cannot be encoded, or
    /// [`IntentsError::LimitExceeded`] if the limit is already reached.
    pub fn put_value<T: Serialize>(&mut self, key: ViewKey, value: &T) -> Result<(), IntentsError> {
        let bytes = bincode::serialize(value).map_err(|e| IntentsError::Codec(e.to_string()))?;
        self.put(key, bytes)
    }

    /// Check every pending write without committing anything.
    ///
    /// # Errors
    ///
    /// Returns the first [`IntentsError`] found: a write into a reserved
    /// `sys` view, or an empty row key.
    pub fn validate(&self) -> Result<(), IntentsError> {
        for (key, _) in &self.writes {
            if key.view.pkg() == SYS_PACKAGE {
                return Err(IntentsError::ReservedView(key.view.clone()));
            }
            if key.key.is_empty() {
                return Err(IntentsError::EmptyKey(key.view.clone()));
            }
        }
        Ok(())
    }

    /// Discard every pending write.
    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Take every pending write, leaving the set empty.
    pub fn drain(&mut self) -> std::vec::Drain<'_, (ViewKey, Vec<u8>)> {
        self.writes.drain(..)
    }

    /// Iterate over pending writes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(ViewKey, Vec<u8>)> {
        self.writes.iter()
    }

    /// Number of pending writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether there are no pending writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Maximum number of writes per event.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::new(DEFAULT_INTENTS_LIMIT)
    }
}
