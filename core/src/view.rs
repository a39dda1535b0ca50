//! View storage seam.
//!
//! Views are materialized, queryable rows derived from log events. The engine
//! only needs a keyed get/put store for them; the storage engine and its
//! on-disk format are somebody else's concern.
//!
//! Values are opaque bytes. Projectors encode and decode them through the
//! typed helpers on [`Intents`](crate::intents::Intents) and
//! [`StateExt`](crate::state::StateExt), which use `bincode`.
//!
//! # Dyn Compatibility
//!
//! [`ViewStore`] returns boxed futures so it can be shared as
//! `Arc<dyn ViewStore>` between actualizers.

use crate::names::{QName, WorkspaceId};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error type for view storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend failure (connection, I/O, constraint violation).
    #[error("Storage error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Result type for view storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Key of one view row.
///
/// Rows are partitioned by view and workspace; `key` identifies the row inside
/// that partition (for example a clustering key rendered as text).
///
/// # Examples
///
/// ```
/// use plogview_core::names::{QName, WorkspaceId};
/// use plogview_core::view::ViewKey;
///
/// let key = ViewKey::new(QName::new("app", "Totals"), WorkspaceId::new(1001), "total");
/// assert_eq!(key.to_string(), "app.Totals[1001]/total");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewKey {
    /// View the row belongs to.
    pub view: QName,
    /// Owning workspace.
    pub workspace: WorkspaceId,
    /// Row key inside the view partition.
    pub key: String,
}

impl ViewKey {
    /// Create a view row key.
    #[must_use]
    pub fn new(view: QName, workspace: WorkspaceId, key: impl Into<String>) -> Self {
        Self {
            view,
            workspace,
            key: key.into(),
        }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]/{}", self.view, self.workspace, self.key)
    }
}

/// Keyed store for view rows.
///
/// Implementations must be safe for concurrent use by many actualizers.
/// Actualizers never write overlapping keys, so no cross-actualizer locking
/// is required beyond what the store does internally.
pub trait ViewStore: Send + Sync {
    /// Get the value stored under `key`.
    ///
    /// # Returns
    ///
    /// - `Some(data)` if the row exists
    /// - `None` if it does not
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the lookup fails.
    fn get<'a>(&'a self, key: &'a ViewKey) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;

    /// Upsert a batch of rows.
    ///
    /// Implementations should apply the batch atomically where the backend
    /// allows it: the async actualizer commits its checkpoint row in the same
    /// batch as the view rows it covers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the write fails.
    fn put_batch(&self, batch: Vec<(ViewKey, Vec<u8>)>) -> BoxFuture<'_, Result<()>>;
}
