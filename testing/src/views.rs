//! In-memory view store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use plogview_core::{BoxFuture, QName, StoreError, ViewKey, ViewStore};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// View store backed by an ordered map, for fast, deterministic tests.
///
/// Batches are applied atomically: an injected failure rejects the whole
/// batch and leaves the store untouched.
///
/// # Example
///
/// ```
/// use plogview_core::{QName, ViewKey, ViewStore, WorkspaceId};
/// use plogview_testing::InMemoryViewStore;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryViewStore::new();
/// let key = ViewKey::new(QName::new("test", "Totals"), WorkspaceId::new(1001), "total");
///
/// store.put_batch(vec![(key.clone(), vec![1, 2, 3])]).await.unwrap();
/// assert_eq!(store.get(&key).await.unwrap(), Some(vec![1, 2, 3]));
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryViewStore {
    rows: Arc<RwLock<BTreeMap<ViewKey, Vec<u8>>>>,
    failing_puts: Arc<AtomicUsize>,
    failing_gets: Arc<AtomicUsize>,
    batches: Arc<AtomicUsize>,
}

impl InMemoryViewStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the row under `key` with bincode.
    ///
    /// Returns `None` if the row is absent.
    #[must_use]
    pub fn value<T: DeserializeOwned>(&self, key: &ViewKey) -> Option<T> {
        self.rows
            .read()
            .unwrap()
            .get(key)
            .map(|bytes| bincode::deserialize(bytes).unwrap())
    }

    /// Make the next `count` batches fail.
    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` reads fail.
    pub fn fail_next_gets(&self, count: usize) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    /// Number of batches committed so far.
    #[must_use]
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Keys of every row of `view`, in order.
    #[must_use]
    pub fn keys_of(&self, view: &QName) -> Vec<ViewKey> {
        self.rows
            .read()
            .unwrap()
            .keys()
            .filter(|key| &key.view == view)
            .cloned()
            .collect()
    }

    /// Check if a row exists under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &ViewKey) -> bool {
        self.rows.read().unwrap().contains_key(key)
    }

    /// Number of rows across all views.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }

    /// Remove every row (for test isolation).
    pub fn clear(&self) {
        self.rows.write().unwrap().clear();
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl ViewStore for InMemoryViewStore {
    fn get<'a>(&'a self, key: &'a ViewKey) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        let result = if Self::take_failure(&self.failing_gets) {
            Err(StoreError::Backend("injected get failure".to_string()))
        } else {
            Ok(self.rows.read().unwrap().get(key).cloned())
        };
        Box::pin(async move { result })
    }

    fn put_batch(&self, batch: Vec<(ViewKey, Vec<u8>)>) -> BoxFuture<'_, Result<(), StoreError>> {
        let result = if Self::take_failure(&self.failing_puts) {
            Err(StoreError::Backend("injected put failure".to_string()))
        } else {
            self.rows.write().unwrap().extend(batch);
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        Box::pin(async move { result })
    }
}
