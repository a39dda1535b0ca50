//! Persisted checkpoints of async actualizers.
//!
//! Each (partition, projector) pair owns exactly one row in the reserved
//! `sys.projection_offsets` view, so concurrent actualizers never touch each
//! other's checkpoint.

use plogview_core::intents::SYS_PACKAGE;
use plogview_core::{Offset, PartitionId, QName, StoreError, ViewKey, ViewStore, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Entity name of the checkpoint view in the `sys` package.
pub const OFFSETS_VIEW_ENTITY: &str = "projection_offsets";

/// The checkpoint view.
#[must_use]
pub fn offsets_view() -> QName {
    QName::new(SYS_PACKAGE, OFFSETS_VIEW_ENTITY)
}

/// Stored checkpoint value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecord {
    /// Partition the projector runs on.
    pub partition: i32,
    /// Projector name.
    pub projector_name: QName,
    /// Last offset covered by the committed views.
    pub offset: i64,
}

/// Reads and writes actualizer checkpoints.
#[derive(Clone)]
pub struct OffsetStore {
    views: Arc<dyn ViewStore>,
}

impl OffsetStore {
    /// Create an offset store on top of a view store.
    #[must_use]
    pub fn new(views: Arc<dyn ViewStore>) -> Self {
        Self { views }
    }

    /// Row key of the checkpoint of `projector` on `partition`.
    #[must_use]
    pub fn key(partition: PartitionId, projector: &QName) -> ViewKey {
        ViewKey::new(
            offsets_view(),
            WorkspaceId::NULL,
            format!("{partition}/{projector}"),
        )
    }

    /// Encoded checkpoint row, ready to be committed with other writes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] if the record cannot be encoded.
    #[allow(clippy::cast_possible_wrap)] // log offsets stay far below i64::MAX
    pub fn row(
        partition: PartitionId,
        projector: &QName,
        offset: Offset,
    ) -> Result<(ViewKey, Vec<u8>), StoreError> {
        let record = OffsetRecord {
            partition: i32::from(partition.value()),
            projector_name: projector.clone(),
            offset: offset.value() as i64,
        };
        let bytes =
            bincode::serialize(&record).map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok((Self::key(partition, projector), bytes))
    }

    /// Stored checkpoint, or [`Offset::NULL`] if the projector never flushed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails or the row does not decode.
    #[allow(clippy::cast_sign_loss)]
    pub async fn read(&self, partition: PartitionId, projector: &QName) -> Result<Offset, StoreError> {
        let key = Self::key(partition, projector);
        let Some(bytes) = self.views.get(&key).await? else {
            return Ok(Offset::NULL);
        };
        let record: OffsetRecord =
            bincode::deserialize(&bytes).map_err(|e| StoreError::Codec(format!("{key}: {e}")))?;
        Ok(Offset::new(record.offset.max(0) as u64))
    }

    /// Upsert the checkpoint of `projector` on `partition`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be encoded or written.
    pub async fn write(
        &self,
        partition: PartitionId,
        projector: &QName,
        offset: Offset,
    ) -> Result<(), StoreError> {
        let row = Self::row(partition, projector, offset)?;
        self.views.put_batch(vec![row]).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use plogview_core::BoxFuture;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapStore(Mutex<HashMap<ViewKey, Vec<u8>>>);

    impl ViewStore for MapStore {
        fn get<'a>(&'a self, key: &'a ViewKey) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
            let value = self.0.lock().unwrap().get(key).cloned();
            Box::pin(async move { Ok(value) })
        }

        fn put_batch(&self, batch: Vec<(ViewKey, Vec<u8>)>) -> BoxFuture<'_, Result<(), StoreError>> {
            self.0.lock().unwrap().extend(batch);
            Box::pin(async { Ok(()) })
        }
    }

    fn projector() -> QName {
        QName::new("app", "Incrementor")
    }

    #[test]
    fn key_is_scoped_to_partition_and_projector() {
        let key = OffsetStore::key(PartitionId::new(7), &projector());
        assert_eq!(key.view, offsets_view());
        assert_eq!(key.workspace, WorkspaceId::NULL);
        assert_eq!(key.key, "7/app.Incrementor");
    }

    #[tokio::test]
    async fn read_absent_is_null() {
        let store = OffsetStore::new(Arc::new(MapStore::default()));
        let offset = store.read(PartitionId::new(1), &projector()).await.unwrap();
        assert!(offset.is_null());
    }

    #[tokio::test]
    async fn write_then_read() {
        let store = OffsetStore::new(Arc::new(MapStore::default()));
        let partition = PartitionId::new(1);

        store.write(partition, &projector(), Offset::new(5)).await.unwrap();
        store.write(partition, &projector(), Offset::new(9)).await.unwrap();

        assert_eq!(store.read(partition, &projector()).await.unwrap(), Offset::new(9));
        assert!(
            store
                .read(PartitionId::new(2), &projector())
                .await
                .unwrap()
                .is_null()
        );
    }

    #[tokio::test]
    async fn corrupt_row_is_codec_error() {
        let views = Arc::new(MapStore::default());
        views
            .put_batch(vec![(OffsetStore::key(PartitionId::new(1), &projector()), vec![1])])
            .await
            .unwrap();

        let store = OffsetStore::new(views);
        let err = store.read(PartitionId::new(1), &projector()).await.unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }
}
