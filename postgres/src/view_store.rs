use metrics::{counter, histogram};
use plogview_core::{BoxFuture, StoreError, ViewKey, ViewStore};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Instant;

/// Table used by [`PostgresViewStore::connect`].
pub const DEFAULT_TABLE: &str = "view_records";

/// PostgreSQL-backed view store.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE view_records (
///     view TEXT NOT NULL,
///     workspace BIGINT NOT NULL,
///     key TEXT NOT NULL,
///     data BYTEA NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
///     PRIMARY KEY (view, workspace, key)
/// );
/// ```
///
/// Views are stored by their qualified name (`pkg.Entity`). Checkpoints are
/// ordinary rows of the `sys.projection_offsets` view under workspace 0.
///
/// # Example
///
/// ```ignore
/// use plogview_postgres::PostgresViewStore;
///
/// // Share a pool with the rest of the application
/// let views = PostgresViewStore::new(pool, "view_records".to_string());
///
/// // Or open a dedicated one
/// let views = PostgresViewStore::connect("postgres://localhost/views").await?;
/// views.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresViewStore {
    pool: PgPool,
    table_name: String,
}

impl PostgresViewStore {
    /// Create a view store on an existing connection pool.
    ///
    /// `table_name` is interpolated into every statement; it must be a
    /// trusted identifier.
    #[must_use]
    pub const fn new(pool: PgPool, table_name: String) -> Self {
        Self { pool, table_name }
    }

    /// Connect to `database_url` and use [`DEFAULT_TABLE`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool, DEFAULT_TABLE.to_string()))
    }

    /// Create the view table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                view TEXT NOT NULL,
                workspace BIGINT NOT NULL,
                key TEXT NOT NULL,
                data BYTEA NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (view, workspace, key)
            )",
            self.table_name
        );

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))?;

        tracing::info!(table = %self.table_name, "View table ready");
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the table name for this view store.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn put_rows(&self, batch: Vec<(ViewKey, Vec<u8>)>) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO {} (view, workspace, key, data, updated_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (view, workspace, key) DO UPDATE
             SET data = EXCLUDED.data, updated_at = now()",
            self.table_name
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to start transaction: {e}")))?;

        // One statement per row: a multi-row upsert rejects a key repeated
        // inside the batch, and later writes must win.
        for (key, data) in batch {
            sqlx::query(&query)
                .bind(key.view.to_string())
                .bind(workspace_column(&key))
                .bind(&key.key)
                .bind(data)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Backend(format!("Failed to write {key}: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to commit transaction: {e}")))?;
        Ok(())
    }
}

// Workspace ids fit in 63 bits; BIGINT is signed.
#[allow(clippy::cast_possible_wrap)]
const fn workspace_column(key: &ViewKey) -> i64 {
    key.workspace.value() as i64
}

impl ViewStore for PostgresViewStore {
    fn get<'a>(&'a self, key: &'a ViewKey) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        Box::pin(async move {
            let query = format!(
                "SELECT data FROM {} WHERE view = $1 AND workspace = $2 AND key = $3",
                self.table_name
            );

            let row: Option<(Vec<u8>,)> = sqlx::query_as(&query)
                .bind(key.view.to_string())
                .bind(workspace_column(key))
                .bind(&key.key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    counter!("view_store_errors_total", "operation" => "get").increment(1);
                    StoreError::Backend(format!("Failed to get {key}: {e}"))
                })?;

            Ok(row.map(|(data,)| data))
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn put_batch(&self, batch: Vec<(ViewKey, Vec<u8>)>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(());
            }

            let rows = batch.len();
            let start = Instant::now();
            let result = self.put_rows(batch).await;

            match &result {
                Ok(()) => {
                    histogram!("view_store_batch_rows").record(rows as f64);
                    histogram!("view_store_put_duration_seconds")
                        .record(start.elapsed().as_secs_f64());
                    tracing::trace!(table = %self.table_name, rows, "View batch written");
                }
                Err(e) => {
                    counter!("view_store_errors_total", "operation" => "put_batch").increment(1);
                    tracing::warn!(table = %self.table_name, rows, error = %e, "View batch failed");
                }
            }
            result
        })
    }
}
