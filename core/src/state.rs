//! Read side of a projector's host state.
//!
//! Projectors receive a [`State`] for reads and an
//! [`Intents`](crate::intents::Intents) for writes. What a read observes
//! depends on the actualizer: the async actualizer serves reads from its
//! unflushed bundle first and falls back to the view store, the sync
//! actualizer reads the store directly.

use crate::view::{StoreError, ViewKey};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::future::Future;
use thiserror::Error;

/// Error type for secret lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    /// No secret with this name.
    #[error("Secret not found: {0}")]
    NotFound(String),

    /// The secret backend failed.
    #[error("Failed to read secret {name}: {reason}")]
    Backend {
        /// Secret name.
        name: String,
        /// Backend failure description.
        reason: String,
    },
}

/// Source of application secrets available to projectors.
pub trait SecretReader: Send + Sync {
    /// Read the secret called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::NotFound`] if no such secret exists.
    fn read_secret(&self, name: &str) -> Result<Vec<u8>, SecretError>;
}

/// Read access to views and secrets for one projector invocation.
pub trait State: Send + Sync {
    /// Get the current value of a view row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying store fails.
    fn get<'a>(&'a self, key: &'a ViewKey) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>>;

    /// Read an application secret.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::NotFound`] when no secret reader is configured
    /// or the secret does not exist.
    fn secret(&self, name: &str) -> Result<Vec<u8>, SecretError>;
}

/// Typed helpers available on every [`State`], including `dyn State`.
pub trait StateExt: State {
    /// Get a view row and decode it with `bincode`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] if the stored bytes do not decode as `T`,
    /// or the store's own error if the lookup fails.
    fn get_value<'a, T>(
        &'a self,
        key: &'a ViewKey,
    ) -> impl Future<Output = Result<Option<T>, StoreError>> + Send + 'a
    where
        T: DeserializeOwned + Send + 'a,
    {
        async move {
            match self.get(key).await? {
                Some(bytes) => bincode::deserialize(&bytes)
                    .map(Some)
                    .map_err(|e| StoreError::Codec(format!("{key}: {e}"))),
                None => Ok(None),
            }
        }
    }
}

impl<S: State + ?Sized> StateExt for S {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::names::{QName, WorkspaceId};
    use std::collections::HashMap;

    struct Fixed(HashMap<ViewKey, Vec<u8>>);

    impl State for Fixed {
        fn get<'a>(&'a self, key: &'a ViewKey) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
            let value = self.0.get(key).cloned();
            Box::pin(async move { Ok(value) })
        }

        fn secret(&self, name: &str) -> Result<Vec<u8>, SecretError> {
            Err(SecretError::NotFound(name.to_string()))
        }
    }

    fn key(row: &str) -> ViewKey {
        ViewKey::new(QName::new("test", "Totals"), WorkspaceId::new(1), row)
    }

    #[tokio::test]
    async fn get_value_decodes_through_dyn_state() {
        let state = Fixed(HashMap::from([
            (key("good"), bincode::serialize(&42_i64).unwrap()),
            (key("bad"), vec![1]),
        ]));
        let state: &dyn State = &state;

        assert_eq!(state.get_value::<i64>(&key("good")).await.unwrap(), Some(42));
        assert_eq!(state.get_value::<i64>(&key("missing")).await.unwrap(), None);
        assert!(matches!(
            state.get_value::<i64>(&key("bad")).await,
            Err(StoreError::Codec(_))
        ));
    }

    #[test]
    fn missing_secret() {
        let state = Fixed(HashMap::new());
        let result = tokio_test::block_on(async { state.secret("token") });
        assert_eq!(result, Err(SecretError::NotFound("token".to_string())));
    }
}
