//! Test plumbing: error capture, secrets, polling and log output.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use plogview_core::{SecretError, SecretReader};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Collects `(actualizer, error)` pairs reported by actualizers.
///
/// Plug it into an actualizer's error logger:
///
/// ```ignore
/// let errors = ErrorRecorder::new();
/// let sink = errors.clone();
/// let deps = deps.with_error_logger(Arc::new(move |name, err| sink.record(name, err)));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ErrorRecorder {
    errors: Arc<Mutex<Vec<(String, String)>>>,
}

impl ErrorRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` reported by actualizer `name`.
    pub fn record(&self, name: &str, error: &dyn Display) {
        self.errors
            .lock()
            .unwrap()
            .push((name.to_string(), error.to_string()));
    }

    /// Everything recorded so far, oldest first.
    #[must_use]
    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().unwrap().clone()
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    /// Check if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Secret reader over a fixed map.
#[derive(Clone, Debug, Default)]
pub struct StaticSecrets {
    secrets: HashMap<String, Vec<u8>>,
}

impl StaticSecrets {
    /// Create a reader with no secrets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret.
    #[must_use]
    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

impl SecretReader for StaticSecrets {
    fn read_secret(&self, name: &str) -> Result<Vec<u8>, SecretError> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
///
/// Returns whether the condition held.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Send `tracing` output to the test writer, filtered by `RUST_LOG`.
///
/// Safe to call from every test: only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_keeps_order() {
        let errors = ErrorRecorder::new();
        errors.record("a [1]", &"first");
        errors.record("b [1]", &"second");

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.errors()[1], ("b [1]".to_string(), "second".to_string()));
    }

    #[test]
    fn static_secrets() {
        let secrets = StaticSecrets::new().with_secret("token", "s3cr3t");
        assert_eq!(secrets.read_secret("token").unwrap(), b"s3cr3t".to_vec());
        assert!(matches!(secrets.read_secret("nope"), Err(SecretError::NotFound(_))));
    }

    #[tokio::test]
    async fn wait_until_times_out() {
        assert!(wait_until(Duration::from_millis(1), || async { true }).await);
        assert!(!wait_until(Duration::from_millis(20), || async { false }).await);
    }
}
