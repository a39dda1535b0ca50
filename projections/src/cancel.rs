//! Cancellation plumbing shared by an actualizer and its pipeline.
//!
//! Shutdown is a `watch::channel(false)` flipped to `true`, the same signal
//! the registry hands to every actualizer. A [`ReadContext`] layers one read
//! session on top of it: the pipeline cancels the session when it fails and
//! records the first error, the reader observes the cancellation and the
//! outer loop collects the error.

use crate::error::ActualizerError;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Create a shutdown signal that fires when `parent` fires or when the
/// returned sender is set to `true`.
///
/// Must be called inside a tokio runtime: a small task forwards the parent
/// signal until every receiver of the child is gone.
#[must_use]
pub fn child_shutdown(parent: &watch::Receiver<bool>) -> (watch::Sender<bool>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(is_shutdown(parent));
    let forward = tx.clone();
    let mut parent = parent.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = parent.wait_for(|stop| *stop) => {
                forward.send_replace(true);
            }
            () = forward.closed() => {}
        }
    });

    (tx, rx)
}

/// Whether a shutdown signal fired. A dropped sender counts as shutdown.
pub(crate) fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Resolve once the shutdown signal fires.
pub(crate) async fn wait_shutdown(shutdown: &watch::Receiver<bool>) {
    let mut shutdown = shutdown.clone();
    // Err means the sender is gone, which also stops the actualizer.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Cancellation and first error of one read session.
#[derive(Clone)]
pub(crate) struct ReadContext {
    inner: Arc<Inner>,
    shutdown: watch::Receiver<bool>,
}

struct Inner {
    cancelled: watch::Sender<bool>,
    error: Mutex<Option<ActualizerError>>,
}

impl ReadContext {
    pub(crate) fn new(shutdown: watch::Receiver<bool>) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cancelled,
                error: Mutex::new(None),
            }),
            shutdown,
        }
    }

    /// Record `err` unless an error is already recorded, then cancel.
    pub(crate) fn cancel_with_error(&self, err: ActualizerError) {
        {
            let mut error = self.inner.error.lock().unwrap_or_else(PoisonError::into_inner);
            if error.is_none() {
                *error = Some(err);
            }
        }
        self.inner.cancelled.send_replace(true);
    }

    /// First recorded error, if any.
    pub(crate) fn error(&self) -> Option<ActualizerError> {
        self.inner
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the session was cancelled by an error or by shutdown.
    pub(crate) fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.borrow() || self.is_shutdown()
    }

    /// Whether process shutdown was signalled.
    pub(crate) fn is_shutdown(&self) -> bool {
        is_shutdown(&self.shutdown)
    }

    /// Resolve once the session is cancelled.
    pub(crate) async fn cancelled(&self) {
        let mut own = self.inner.cancelled.subscribe();
        tokio::select! {
            // The sender lives in `inner`, so this cannot fail while `self` exists.
            _ = own.wait_for(|cancelled| *cancelled) => {}
            () = wait_shutdown(&self.shutdown) => {}
        }
    }
}
