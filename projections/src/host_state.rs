//! Host state handed to projector functions.
//!
//! [`ViewReader`] answers projector reads: from the pending bundle when the
//! row was written but not yet flushed, otherwise from the view store. The
//! sync actualizer uses it with an always-empty bundle.
//!
//! [`BundledState`] is the async actualizer's per-projector state: a reader,
//! the intents of the event being processed and the bundle of applied but
//! uncommitted writes.

use plogview_core::{
    BoxFuture, Intents, IntentsError, LogEvent, Projector, ProjectorError, SecretError,
    SecretReader, State, StoreError, ViewKey, ViewStore,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read side of the host state.
pub(crate) struct ViewReader {
    views: Arc<dyn ViewStore>,
    secrets: Option<Arc<dyn SecretReader>>,
    bundle: BTreeMap<ViewKey, Vec<u8>>,
}

impl ViewReader {
    pub(crate) fn new(views: Arc<dyn ViewStore>, secrets: Option<Arc<dyn SecretReader>>) -> Self {
        Self {
            views,
            secrets,
            bundle: BTreeMap::new(),
        }
    }
}

impl State for ViewReader {
    fn get<'a>(&'a self, key: &'a ViewKey) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        if let Some(value) = self.bundle.get(key) {
            let value = value.clone();
            return Box::pin(async move { Ok(Some(value)) });
        }
        self.views.get(key)
    }

    fn secret(&self, name: &str) -> Result<Vec<u8>, SecretError> {
        match &self.secrets {
            Some(secrets) => secrets.read_secret(name),
            None => Err(SecretError::NotFound(name.to_string())),
        }
    }
}

/// Per-projector state of an async actualizer.
pub(crate) struct BundledState {
    reader: ViewReader,
    intents: Intents,
    bundles_limit: usize,
}

impl BundledState {
    pub(crate) fn new(
        views: Arc<dyn ViewStore>,
        secrets: Option<Arc<dyn SecretReader>>,
        intents_limit: usize,
        bundles_limit: usize,
    ) -> Self {
        Self {
            reader: ViewReader::new(views, secrets),
            intents: Intents::new(intents_limit),
            bundles_limit,
        }
    }

    /// Run the projector for one event, collecting its intents.
    ///
    /// Intents of a failed invocation are discarded.
    pub(crate) async fn invoke(&mut self, projector: &Projector, event: &LogEvent) -> Result<(), ProjectorError> {
        let result = projector
            .func()
            .apply(event, &self.reader, &mut self.intents)
            .await;
        if result.is_err() {
            self.intents.clear();
        }
        result
    }

    /// Validate pending intents and move them into the bundle.
    ///
    /// Returns `true` once the bundle holds at least `bundles_limit` rows.
    pub(crate) fn apply_intents(&mut self) -> Result<bool, IntentsError> {
        if let Err(e) = self.intents.validate() {
            self.intents.clear();
            return Err(e);
        }
        for (key, value) in self.intents.drain() {
            self.reader.bundle.insert(key, value);
        }
        Ok(self.reader.bundle.len() >= self.bundles_limit)
    }

    /// Add an engine-owned row (the checkpoint) to the bundle, bypassing validation.
    pub(crate) fn put_system_row(&mut self, key: ViewKey, value: Vec<u8>) {
        self.reader.bundle.insert(key, value);
    }

    /// Commit the bundle in one batch and return the keys written.
    pub(crate) async fn flush_bundle(&mut self) -> Result<Vec<ViewKey>, StoreError> {
        if self.reader.bundle.is_empty() {
            return Ok(Vec::new());
        }
        let batch: Vec<(ViewKey, Vec<u8>)> = std::mem::take(&mut self.reader.bundle)
            .into_iter()
            .collect();
        let keys = batch.iter().map(|(key, _)| key.clone()).collect();
        self.reader.views.put_batch(batch).await?;
        Ok(keys)
    }

    #[cfg(test)]
    pub(crate) fn bundled(&self) -> usize {
        self.reader.bundle.len()
    }
}
