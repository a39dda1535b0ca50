//! Actualizer metrics.
//!
//! Actualizers report through the [`ActualizerMetrics`] trait. The default
//! [`MetricsRecorder`] forwards to the `metrics` facade, so whatever recorder
//! the process installed (Prometheus via [`PrometheusMetrics`], or nothing)
//! receives:
//!
//! | Metric | Kind | Meaning |
//! |---|---|---|
//! | `actualizer_flushes_total` | counter | completed flushes |
//! | `actualizer_stored_offset` | gauge | last checkpoint written |
//! | `actualizer_current_offset` | gauge | last offset handed to the projector stage |
//! | `actualizer_projectors_in_error` | gauge | 1 while the projector is failing |
//!
//! Every metric is labelled with `app`, `partition` and `projector`.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use plogview_core::{AppQName, Offset, PartitionId, QName};
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install the Prometheus recorder.
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Labels identifying one actualizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActualizerLabels {
    /// Application.
    pub app: AppQName,
    /// Partition.
    pub partition: PartitionId,
    /// Projector.
    pub projector: QName,
}

impl ActualizerLabels {
    fn to_pairs(&self) -> [(&'static str, String); 3] {
        [
            ("app", self.app.to_string()),
            ("partition", self.partition.to_string()),
            ("projector", self.projector.to_string()),
        ]
    }
}

/// Sink for actualizer metrics.
pub trait ActualizerMetrics: Send + Sync {
    /// A flush committed; `stored` is set when a checkpoint was written.
    fn flushed(&self, labels: &ActualizerLabels, stored: Option<Offset>);

    /// A workpiece reached the projector stage.
    fn current_offset(&self, labels: &ActualizerLabels, offset: Offset);

    /// The projector entered or left the error state.
    fn projector_in_error(&self, labels: &ActualizerLabels, in_error: bool);
}

/// [`ActualizerMetrics`] backed by the `metrics` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsRecorder;

#[allow(clippy::cast_precision_loss)]
impl ActualizerMetrics for MetricsRecorder {
    fn flushed(&self, labels: &ActualizerLabels, stored: Option<Offset>) {
        let pairs = labels.to_pairs();
        counter!("actualizer_flushes_total", &pairs).increment(1);
        if let Some(offset) = stored {
            gauge!("actualizer_stored_offset", &pairs).set(offset.value() as f64);
        }
    }

    fn current_offset(&self, labels: &ActualizerLabels, offset: Offset) {
        gauge!("actualizer_current_offset", &labels.to_pairs()).set(offset.value() as f64);
    }

    fn projector_in_error(&self, labels: &ActualizerLabels, in_error: bool) {
        let value = if in_error { 1.0 } else { 0.0 };
        gauge!("actualizer_projectors_in_error", &labels.to_pairs()).set(value);
    }
}

/// Register descriptions of every actualizer metric.
pub fn describe_metrics() {
    describe_counter!(
        "actualizer_flushes_total",
        "Total number of actualizer flushes"
    );
    describe_gauge!(
        "actualizer_stored_offset",
        "Last checkpoint offset written by the actualizer"
    );
    describe_gauge!(
        "actualizer_current_offset",
        "Last log offset handed to the projector"
    );
    describe_gauge!(
        "actualizer_projectors_in_error",
        "Whether the projector is currently failing (0 or 1)"
    );
}

/// Process-wide Prometheus recorder.
#[derive(Default)]
pub struct PrometheusMetrics {
    handle: Option<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Create an uninstalled recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe actualizer metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if the recorder cannot be installed.
    /// A recorder that is already installed is not an error; the handle then
    /// stays empty.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        describe_metrics();

        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already installed, skipping");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}
