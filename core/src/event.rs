//! Partition log events as seen by projectors.
//!
//! A [`LogEvent`] is an immutable handle to one entry of a partition log
//! (PLog). Events are shared as `Arc<LogEvent>`: the log reader hands one
//! reference to the actualizer, the actualizer moves it through its pipeline,
//! and the event's resources are released when the last reference is dropped.
//!
//! # Payloads
//!
//! The payload is opaque to the engine. Projectors that need it decode it with
//! [`LogEvent::decode_payload`], which uses `bincode` like the rest of the
//! record layer.

use crate::names::{Offset, QName, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Error raised when an event payload cannot be encoded or decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Failed to serialize the payload.
    #[error("Failed to serialize event payload: {0}")]
    Serialization(String),

    /// Failed to deserialize the payload.
    #[error("Failed to deserialize event payload: {0}")]
    Deserialization(String),
}

/// Marker carried by events whose command failed.
///
/// Only projectors that declare `handle_errors` receive such events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventErrorMarker {
    /// Error text recorded with the event.
    pub message: String,
}

/// One entry of a partition log.
///
/// # Examples
///
/// ```
/// use plogview_core::event::LogEvent;
/// use plogview_core::names::{Offset, QName, WorkspaceId};
///
/// let event = LogEvent::new(Offset::new(1), WorkspaceId::new(1001), QName::new("test", "cmd"))
///     .with_arg(QName::new("test", "order"));
///
/// assert_eq!(event.offset(), Offset::new(1));
/// assert_eq!(event.arg_name(), Some(&QName::new("test", "order")));
/// assert!(!event.is_error());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    offset: Offset,
    workspace: WorkspaceId,
    wlog_offset: Offset,
    name: QName,
    arg_name: Option<QName>,
    error: Option<EventErrorMarker>,
    payload: Vec<u8>,
    registered_at: DateTime<Utc>,
}

impl LogEvent {
    /// Create an event at `offset` of its partition log.
    ///
    /// The workspace log offset defaults to the partition offset; use
    /// [`LogEvent::with_wlog_offset`] when they differ.
    #[must_use]
    pub fn new(offset: Offset, workspace: WorkspaceId, name: QName) -> Self {
        Self {
            offset,
            workspace,
            wlog_offset: offset,
            name,
            arg_name: None,
            error: None,
            payload: Vec::new(),
            registered_at: Utc::now(),
        }
    }

    /// Set the offset of this event inside its workspace log.
    #[must_use]
    pub const fn with_wlog_offset(mut self, wlog_offset: Offset) -> Self {
        self.wlog_offset = wlog_offset;
        self
    }

    /// Set the type name of the event's argument object.
    #[must_use]
    pub fn with_arg(mut self, arg_name: QName) -> Self {
        self.arg_name = Some(arg_name);
        self
    }

    /// Mark the event as an error event.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(EventErrorMarker {
            message: message.into(),
        });
        self
    }

    /// Attach an opaque payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Attach a payload encoded with `bincode`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Serialization`] if the value cannot be encoded.
    pub fn with_encoded_payload<T: Serialize>(mut self, value: &T) -> Result<Self, PayloadError> {
        self.payload =
            bincode::serialize(value).map_err(|e| PayloadError::Serialization(e.to_string()))?;
        Ok(self)
    }

    /// Partition-assigned offset.
    #[must_use]
    pub const fn offset(&self) -> Offset {
        self.offset
    }

    /// Owning workspace.
    #[must_use]
    pub const fn workspace(&self) -> WorkspaceId {
        self.workspace
    }

    /// Offset inside the owning workspace's log.
    #[must_use]
    pub const fn wlog_offset(&self) -> Offset {
        self.wlog_offset
    }

    /// Event type name.
    #[must_use]
    pub const fn name(&self) -> &QName {
        &self.name
    }

    /// Argument object type name, if the event carries one.
    #[must_use]
    pub const fn arg_name(&self) -> Option<&QName> {
        self.arg_name.as_ref()
    }

    /// Error marker, if the event's command failed.
    #[must_use]
    pub const fn error(&self) -> Option<&EventErrorMarker> {
        self.error.as_ref()
    }

    /// Whether the event carries an error marker.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// When the event was registered in the log.
    #[must_use]
    pub const fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Decode the payload with `bincode`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Deserialization`] if the payload does not decode as `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        bincode::deserialize(&self.payload).map_err(|e| PayloadError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        total: i64,
    }

    #[test]
    fn wlog_offset_defaults_to_plog_offset() {
        let event = LogEvent::new(Offset::new(5), WorkspaceId::new(1), QName::new("t", "e"));
        assert_eq!(event.wlog_offset(), Offset::new(5));

        let event = event.with_wlog_offset(Offset::new(2));
        assert_eq!(event.offset(), Offset::new(5));
        assert_eq!(event.wlog_offset(), Offset::new(2));
    }

    #[test]
    fn error_marker() {
        let event = LogEvent::new(Offset::new(1), WorkspaceId::new(1), QName::new("t", "e"))
            .with_error("validation failed");
        assert!(event.is_error());
        assert_eq!(
            event.error().map(|e| e.message.as_str()),
            Some("validation failed")
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn payload_decodes() {
        let order = Order { id: 7, total: -3 };
        let event = LogEvent::new(Offset::new(1), WorkspaceId::new(1), QName::new("t", "e"))
            .with_encoded_payload(&order)
            .unwrap();
        assert_eq!(event.decode_payload::<Order>().unwrap(), order);
    }

    #[test]
    fn garbage_payload_fails_to_decode() {
        let event = LogEvent::new(Offset::new(1), WorkspaceId::new(1), QName::new("t", "e"))
            .with_payload(vec![1]);
        assert!(matches!(
            event.decode_payload::<Order>(),
            Err(PayloadError::Deserialization(_))
        ));
    }
}
