//! Identifier types shared by every part of the engine.
//!
//! The type system that owns these names (application definitions, schemas,
//! workspaces) lives outside this workspace. Here they are just strong,
//! comparable, serializable values:
//!
//! - [`QName`]: qualified name of a projector, view, event or argument type
//! - [`AppQName`]: qualified application name
//! - [`Offset`]: position of an event in a partition log
//! - [`PartitionId`], [`WorkspaceId`]: shard and tenant identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing a [`QName`] or [`AppQName`] fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid qualified name '{input}': {reason}")]
pub struct ParseNameError {
    input: String,
    reason: &'static str,
}

impl ParseNameError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// Qualified name in `package.entity` form.
///
/// # Validation
///
/// - `FromStr::from_str()`: rejects input without exactly one `.` separator or with empty parts
/// - `new()`: no validation (for names built from trusted, application-controlled data)
///
/// # Examples
///
/// ```
/// use plogview_core::names::QName;
///
/// let name = QName::new("test", "incrementor");
/// assert_eq!(name.to_string(), "test.incrementor");
///
/// let parsed: QName = "test.incrementor".parse().unwrap();
/// assert_eq!(parsed, name);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QName {
    pkg: String,
    entity: String,
}

impl QName {
    /// Create a qualified name from its package and entity parts.
    #[must_use]
    pub fn new(pkg: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            pkg: pkg.into(),
            entity: entity.into(),
        }
    }

    /// Package part.
    #[must_use]
    pub fn pkg(&self) -> &str {
        &self.pkg
    }

    /// Entity part.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pkg, self.entity)
    }
}

impl FromStr for QName {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(pkg), Some(entity), None) if !pkg.is_empty() && !entity.is_empty() => {
                Ok(Self::new(pkg, entity))
            }
            _ => Err(ParseNameError::new(s, "expected `package.entity`")),
        }
    }
}

/// Qualified application name in `owner/name` form.
///
/// # Examples
///
/// ```
/// use plogview_core::names::AppQName;
///
/// let app: AppQName = "untill/airs-bp".parse().unwrap();
/// assert_eq!(app.owner(), "untill");
/// assert_eq!(app.name(), "airs-bp");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppQName {
    owner: String,
    name: String,
}

impl AppQName {
    /// Create an application name from owner and name parts.
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Owner part.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Name part.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for AppQName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for AppQName {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(owner, name))
            }
            _ => Err(ParseNameError::new(s, "expected `owner/name`")),
        }
    }
}

/// Position of an event within its partition log.
///
/// Offsets start at 1. [`Offset::NULL`] (0) means "nothing processed yet".
///
/// # Examples
///
/// ```
/// use plogview_core::names::Offset;
///
/// let first = Offset::NULL.next();
/// assert_eq!(first, Offset::new(1));
/// assert!(Offset::NULL.is_null());
/// ```
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Offset(u64);

impl Offset {
    /// The "never run" offset.
    pub const NULL: Self = Self(0);

    /// Create an offset with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The following offset (current + 1). Saturates at `u64::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Whether this is [`Offset::NULL`].
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Offset {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Offset> for u64 {
    fn from(offset: Offset) -> Self {
        offset.0
    }
}

/// Identifier of a disjoint shard of the event log.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PartitionId(u16);

impl PartitionId {
    /// Create a partition id.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for PartitionId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// Identifier of the workspace (tenant) an event belongs to.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct WorkspaceId(u64);

impl WorkspaceId {
    /// Workspace used for system rows that belong to no tenant.
    pub const NULL: Self = Self(0);

    /// Create a workspace id.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for WorkspaceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<PartitionId> for WorkspaceId {
    fn from(partition: PartitionId) -> Self {
        Self(u64::from(partition.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod qname_tests {
        use super::*;

        #[test]
        #[allow(clippy::expect_used)] // Panics: Test will fail if parse fails
        fn parse_round_trips_display() {
            let name: QName = "sys.projection_offsets".parse().expect("parse should succeed");
            assert_eq!(name.pkg(), "sys");
            assert_eq!(name.entity(), "projection_offsets");
            assert_eq!(name.to_string(), "sys.projection_offsets");
        }

        #[test]
        fn parse_rejects_malformed() {
            assert!("".parse::<QName>().is_err());
            assert!("nodot".parse::<QName>().is_err());
            assert!(".entity".parse::<QName>().is_err());
            assert!("pkg.".parse::<QName>().is_err());
            assert!("a.b.c".parse::<QName>().is_err());
        }

        #[test]
        fn ordering_is_by_package_then_entity() {
            assert!(QName::new("a", "z") < QName::new("b", "a"));
            assert!(QName::new("a", "a") < QName::new("a", "b"));
        }
    }

    mod app_qname_tests {
        use super::*;

        #[test]
        fn parse_rejects_malformed() {
            assert!("owner".parse::<AppQName>().is_err());
            assert!("/name".parse::<AppQName>().is_err());
            assert!("owner/".parse::<AppQName>().is_err());
            assert!("a/b/c".parse::<AppQName>().is_err());
        }

        #[test]
        fn display() {
            assert_eq!(AppQName::new("test", "app").to_string(), "test/app");
        }
    }

    mod offset_tests {
        use super::*;

        #[test]
        fn null_is_zero_and_next_is_one() {
            assert!(Offset::NULL.is_null());
            assert_eq!(Offset::NULL.next(), Offset::new(1));
            assert!(!Offset::new(1).is_null());
        }

        #[test]
        fn next_saturates_at_max() {
            assert_eq!(Offset::new(u64::MAX).next(), Offset::new(u64::MAX));
        }

        #[test]
        fn conversions() {
            let offset = Offset::from(42);
            assert_eq!(u64::from(offset), 42);
            assert_eq!(offset.value(), 42);
        }
    }

    #[test]
    fn partition_maps_to_workspace() {
        assert_eq!(WorkspaceId::from(PartitionId::new(7)), WorkspaceId::new(7));
    }
}
