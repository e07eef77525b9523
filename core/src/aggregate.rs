//! Aggregate identity and ordering types.
//!
//! This module defines strong types for addressing aggregates in the event
//! log (`InstanceId`, `AggregateType`, `AggregateId`) and for ordering their
//! events (`Sequence` per aggregate, `GlobalPosition` across the log).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for aggregate id parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid aggregate id: {0}")]
pub struct ParseAggregateIdError(String);

/// The tenant scope that partitions all data.
///
/// Every event, projection row, and cursor is keyed by the instance it
/// belongs to. Requests always carry the instance they act on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a new `InstanceId` from application-controlled input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the instance id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The kind of aggregate an event stream belongs to.
///
/// Aggregate types name consistency boundaries: `"session"`, `"org"`,
/// `"instance"`. Projections subscribe by aggregate type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateType(String);

impl AggregateType {
    /// Create a new `AggregateType`.
    #[must_use]
    pub fn new(ty: impl Into<String>) -> Self {
        Self(ty.into())
    }

    /// Get the aggregate type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AggregateType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a single aggregate instance.
///
/// An aggregate id uniquely identifies one event stream, e.g. one session.
/// Ids are opaque and non-reusable.
///
/// # Validation
///
/// - `FromStr::from_str()`: validates input (rejects empty strings)
/// - `From::from()` and `new()`: no validation, for application-controlled
///   data such as generator output
///
/// # Examples
///
/// ```
/// use portcullis_core::aggregate::AggregateId;
///
/// let id = AggregateId::new("218489028925440001");
/// assert_eq!(id.as_str(), "218489028925440001");
///
/// let parsed: AggregateId = "218489028925440002".parse().unwrap();
/// assert_ne!(parsed, id);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateId(String);

impl AggregateId {
    /// Create a new `AggregateId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the aggregate id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `AggregateId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AggregateId {
    type Err = ParseAggregateIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseAggregateIdError(
                "aggregate id cannot be empty".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for AggregateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AggregateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fully-qualified address of one aggregate in the event log.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregate {
    /// Tenant the aggregate belongs to.
    pub instance_id: InstanceId,
    /// Kind of aggregate (`"session"`, …).
    pub aggregate_type: AggregateType,
    /// Identity of the aggregate instance.
    pub id: AggregateId,
}

impl Aggregate {
    /// Create a new aggregate address.
    #[must_use]
    pub const fn new(instance_id: InstanceId, aggregate_type: AggregateType, id: AggregateId) -> Self {
        Self {
            instance_id,
            aggregate_type,
            id,
        }
    }
}

/// Per-aggregate event sequence number for optimistic concurrency control.
///
/// Sequences start at 0 (no events) and increase by 1 for each event
/// appended to the aggregate, so the first event carries sequence 1.
/// The expected sequence supplied on push detects concurrent writers.
///
/// # Examples
///
/// ```
/// use portcullis_core::aggregate::Sequence;
///
/// let s0 = Sequence::INITIAL;
/// assert!(s0.is_initial());
/// assert_eq!(s0.next(), Sequence::new(1));
/// assert_eq!(Sequence::new(5).value(), 5);
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sequence(u64);

impl Sequence {
    /// The sequence of an aggregate with no events yet.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Sequence` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the sequence number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next sequence (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check whether no event has been appended yet.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Sequence {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Sequence> for u64 {
    fn from(sequence: Sequence) -> Self {
        sequence.0
    }
}

/// Position of an event in the log across all aggregates.
///
/// Positions are totally ordered within one store but carry no ordering
/// guarantee across aggregates beyond "assigned at commit time". The
/// projection cursor tracks positions, not sequences.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalPosition(u64);

impl GlobalPosition {
    /// Position before the first event in the log.
    pub const BEGINNING: Self = Self(0);

    /// Create a new `GlobalPosition`.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the position value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next position.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for GlobalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for GlobalPosition {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod aggregate_id_tests {
        use super::*;

        #[test]
        fn new_creates_aggregate_id() {
            let id = AggregateId::new("session-123");
            assert_eq!(id.as_str(), "session-123");
        }

        #[test]
        #[allow(clippy::expect_used)] // Panics: Test will fail if parse fails
        fn parse_from_str() {
            let id: AggregateId = "session-123".parse().expect("parse should succeed");
            assert_eq!(id, AggregateId::new("session-123"));
        }

        #[test]
        fn parse_empty_string_fails() {
            let result = "".parse::<AggregateId>();
            assert!(result.is_err());
        }

        #[test]
        fn display() {
            let id = AggregateId::new("session-123");
            assert_eq!(format!("{id}"), "session-123");
        }

        #[test]
        fn into_inner() {
            let id = AggregateId::new("session-123");
            assert_eq!(id.into_inner(), "session-123");
        }
    }

    mod sequence_tests {
        use super::*;

        #[test]
        fn initial_sequence() {
            assert_eq!(Sequence::INITIAL, Sequence::new(0));
            assert!(Sequence::INITIAL.is_initial());
        }

        #[test]
        fn next_sequence() {
            let s1 = Sequence::INITIAL.next();
            let s2 = s1.next();
            assert_eq!(s1, Sequence::new(1));
            assert_eq!(s2, Sequence::new(2));
        }

        #[test]
        fn sequence_ordering() {
            assert!(Sequence::new(1) < Sequence::new(2));
            assert!(Sequence::new(3) > Sequence::new(1));
        }

        #[test]
        fn sequence_from_u64() {
            let sequence = Sequence::from(42_u64);
            assert_eq!(sequence.value(), 42);

            let num: u64 = sequence.into();
            assert_eq!(num, 42);
        }
    }

    mod position_tests {
        use super::*;

        #[test]
        fn beginning_is_zero() {
            assert_eq!(GlobalPosition::BEGINNING.value(), 0);
        }

        #[test]
        fn position_ordering() {
            assert!(GlobalPosition::new(1) < GlobalPosition::new(2));
            assert_eq!(GlobalPosition::new(1).next(), GlobalPosition::new(2));
        }
    }

    #[test]
    fn aggregate_address_equality() {
        let a = Aggregate::new(
            InstanceId::from("inst-1"),
            AggregateType::from("session"),
            AggregateId::new("s-1"),
        );
        let b = Aggregate::new(
            InstanceId::from("inst-1"),
            AggregateType::from("session"),
            AggregateId::new("s-1"),
        );
        assert_eq!(a, b);
    }
}
