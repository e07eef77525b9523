//! Event store trait: the durable, totally-ordered, append-only log.
//!
//! The store is deliberately minimal. It offers exactly two operations:
//! atomic append with optimistic concurrency, and filtered replay. It does
//! NOT provide projection management or subscriptions; the projection
//! runner polls `filter` instead.
//!
//! # Implementations
//!
//! - `PostgresEventStore` (in `portcullis-postgres`): production store
//! - `InMemoryEventStore` (in `portcullis-testing`): fast, deterministic
//!
//! # Dyn compatibility
//!
//! The trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so it can be used as a trait object (`Arc<dyn EventStore>`)
//! captured by the command engine and the projection runner alike.

use crate::aggregate::{
    Aggregate, AggregateId, AggregateType, GlobalPosition, InstanceId, Sequence,
};
use crate::event::{PendingEvent, StoredEvent};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: the aggregate moved past the
    /// expected sequence while the command was in flight. The caller may
    /// reload its write model and retry.
    #[error("Concurrency conflict on {aggregate_id}: expected sequence {expected}, found {actual}")]
    Conflict {
        /// The aggregate where the conflict occurred.
        aggregate_id: AggregateId,
        /// The sequence the writer expected the aggregate to be at.
        expected: Sequence,
        /// The actual current sequence of the aggregate.
        actual: Sequence,
    },

    /// Transient storage error (connection loss, pool exhaustion, …).
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    /// Payload serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invariant violation inside the store itself.
    #[error("Internal event store error: {0}")]
    Internal(String),
}

/// Query over the event log.
///
/// Matches events by instance, aggregate type, optionally a single
/// aggregate, optionally a set of event types, starting from a sequence
/// (per-aggregate replay) or a global position (projection catch-up).
/// Results are returned in ascending `(position, sequence)` order.
///
/// # Examples
///
/// ```
/// use portcullis_core::event_store::EventFilter;
/// use portcullis_core::aggregate::{AggregateId, Sequence};
///
/// let filter = EventFilter::new("inst-1", "session")
///     .aggregate_id(AggregateId::new("s-1"))
///     .from_sequence(Sequence::new(3));
/// assert_eq!(filter.instance_id.as_str(), "inst-1");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct EventFilter {
    /// Tenant to query.
    pub instance_id: InstanceId,
    /// Aggregate type to query.
    pub aggregate_type: AggregateType,
    /// Restrict to a single aggregate.
    pub aggregate_id: Option<AggregateId>,
    /// Restrict to these event types. Empty means all.
    pub event_types: Vec<String>,
    /// Only events with `sequence >= from_sequence`.
    pub from_sequence: Option<Sequence>,
    /// Only events with `position > from_position` (exclusive, for cursors).
    pub after_position: Option<GlobalPosition>,
    /// Maximum number of events to return.
    pub limit: Option<u64>,
}

impl EventFilter {
    /// Create a filter for all events of an aggregate type in an instance.
    #[must_use]
    pub fn new(instance_id: impl Into<InstanceId>, aggregate_type: impl Into<AggregateType>) -> Self {
        Self {
            instance_id: instance_id.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: None,
            event_types: Vec::new(),
            from_sequence: None,
            after_position: None,
            limit: None,
        }
    }

    /// Restrict the filter to a single aggregate.
    #[must_use]
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    /// Restrict the filter to the given event types.
    #[must_use]
    pub fn event_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.event_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Only return events at or after the given per-aggregate sequence.
    #[must_use]
    pub const fn from_sequence(mut self, sequence: Sequence) -> Self {
        self.from_sequence = Some(sequence);
        self
    }

    /// Only return events strictly after the given global position.
    #[must_use]
    pub const fn after_position(mut self, position: GlobalPosition) -> Self {
        self.after_position = Some(position);
        self
    }

    /// Cap the number of returned events.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a stored event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &StoredEvent) -> bool {
        if event.aggregate.instance_id != self.instance_id
            || event.aggregate.aggregate_type != self.aggregate_type
        {
            return false;
        }
        if let Some(id) = &self.aggregate_id {
            if &event.aggregate.id != id {
                return false;
            }
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(from) = self.from_sequence {
            if event.sequence < from {
                return false;
            }
        }
        if let Some(after) = self.after_position {
            if event.position <= after {
                return false;
            }
        }
        true
    }
}

/// The append-only event log.
///
/// # Guarantees
///
/// - `push` is atomic: either every event of the batch is committed with
///   consecutive sequences, or none is.
/// - Within one aggregate, ordering is total; across aggregates no
///   ordering is guaranteed.
/// - An `expected` sequence of `Some(s)` asserts the aggregate currently
///   sits at `s`; a mismatch fails with [`EventStoreError::Conflict`] and
///   commits nothing.
///
/// # Thread safety
///
/// Implementations must be `Send + Sync`; the engine shares one store
/// across all request tasks.
pub trait EventStore: Send + Sync {
    /// Atomically append a batch of events to one aggregate.
    ///
    /// The store assigns each event the next per-aggregate sequence, a
    /// global position, and `created_at = now`, and returns the persisted
    /// events in order.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::Conflict`]: expected sequence mismatch
    /// - [`EventStoreError::Unavailable`]: transient storage failure
    /// - [`EventStoreError::Serialization`]: payload could not be stored
    fn push(
        &self,
        aggregate: Aggregate,
        expected: Option<Sequence>,
        events: Vec<PendingEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventStoreError>> + Send + '_>>;

    /// Load events matching the filter in ascending order.
    ///
    /// Returns an empty vector when nothing matches; an unknown aggregate
    /// is not an error (new streams start empty).
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::Unavailable`]: transient storage failure
    /// - [`EventStoreError::Serialization`]: stored payload corrupt
    fn filter(
        &self,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventStoreError>> + Send + '_>>;
}

impl EventStoreError {
    /// Whether retrying the operation may succeed.
    ///
    /// Conflicts are retryable after reloading the write model;
    /// unavailability is retryable with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_))
    }
}
