//! Mock implementations of core traits for deterministic tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use chrono::{DateTime, Utc};
use portcullis_core::aggregate::{Aggregate, AggregateId, Sequence};
use portcullis_core::clock::Clock;
use portcullis_core::event::{PendingEvent, StoredEvent};
use portcullis_core::event_store::{EventFilter, EventStore, EventStoreError};
use portcullis_core::id::IdGenerator;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making tests reproducible.
///
/// # Example
///
/// ```
/// use portcullis_testing::mocks::FixedClock;
/// use portcullis_core::clock::Clock;
/// use chrono::Utc;
///
/// let clock = FixedClock::new(Utc::now());
/// assert_eq!(clock.now(), clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which should never
/// happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

/// Sequential id generator for predictable ids in tests.
///
/// # Example
///
/// ```
/// use portcullis_testing::mocks::SequentialIdGenerator;
/// use portcullis_core::id::IdGenerator;
///
/// let ids = SequentialIdGenerator::new("session");
/// assert_eq!(ids.next_id(), "session-1");
/// assert_eq!(ids.next_id(), "session-2");
/// ```
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    /// Create a generator with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new("id")
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{n}", self.prefix)
    }
}

/// In-memory event store with full optimistic-concurrency semantics.
///
/// Behaves like the PostgreSQL store from the caller's point of view:
/// atomic batch append, per-aggregate sequences without gaps, global
/// positions, conflict detection against the expected sequence.
///
/// # Example
///
/// ```
/// use portcullis_testing::mocks::InMemoryEventStore;
/// use portcullis_core::aggregate::{Aggregate, Sequence};
/// use portcullis_core::event::PendingEvent;
/// use portcullis_core::event_store::{EventFilter, EventStore};
///
/// # fn main() {
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
/// let store = InMemoryEventStore::new();
/// let aggregate = Aggregate::new("inst-1".into(), "session".into(), "s-1".into());
/// let event = PendingEvent::new("session.added".into(), "u-1".into(), serde_json::json!({}));
///
/// let stored = store
///     .push(aggregate, Some(Sequence::INITIAL), vec![event])
///     .await
///     .unwrap();
/// assert_eq!(stored[0].sequence, Sequence::new(1));
///
/// let events = store
///     .filter(EventFilter::new("inst-1", "session"))
///     .await
///     .unwrap();
/// assert_eq!(events.len(), 1);
/// # });
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Vec<StoredEvent>>>,
    position: Arc<AtomicU64>,
}

impl InMemoryEventStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Vec::new())),
            position: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of events in the store, across all aggregates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// Whether the store holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }

    /// All event types recorded for one aggregate, in order.
    ///
    /// Useful for asserting exactly which facts a command appended.
    #[must_use]
    pub fn event_types_for(&self, aggregate_id: &AggregateId) -> Vec<String> {
        self.inner
            .read()
            .unwrap()
            .iter()
            .filter(|e| &e.aggregate.id == aggregate_id)
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Remove all events (for test isolation).
    pub fn clear(&self) {
        self.inner.write().unwrap().clear();
        self.position.store(0, Ordering::SeqCst);
    }

    fn current_sequence(events: &[StoredEvent], aggregate: &Aggregate) -> Sequence {
        events
            .iter()
            .filter(|e| e.aggregate == *aggregate)
            .map(|e| e.sequence)
            .max()
            .unwrap_or(Sequence::INITIAL)
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    fn push(
        &self,
        aggregate: Aggregate,
        expected: Option<Sequence>,
        events: Vec<PendingEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().unwrap();
            let current = Self::current_sequence(&inner, &aggregate);

            if let Some(expected) = expected {
                if expected != current {
                    return Err(EventStoreError::Conflict {
                        aggregate_id: aggregate.id,
                        expected,
                        actual: current,
                    });
                }
            }

            let now = Utc::now();
            let mut sequence = current;
            let mut stored = Vec::with_capacity(events.len());
            for event in events {
                sequence = sequence.next();
                let position = self.position.fetch_add(1, Ordering::SeqCst) + 1;
                stored.push(StoredEvent {
                    aggregate: aggregate.clone(),
                    event_type: event.event_type,
                    sequence,
                    position: position.into(),
                    created_at: now,
                    creator: event.creator,
                    payload: event.payload,
                });
            }
            inner.extend(stored.iter().cloned());
            Ok(stored)
        })
    }

    fn filter(
        &self,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().unwrap();
            let mut matched: Vec<StoredEvent> = inner
                .iter()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect();
            matched.sort_by_key(|e| e.position);
            if let Some(limit) = filter.limit {
                matched.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            }
            Ok(matched)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_core::aggregate::GlobalPosition;

    fn aggregate(id: &str) -> Aggregate {
        Aggregate::new("inst-1".into(), "session".into(), id.into())
    }

    fn pending(event_type: &str) -> PendingEvent {
        PendingEvent::new(event_type.into(), "u-1".into(), serde_json::json!({}))
    }

    #[tokio::test]
    async fn push_assigns_consecutive_sequences() {
        let store = InMemoryEventStore::new();
        let stored = store
            .push(
                aggregate("s-1"),
                Some(Sequence::INITIAL),
                vec![pending("session.added"), pending("session.token.set")],
            )
            .await
            .unwrap();

        assert_eq!(stored[0].sequence, Sequence::new(1));
        assert_eq!(stored[1].sequence, Sequence::new(2));
        assert!(stored[0].position < stored[1].position);
    }

    #[tokio::test]
    async fn push_with_stale_expected_sequence_conflicts() {
        let store = InMemoryEventStore::new();
        store
            .push(aggregate("s-1"), Some(Sequence::INITIAL), vec![pending("session.added")])
            .await
            .unwrap();

        let err = store
            .push(aggregate("s-1"), Some(Sequence::INITIAL), vec![pending("session.token.set")])
            .await
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Conflict { .. }));
        // The conflicting batch must not be visible.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn sequences_are_per_aggregate() {
        let store = InMemoryEventStore::new();
        store
            .push(aggregate("s-1"), None, vec![pending("session.added")])
            .await
            .unwrap();
        let stored = store
            .push(aggregate("s-2"), None, vec![pending("session.added")])
            .await
            .unwrap();

        assert_eq!(stored[0].sequence, Sequence::new(1));
        assert_eq!(stored[0].position, GlobalPosition::new(2));
    }

    #[tokio::test]
    async fn filter_respects_after_position_and_limit() {
        let store = InMemoryEventStore::new();
        store
            .push(
                aggregate("s-1"),
                None,
                vec![pending("session.added"), pending("session.token.set"), pending("session.terminated")],
            )
            .await
            .unwrap();

        let events = store
            .filter(
                EventFilter::new("inst-1", "session")
                    .after_position(GlobalPosition::new(1))
                    .limit(1),
            )
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "session.token.set");
    }

    #[test]
    fn sequential_ids_are_predictable() {
        let ids = SequentialIdGenerator::new("session");
        assert_eq!(ids.next_id(), "session-1");
        assert_eq!(ids.next_id(), "session-2");
    }
}
