//! `PostgreSQL` implementation of the event store.
//!
//! # Concurrency
//!
//! `push` runs in a transaction that takes a per-aggregate advisory lock,
//! reads the current head sequence, enforces the caller's expected
//! sequence, and inserts the batch. Two concurrent writers on one
//! aggregate serialize on the lock; the loser of the sequence check gets
//! [`EventStoreError::Conflict`] and nothing is committed.

use portcullis_core::aggregate::{Aggregate, GlobalPosition, Sequence};
use portcullis_core::event::{PendingEvent, StoredEvent};
use portcullis_core::event_store::{EventFilter, EventStore, EventStoreError};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::future::Future;
use std::pin::Pin;

/// PostgreSQL-backed event store.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and create a bounded pool.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Unavailable`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| EventStoreError::Unavailable(format!("failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Run the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EventStoreError::Unavailable(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_event(row: &PgRow) -> Result<StoredEvent, EventStoreError> {
        let sequence: i64 = row
            .try_get("sequence")
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;
        let position: i64 = row
            .try_get("position")
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

        #[allow(clippy::cast_sign_loss)] // Sequences and positions are non-negative
        let (sequence, position) = (
            Sequence::new(sequence as u64),
            GlobalPosition::new(position as u64),
        );

        Ok(StoredEvent {
            aggregate: Aggregate::new(
                row.try_get::<String, _>("instance_id")
                    .map_err(|e| EventStoreError::Serialization(e.to_string()))?
                    .into(),
                row.try_get::<String, _>("aggregate_type")
                    .map_err(|e| EventStoreError::Serialization(e.to_string()))?
                    .as_str()
                    .into(),
                row.try_get::<String, _>("aggregate_id")
                    .map_err(|e| EventStoreError::Serialization(e.to_string()))?
                    .into(),
            ),
            event_type: row
                .try_get("event_type")
                .map_err(|e| EventStoreError::Serialization(e.to_string()))?,
            sequence,
            position,
            created_at: row
                .try_get("created_at")
                .map_err(|e| EventStoreError::Serialization(e.to_string()))?,
            creator: row
                .try_get("creator")
                .map_err(|e| EventStoreError::Serialization(e.to_string()))?,
            payload: row
                .try_get("payload")
                .map_err(|e| EventStoreError::Serialization(e.to_string()))?,
        })
    }
}

impl std::fmt::Debug for PostgresEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresEventStore").finish_non_exhaustive()
    }
}

impl EventStore for PostgresEventStore {
    fn push(
        &self,
        aggregate: Aggregate,
        expected: Option<Sequence>,
        events: Vec<PendingEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

            // Serialize writers per aggregate for the duration of the
            // transaction; released automatically on commit/rollback.
            let lock_key = format!(
                "{}/{}/{}",
                aggregate.instance_id, aggregate.aggregate_type, aggregate.id
            );
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(&lock_key)
                .execute(&mut *tx)
                .await
                .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

            let current: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(sequence), 0) FROM events
                 WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3",
            )
            .bind(aggregate.instance_id.as_str())
            .bind(aggregate.aggregate_type.as_str())
            .bind(aggregate.id.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

            #[allow(clippy::cast_sign_loss)] // MAX(sequence) is non-negative
            let current = Sequence::new(current as u64);

            if let Some(expected) = expected {
                if expected != current {
                    return Err(EventStoreError::Conflict {
                        aggregate_id: aggregate.id,
                        expected,
                        actual: current,
                    });
                }
            }

            let mut stored = Vec::with_capacity(events.len());
            let mut sequence = current;
            for event in events {
                sequence = sequence.next();

                #[allow(clippy::cast_possible_wrap)] // Wraps at 2^63 events per aggregate
                let sequence_i64 = sequence.value() as i64;

                let row = sqlx::query(
                    "INSERT INTO events
                         (instance_id, aggregate_type, aggregate_id, sequence,
                          event_type, payload, creator)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     RETURNING position, created_at",
                )
                .bind(aggregate.instance_id.as_str())
                .bind(aggregate.aggregate_type.as_str())
                .bind(aggregate.id.as_str())
                .bind(sequence_i64)
                .bind(&event.event_type)
                .bind(&event.payload)
                .bind(&event.creator)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

                let position: i64 = row
                    .try_get("position")
                    .map_err(|e| EventStoreError::Serialization(e.to_string()))?;
                #[allow(clippy::cast_sign_loss)] // BIGSERIAL is positive
                let position = GlobalPosition::new(position as u64);

                stored.push(StoredEvent {
                    aggregate: aggregate.clone(),
                    event_type: event.event_type,
                    sequence,
                    position,
                    created_at: row
                        .try_get("created_at")
                        .map_err(|e| EventStoreError::Serialization(e.to_string()))?,
                    creator: event.creator,
                    payload: event.payload,
                });
            }

            tx.commit()
                .await
                .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

            if let Some(first) = stored.first() {
                tracing::debug!(
                    aggregate = %first.aggregate.id,
                    count = stored.len(),
                    head = %sequence,
                    "events pushed"
                );
            }

            Ok(stored)
        })
    }

    fn filter(
        &self,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut sql = String::from(
                "SELECT instance_id, aggregate_type, aggregate_id, sequence,
                        event_type, payload, creator, created_at, position
                 FROM events
                 WHERE instance_id = $1 AND aggregate_type = $2",
            );

            let mut next_param = 3;
            if filter.aggregate_id.is_some() {
                sql.push_str(&format!(" AND aggregate_id = ${next_param}"));
                next_param += 1;
            }
            if !filter.event_types.is_empty() {
                sql.push_str(&format!(" AND event_type = ANY(${next_param})"));
                next_param += 1;
            }
            if filter.from_sequence.is_some() {
                sql.push_str(&format!(" AND sequence >= ${next_param}"));
                next_param += 1;
            }
            if filter.after_position.is_some() {
                sql.push_str(&format!(" AND position > ${next_param}"));
                next_param += 1;
            }
            sql.push_str(" ORDER BY position ASC");
            if filter.limit.is_some() {
                sql.push_str(&format!(" LIMIT ${next_param}"));
            }

            let mut query = sqlx::query(&sql)
                .bind(filter.instance_id.as_str().to_string())
                .bind(filter.aggregate_type.as_str().to_string());

            if let Some(id) = &filter.aggregate_id {
                query = query.bind(id.as_str().to_string());
            }
            if !filter.event_types.is_empty() {
                query = query.bind(filter.event_types.clone());
            }
            if let Some(from) = filter.from_sequence {
                #[allow(clippy::cast_possible_wrap)] // Wraps at 2^63 events per aggregate
                let from_i64 = from.value() as i64;
                query = query.bind(from_i64);
            }
            if let Some(after) = filter.after_position {
                #[allow(clippy::cast_possible_wrap)] // Wraps at 2^63 events
                let after_i64 = after.value() as i64;
                query = query.bind(after_i64);
            }
            if let Some(limit) = filter.limit {
                #[allow(clippy::cast_possible_wrap)] // Limits are small
                let limit_i64 = limit as i64;
                query = query.bind(limit_i64);
            }

            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

            rows.iter().map(Self::row_to_event).collect()
        })
    }
}
