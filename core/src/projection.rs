//! Projection model: reducing events into relational read tables.
//!
//! Projections are the query side of CQRS. A projection is a *pure*
//! reducer from a stored event to the SQL statements that bring the read
//! table up to date. Purity keeps reducers testable without a database:
//! tests assert the emitted SQL text and arguments, and the executor is
//! the only component that touches a connection.
//!
//! # Exactly-once application
//!
//! The runner executes a projection's statements and the cursor advance in
//! one transaction, so replays after a crash are exactly-once per
//! `(projection, event)` even though delivery is at-least-once.

use crate::aggregate::{GlobalPosition, InstanceId};
use crate::event::StoredEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for projection operations.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cursor load/save error.
    #[error("Cursor error: {0}")]
    Cursor(String),

    /// Event could not be reduced.
    #[error("Event processing error: {0}")]
    EventProcessing(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// A positional SQL argument in a [`Statement`].
///
/// Backend-neutral so reducers stay pure; the executor binds each variant
/// to the driver's parameter type.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlParam {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// 64-bit signed integer.
    I64(i64),
    /// Boolean.
    Bool(bool),
    /// Timestamp with timezone.
    Timestamp(DateTime<Utc>),
    /// JSON document.
    Json(serde_json::Value),
    /// Array of UTF-8 text values.
    TextArray(Vec<String>),
    /// SQL NULL.
    Null,
}

impl From<&str> for SqlParam {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

/// One SQL statement with positional arguments, emitted by a reducer.
///
/// # Examples
///
/// ```
/// use portcullis_core::projection::{SqlParam, Statement};
///
/// let stmt = Statement::new(
///     "DELETE FROM projections.sessions4 WHERE (id = $1) AND (instance_id = $2)",
///     vec![SqlParam::from("s-1"), SqlParam::from("inst-1")],
/// );
/// assert_eq!(stmt.params.len(), 2);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    /// The SQL text with `$n` placeholders.
    pub sql: String,
    /// Positional arguments, in placeholder order.
    pub params: Vec<SqlParam>,
}

impl Statement {
    /// Create a new statement.
    #[must_use]
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Progress marker of one projection within one instance.
///
/// Persisted as `(projection_name, instance_id) → position`; the runner
/// resumes from here after a restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Unique projection name (e.g. `"sessions4"`).
    pub projection_name: String,
    /// Tenant the cursor tracks.
    pub instance_id: InstanceId,
    /// Position of the last event applied.
    pub position: GlobalPosition,
}

impl Cursor {
    /// Cursor at the beginning of the log.
    #[must_use]
    pub fn beginning(projection_name: impl Into<String>, instance_id: InstanceId) -> Self {
        Self {
            projection_name: projection_name.into(),
            instance_id,
            position: GlobalPosition::BEGINNING,
        }
    }
}

/// A projection reduces stored events into read-table statements.
///
/// Implementations must be pure: same event in, same statements out, no
/// I/O. Reducers that don't care about an event type return an empty
/// vector; that still advances the cursor.
///
/// # Example
///
/// ```ignore
/// impl Projection for SessionProjection {
///     fn name(&self) -> &str {
///         "sessions4"
///     }
///
///     fn aggregate_types(&self) -> Vec<AggregateType> {
///         vec!["session".into(), "org".into(), "instance".into()]
///     }
///
///     fn reduce(&self, event: &StoredEvent) -> Result<Vec<Statement>> {
///         match event.event_type.as_str() {
///             "session.terminated" => Ok(vec![Statement::new(
///                 "DELETE FROM projections.sessions4 WHERE (id = $1) AND (instance_id = $2)",
///                 vec![/* … */],
///             )]),
///             _ => Ok(vec![]),
///         }
///     }
/// }
/// ```
pub trait Projection: Send + Sync {
    /// Unique projection name, used as the cursor key.
    fn name(&self) -> &str;

    /// Aggregate types this projection subscribes to.
    fn aggregate_types(&self) -> Vec<crate::aggregate::AggregateType>;

    /// Reduce one event into the statements that update the read table.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::EventProcessing`] for undecodable
    /// payloads; such an event is a poison event and is escalated by the
    /// runner rather than skipped.
    fn reduce(&self, event: &StoredEvent) -> Result<Vec<Statement>>;
}

/// Applies reduced statements and tracks cursors, transactionally.
///
/// The executor is the only projection component that touches a database.
/// [`apply`](StatementExecutor::apply) must run the statements and the
/// cursor upsert in a single transaction so that a crash between the two
/// cannot double-apply an event.
///
/// # Implementations
///
/// - `PostgresStatementExecutor` (in `portcullis-postgres`): production
/// - `RecordingExecutor` (in `portcullis-testing`): captures statements
///
/// # Dyn compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the runner can hold an
/// `Arc<dyn StatementExecutor>`.
pub trait StatementExecutor: Send + Sync {
    /// Execute the statements and advance the cursor, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] when the transaction fails; the
    /// cursor must not advance in that case.
    fn apply(
        &self,
        cursor: Cursor,
        statements: Vec<Statement>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>>;

    /// Load the persisted cursor position, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Cursor`] when the cursor store fails.
    fn load_cursor(
        &self,
        projection_name: String,
        instance_id: InstanceId,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Option<GlobalPosition>>> + Send + '_>,
    >;

    /// Drop the cursor so the projection replays from the beginning.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Cursor`] when the cursor store fails.
    fn reset_cursor(
        &self,
        projection_name: String,
        instance_id: InstanceId,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_holds_sql_and_params() {
        let stmt = Statement::new(
            "UPDATE projections.sessions4 SET (change_date, sequence) = ($1, $2) WHERE (id = $3)",
            vec![
                SqlParam::Timestamp(Utc::now()),
                SqlParam::I64(3),
                SqlParam::from("s-1"),
            ],
        );
        assert!(stmt.sql.starts_with("UPDATE"));
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn cursor_beginning() {
        let cursor = Cursor::beginning("sessions4", InstanceId::from("inst-1"));
        assert_eq!(cursor.position, GlobalPosition::BEGINNING);
        assert_eq!(cursor.projection_name, "sessions4");
    }

    #[test]
    fn sql_param_conversions() {
        assert_eq!(SqlParam::from("x"), SqlParam::Text("x".to_string()));
        assert_eq!(SqlParam::from(7_i64), SqlParam::I64(7));
        assert_eq!(SqlParam::from(true), SqlParam::Bool(true));
    }
}
