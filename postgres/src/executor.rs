//! Transactional statement executor for projections.
//!
//! Executes every statement a reducer emitted for one event plus the
//! cursor upsert in a single transaction. A crash between statements can
//! therefore never double-apply an event: either the cursor moved and all
//! statements are visible, or neither happened.

use portcullis_core::aggregate::{GlobalPosition, InstanceId};
use portcullis_core::projection::{
    Cursor, ProjectionError, Result, SqlParam, Statement, StatementExecutor,
};
use sqlx::postgres::{PgArguments, PgPool};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use std::future::Future;
use std::pin::Pin;

/// PostgreSQL-backed statement executor with cursor tracking.
#[derive(Clone)]
pub struct PostgresStatementExecutor {
    pool: PgPool,
}

impl PostgresStatementExecutor {
    /// Create an executor using an existing connection pool.
    ///
    /// The pool should point at the read-model database, which may differ
    /// from the event store's.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn bind_params<'q>(
        mut query: Query<'q, Postgres, PgArguments>,
        params: &'q [SqlParam],
    ) -> Query<'q, Postgres, PgArguments> {
        for param in params {
            query = match param {
                SqlParam::Text(v) => query.bind(v),
                SqlParam::Bytes(v) => query.bind(v),
                SqlParam::I64(v) => query.bind(v),
                SqlParam::Bool(v) => query.bind(v),
                SqlParam::Timestamp(v) => query.bind(v),
                SqlParam::Json(v) => query.bind(v),
                SqlParam::TextArray(v) => query.bind(v),
                SqlParam::Null => query.bind(Option::<String>::None),
            };
        }
        query
    }
}

impl std::fmt::Debug for PostgresStatementExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStatementExecutor")
            .finish_non_exhaustive()
    }
}

impl StatementExecutor for PostgresStatementExecutor {
    fn apply(
        &self,
        cursor: Cursor,
        statements: Vec<Statement>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| ProjectionError::Storage(e.to_string()))?;

            for statement in &statements {
                Self::bind_params(sqlx::query(&statement.sql), &statement.params)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        ProjectionError::Storage(format!(
                            "statement failed: {e} ({})",
                            statement.sql
                        ))
                    })?;
            }

            #[allow(clippy::cast_possible_wrap)] // Wraps at 2^63 events
            let position = cursor.position.value() as i64;

            sqlx::query(
                "INSERT INTO projections.cursors (projection_name, instance_id, position, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (projection_name, instance_id) DO UPDATE
                 SET position = EXCLUDED.position, updated_at = now()",
            )
            .bind(&cursor.projection_name)
            .bind(cursor.instance_id.as_str())
            .bind(position)
            .execute(&mut *tx)
            .await
            .map_err(|e| ProjectionError::Cursor(format!("failed to save cursor: {e}")))?;

            tx.commit()
                .await
                .map_err(|e| ProjectionError::Storage(e.to_string()))?;

            Ok(())
        })
    }

    fn load_cursor(
        &self,
        projection_name: String,
        instance_id: InstanceId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<GlobalPosition>>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT position FROM projections.cursors
                 WHERE projection_name = $1 AND instance_id = $2",
            )
            .bind(&projection_name)
            .bind(instance_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProjectionError::Cursor(format!("failed to load cursor: {e}")))?;

            row.map(|row| {
                let position: i64 = row
                    .try_get("position")
                    .map_err(|e| ProjectionError::Cursor(e.to_string()))?;
                #[allow(clippy::cast_sign_loss)] // Positions are non-negative
                let position = GlobalPosition::new(position as u64);
                Ok(position)
            })
            .transpose()
        })
    }

    fn reset_cursor(
        &self,
        projection_name: String,
        instance_id: InstanceId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                "DELETE FROM projections.cursors
                 WHERE projection_name = $1 AND instance_id = $2",
            )
            .bind(&projection_name)
            .bind(instance_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Cursor(format!("failed to reset cursor: {e}")))?;
            Ok(())
        })
    }
}
