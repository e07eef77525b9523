//! In-memory projection testing utilities.
//!
//! Provides a [`RecordingExecutor`] that captures every statement a
//! projection emits together with the cursor it advanced, without touching
//! a database. Tests assert on the recorded SQL text and arguments.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use portcullis_core::aggregate::{GlobalPosition, InstanceId};
use portcullis_core::projection::{
    Cursor, ProjectionError, Result, SqlParam, Statement, StatementExecutor,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Statement executor that records instead of executing.
///
/// Applied statements are kept in order; cursors are tracked per
/// `(projection, instance)` exactly like the PostgreSQL executor. A
/// configurable failure budget lets tests exercise the runner's
/// no-cursor-advance-on-error retry behavior.
///
/// # Example
///
/// ```
/// use portcullis_testing::RecordingExecutor;
///
/// let executor = RecordingExecutor::new();
/// assert!(executor.statements().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct RecordingExecutor {
    applied: Arc<RwLock<Vec<Statement>>>,
    cursors: Arc<RwLock<HashMap<(String, InstanceId), GlobalPosition>>>,
    failures_remaining: Arc<AtomicUsize>,
}

impl RecordingExecutor {
    /// Create a new empty executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `apply` calls fail with a storage error.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// All statements applied so far, in application order.
    #[must_use]
    pub fn statements(&self) -> Vec<Statement> {
        self.applied.read().unwrap().clone()
    }

    /// SQL texts applied so far, for compact assertions.
    #[must_use]
    pub fn sql(&self) -> Vec<String> {
        self.applied
            .read()
            .unwrap()
            .iter()
            .map(|s| s.sql.clone())
            .collect()
    }

    /// The text arguments of the `n`-th applied statement.
    #[must_use]
    pub fn text_params(&self, n: usize) -> Vec<String> {
        self.applied.read().unwrap()[n]
            .params
            .iter()
            .filter_map(|p| match p {
                SqlParam::Text(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current cursor position of a projection, if any.
    #[must_use]
    pub fn cursor_position(
        &self,
        projection_name: &str,
        instance_id: &InstanceId,
    ) -> Option<GlobalPosition> {
        self.cursors
            .read()
            .unwrap()
            .get(&(projection_name.to_string(), instance_id.clone()))
            .copied()
    }

    /// Clear recorded statements and cursors (for test isolation).
    pub fn clear(&self) {
        self.applied.write().unwrap().clear();
        self.cursors.write().unwrap().clear();
    }
}

impl StatementExecutor for RecordingExecutor {
    fn apply(
        &self,
        cursor: Cursor,
        statements: Vec<Statement>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(ProjectionError::Storage(
                    "injected failure".to_string(),
                ));
            }

            self.applied.write().unwrap().extend(statements);
            self.cursors
                .write()
                .unwrap()
                .insert((cursor.projection_name, cursor.instance_id), cursor.position);
            Ok(())
        })
    }

    fn load_cursor(
        &self,
        projection_name: String,
        instance_id: InstanceId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<GlobalPosition>>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .cursors
                .read()
                .unwrap()
                .get(&(projection_name, instance_id))
                .copied())
        })
    }

    fn reset_cursor(
        &self,
        projection_name: String,
        instance_id: InstanceId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.cursors
                .write()
                .unwrap()
                .remove(&(projection_name, instance_id));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(position: u64) -> Cursor {
        Cursor {
            projection_name: "sessions4".to_string(),
            instance_id: InstanceId::from("inst-1"),
            position: GlobalPosition::new(position),
        }
    }

    #[tokio::test]
    async fn apply_records_statements_and_cursor() {
        let executor = RecordingExecutor::new();
        executor
            .apply(
                cursor(3),
                vec![Statement::new("DELETE FROM x", vec![SqlParam::from("s-1")])],
            )
            .await
            .unwrap();

        assert_eq!(executor.sql(), vec!["DELETE FROM x".to_string()]);
        assert_eq!(
            executor.cursor_position("sessions4", &InstanceId::from("inst-1")),
            Some(GlobalPosition::new(3))
        );
    }

    #[tokio::test]
    async fn injected_failures_do_not_advance_cursor() {
        let executor = RecordingExecutor::new();
        executor.fail_next(1);

        let err = executor.apply(cursor(1), vec![]).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Storage(_)));
        assert_eq!(
            executor.cursor_position("sessions4", &InstanceId::from("inst-1")),
            None
        );

        executor.apply(cursor(1), vec![]).await.unwrap();
        assert_eq!(
            executor.cursor_position("sessions4", &InstanceId::from("inst-1")),
            Some(GlobalPosition::new(1))
        );
    }
}
