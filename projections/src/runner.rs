//! Cursor-driven projection catch-up loop.
//!
//! The runner polls the event store for events past the projection's
//! cursor, reduces each into statements, and hands statements plus the
//! cursor advance to the executor as one transaction.
//!
//! # Error handling
//!
//! A failing event is retried indefinitely with backoff and the cursor
//! does not advance past it; after `poison_threshold` consecutive failures
//! the event is escalated through `tracing::error!` so an operator can
//! intervene, and retries continue. Skipping is never automatic: a gap in
//! the read model is worse than a stalled projection.

use portcullis_core::aggregate::{GlobalPosition, InstanceId};
use portcullis_core::event::StoredEvent;
use portcullis_core::event_store::{EventFilter, EventStore};
use portcullis_core::projection::{Cursor, Projection, Result, StatementExecutor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Drives one projection for one instance.
///
/// Construction returns the runner and a shutdown sender; send `true` to
/// stop [`start`](ProjectionRunner::start) gracefully.
///
/// # Example
///
/// ```ignore
/// let (runner, shutdown) = ProjectionRunner::new(
///     SessionProjection::new(),
///     event_store,
///     executor,
///     InstanceId::from("inst-1"),
/// );
///
/// tokio::spawn(async move { runner.start().await });
/// // …
/// shutdown.send(true).ok();
/// ```
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: Arc<P>,
    event_store: Arc<dyn EventStore>,
    executor: Arc<dyn StatementExecutor>,
    instance_id: InstanceId,
    poll_interval: Duration,
    retry_backoff: Duration,
    batch_size: u64,
    poison_threshold: u32,
    shutdown: watch::Receiver<bool>,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    /// Create a new runner.
    ///
    /// Returns the runner and a shutdown sender.
    #[must_use]
    pub fn new(
        projection: P,
        event_store: Arc<dyn EventStore>,
        executor: Arc<dyn StatementExecutor>,
        instance_id: InstanceId,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = Self {
            projection: Arc::new(projection),
            event_store,
            executor,
            instance_id,
            poll_interval: Duration::from_millis(200),
            retry_backoff: Duration::from_millis(500),
            batch_size: 200,
            poison_threshold: 5,
            shutdown: shutdown_rx,
        };

        (runner, shutdown_tx)
    }

    /// Set the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the backoff applied between retries of a failing event.
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set how many events one catch-up pass loads per aggregate type.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set after how many consecutive failures an event is escalated.
    #[must_use]
    pub const fn with_poison_threshold(mut self, threshold: u32) -> Self {
        self.poison_threshold = threshold;
        self
    }

    /// Run the projection until a shutdown signal arrives.
    ///
    /// Resumes from the persisted cursor, catches up, then polls for new
    /// events at the configured interval.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Cursor`] if the initial cursor load
    /// fails. Event-level failures are retried internally and never
    /// surface from here.
    pub async fn start(&self) -> Result<()> {
        tracing::info!(
            projection = self.projection.name(),
            instance = %self.instance_id,
            "starting projection runner"
        );

        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_once().await?;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        tracing::info!(
            projection = self.projection.name(),
            "projection runner stopped"
        );
        Ok(())
    }

    /// Process every event currently pending past the cursor.
    ///
    /// Returns the number of events applied. Exposed separately from
    /// [`start`](Self::start) so tests and one-shot catch-up jobs can run
    /// a single deterministic pass.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Cursor`] if the cursor cannot be loaded.
    pub async fn run_once(&self) -> Result<u64> {
        let mut applied = 0_u64;

        loop {
            let position = self
                .executor
                .load_cursor(self.projection.name().to_string(), self.instance_id.clone())
                .await?
                .unwrap_or(GlobalPosition::BEGINNING);

            let batch = self.load_batch(position).await;
            if batch.is_empty() {
                break;
            }

            for event in batch {
                self.apply_with_retry(&event).await;
                applied += 1;
            }
        }

        Ok(applied)
    }

    /// Drop the cursor and replay the projection from the beginning.
    ///
    /// The projection's statements must be self-healing (INSERT with
    /// conflict handling or preceded by a table wipe) for a rebuild to
    /// converge; `sessions4` statements are.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Cursor`] if the cursor reset fails.
    pub async fn rebuild(&self) -> Result<u64> {
        tracing::info!(
            projection = self.projection.name(),
            "rebuilding projection from the beginning"
        );
        self.executor
            .reset_cursor(self.projection.name().to_string(), self.instance_id.clone())
            .await?;
        self.run_once().await
    }

    /// Load the next batch of events past `position`, merged across the
    /// projection's aggregate types in log order.
    async fn load_batch(&self, position: GlobalPosition) -> Vec<StoredEvent> {
        let mut events = Vec::new();
        for aggregate_type in self.projection.aggregate_types() {
            let filter = EventFilter::new(self.instance_id.clone(), aggregate_type)
                .after_position(position)
                .limit(self.batch_size);

            match self.event_store.filter(filter).await {
                Ok(batch) => events.extend(batch),
                Err(error) => {
                    tracing::warn!(
                        projection = self.projection.name(),
                        %error,
                        "event load failed, will retry on next pass"
                    );
                    return Vec::new();
                }
            }
        }
        events.sort_by_key(|e| e.position);
        events
    }

    /// Apply one event, retrying until it sticks.
    async fn apply_with_retry(&self, event: &StoredEvent) {
        let mut attempts = 0_u32;
        loop {
            match self.apply(event).await {
                Ok(()) => return,
                Err(error) => {
                    attempts += 1;
                    if attempts % self.poison_threshold == 0 {
                        tracing::error!(
                            projection = self.projection.name(),
                            event = %event,
                            attempts,
                            %error,
                            "poison event: projection stalled, operator attention required"
                        );
                    } else {
                        tracing::warn!(
                            projection = self.projection.name(),
                            event = %event,
                            attempts,
                            %error,
                            "projection apply failed, retrying"
                        );
                    }
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
    }

    async fn apply(&self, event: &StoredEvent) -> Result<()> {
        let statements = self.projection.reduce(event)?;
        let cursor = Cursor {
            projection_name: self.projection.name().to_string(),
            instance_id: self.instance_id.clone(),
            position: event.position,
        };
        self.executor.apply(cursor, statements).await
    }
}

impl<P> std::fmt::Debug for ProjectionRunner<P>
where
    P: Projection,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionRunner")
            .field("projection", &self.projection.name())
            .field("instance_id", &self.instance_id)
            .field("poll_interval", &self.poll_interval)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use portcullis_core::aggregate::{Aggregate, AggregateType};
    use portcullis_core::event::PendingEvent;
    use portcullis_core::projection::{SqlParam, Statement};
    use portcullis_testing::{InMemoryEventStore, RecordingExecutor};

    /// Counts events into one DELETE statement per event, for runner tests.
    struct CountingProjection;

    impl Projection for CountingProjection {
        fn name(&self) -> &str {
            "counting"
        }

        fn aggregate_types(&self) -> Vec<AggregateType> {
            vec![AggregateType::from("session")]
        }

        fn reduce(&self, event: &StoredEvent) -> Result<Vec<Statement>> {
            Ok(vec![Statement::new(
                "DELETE FROM t WHERE (id = $1)",
                vec![SqlParam::Text(event.aggregate.id.to_string())],
            )])
        }
    }

    async fn seed(store: &InMemoryEventStore, count: usize) {
        let aggregate = Aggregate::new("inst-1".into(), "session".into(), "s-1".into());
        let events = (0..count)
            .map(|_| PendingEvent::new("session.added".into(), "u-1".into(), serde_json::json!({})))
            .collect();
        store.push(aggregate, None, events).await.unwrap();
    }

    #[tokio::test]
    async fn run_once_applies_all_pending_events() {
        let store = Arc::new(InMemoryEventStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        seed(&store, 3).await;

        let (runner, _shutdown) = ProjectionRunner::new(
            CountingProjection,
            store.clone(),
            executor.clone(),
            InstanceId::from("inst-1"),
        );

        let applied = runner.run_once().await.unwrap();
        assert_eq!(applied, 3);
        assert_eq!(executor.statements().len(), 3);
        assert_eq!(
            executor.cursor_position("counting", &InstanceId::from("inst-1")),
            Some(GlobalPosition::new(3))
        );
    }

    #[tokio::test]
    async fn run_once_resumes_from_cursor() {
        let store = Arc::new(InMemoryEventStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        seed(&store, 2).await;

        let (runner, _shutdown) = ProjectionRunner::new(
            CountingProjection,
            store.clone(),
            executor.clone(),
            InstanceId::from("inst-1"),
        );

        runner.run_once().await.unwrap();
        executor.clear();
        seed(&store, 1).await;

        // Cursor was cleared with the recordings; reapply everything.
        let applied = runner.run_once().await.unwrap();
        assert_eq!(applied, 3);
    }

    #[tokio::test]
    async fn failing_event_is_retried_without_advancing_cursor() {
        let store = Arc::new(InMemoryEventStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        seed(&store, 1).await;
        executor.fail_next(2);

        let (runner, _shutdown) = ProjectionRunner::new(
            CountingProjection,
            store.clone(),
            executor.clone(),
            InstanceId::from("inst-1"),
        );
        let runner = runner.with_retry_backoff(Duration::from_millis(1));

        let applied = runner.run_once().await.unwrap();
        assert_eq!(applied, 1);
        // The two injected failures did not leave partial state behind.
        assert_eq!(executor.statements().len(), 1);
        assert_eq!(
            executor.cursor_position("counting", &InstanceId::from("inst-1")),
            Some(GlobalPosition::new(1))
        );
    }

    #[tokio::test]
    async fn rebuild_replays_from_beginning() {
        let store = Arc::new(InMemoryEventStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        seed(&store, 2).await;

        let (runner, _shutdown) = ProjectionRunner::new(
            CountingProjection,
            store.clone(),
            executor.clone(),
            InstanceId::from("inst-1"),
        );

        runner.run_once().await.unwrap();
        let replayed = runner.rebuild().await.unwrap();
        assert_eq!(replayed, 2);
        assert_eq!(executor.statements().len(), 4);
    }

    #[tokio::test]
    async fn start_stops_on_shutdown_signal() {
        let store = Arc::new(InMemoryEventStore::new());
        let executor = Arc::new(RecordingExecutor::new());

        let (runner, shutdown) = ProjectionRunner::new(
            CountingProjection,
            store.clone(),
            executor.clone(),
            InstanceId::from("inst-1"),
        );
        let runner = runner.with_poll_interval(Duration::from_millis(10));

        let handle = tokio::spawn(async move { runner.start().await });
        shutdown.send(true).ok();
        handle.await.unwrap().unwrap();
    }
}
