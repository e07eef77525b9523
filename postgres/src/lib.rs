//! # Portcullis Postgres
//!
//! Production `PostgreSQL` backends for the Portcullis event log and
//! projection executor:
//!
//! - [`PostgresEventStore`]: durable append-only log with per-aggregate
//!   optimistic concurrency
//! - [`PostgresStatementExecutor`]: applies projection statements and the
//!   cursor advance in one transaction
//!
//! # Example
//!
//! ```ignore
//! use portcullis_postgres::PostgresEventStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresEventStore::connect("postgres://localhost/portcullis").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event_store;
pub mod executor;

pub use event_store::PostgresEventStore;
pub use executor::PostgresStatementExecutor;
