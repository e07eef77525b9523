//! # Portcullis Core
//!
//! Core traits and types for the event-sourced Portcullis IAM platform.
//!
//! This crate defines the write-side substrate every other member builds on:
//!
//! - [`aggregate`]: strong types for aggregate identity and ordering
//!   ([`AggregateId`], [`Sequence`], [`GlobalPosition`])
//! - [`event`]: domain event abstraction and the persisted event shape
//! - [`event_store`]: the append-only, optimistically-concurrent event log
//! - [`projection`]: the read-side reducer model (events → SQL statements)
//! - [`clock`]: injectable time source
//! - [`id`]: k-ordered identifier generation
//!
//! # Architecture
//!
//! ```text
//! Commands ──▶ EventStore::push ──▶ events table
//!                  │
//!                  ▼
//!          EventStore::filter ──▶ write models (validation)
//!                  │
//!                  ▼
//!          ProjectionRunner ──▶ Projection::reduce ──▶ read tables
//! ```
//!
//! The command side never touches read tables; the query side never touches
//! the event log except through the projection runner. The two are composed
//! by the transport layer, which is not part of this workspace.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod clock;
pub mod event;
pub mod event_store;
pub mod id;
pub mod projection;

pub use aggregate::{Aggregate, AggregateId, AggregateType, GlobalPosition, InstanceId, Sequence};
pub use chrono::{DateTime, Utc};
pub use clock::{Clock, SystemClock};
pub use event::{Event, EventError, PendingEvent, StoredEvent};
pub use event_store::{EventFilter, EventStore, EventStoreError};
pub use id::{IdGenerator, UuidGenerator};
pub use projection::{Cursor, Projection, ProjectionError, SqlParam, Statement, StatementExecutor};
