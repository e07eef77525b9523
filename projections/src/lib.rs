//! # Portcullis Projections
//!
//! The projection runner: tails the event log and keeps read tables
//! current by driving [`Projection`](portcullis_core::projection::Projection)
//! reducers through a transactional
//! [`StatementExecutor`](portcullis_core::projection::StatementExecutor).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   filter(after cursor)   ┌──────────────────┐
//! │  Event Log  │ ───────────────────────▶ │ ProjectionRunner │
//! └─────────────┘                          └───┬──────────┬───┘
//!                                              │ reduce   │ apply + cursor
//!                                              ▼          ▼  (one tx)
//!                                         ┌──────────┐ ┌──────────┐
//!                                         │Projection│ │ Executor │
//!                                         └──────────┘ └──────────┘
//! ```
//!
//! Delivery is at-least-once; the executor makes application exactly-once
//! per `(projection, event)` by advancing the cursor in the same
//! transaction as the statements.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod runner;

pub use runner::ProjectionRunner;
