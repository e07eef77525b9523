//! # Portcullis Testing
//!
//! Testing utilities for the Portcullis IAM platform:
//!
//! - [`mocks::InMemoryEventStore`]: full optimistic-concurrency event log
//!   backed by a `HashMap`, for fast deterministic tests
//! - [`mocks::FixedClock`]: deterministic time
//! - [`mocks::SequentialIdGenerator`]: predictable ids
//! - [`RecordingExecutor`]: captures projection statements and cursors
//!
//! ## Example
//!
//! ```
//! use portcullis_testing::mocks::{test_clock, InMemoryEventStore};
//! use portcullis_core::clock::Clock;
//!
//! let store = InMemoryEventStore::new();
//! assert!(store.is_empty());
//!
//! let clock = test_clock();
//! assert_eq!(clock.now(), clock.now());
//! ```

pub mod mocks;
pub mod projection_mocks;

pub use mocks::{FixedClock, InMemoryEventStore, SequentialIdGenerator, test_clock};
pub use projection_mocks::RecordingExecutor;
