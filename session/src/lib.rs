//! # Portcullis Session
//!
//! The authentication session subsystem of the Portcullis IAM platform.
//!
//! A *session* accumulates multi-factor checks (user identification,
//! password, federated IdP intent, WebAuthn assertion) against a user
//! until it satisfies the policy required by downstream consumers, e.g.
//! an OIDC authorization endpoint. Sessions are event-sourced: the
//! command side validates against a write model replayed from the log,
//! the query side serves the incrementally maintained `sessions4` table.
//!
//! # Map
//!
//! - [`commands::Commands`]: create / update / terminate, token rotation,
//!   canonical check ordering
//! - [`write_model::SessionWriteModel`]: pure fold over session events
//! - [`token::SessionTokenService`]: bearer minting and verification
//! - [`providers`]: directory, password, WebAuthn, and rate-limit seams
//! - [`projection::SessionProjection`]: event → `sessions4` statements
//! - [`query::Queries`]: authorized reads over the projection
//!
//! # Example
//!
//! ```
//! use portcullis_core::{SystemClock, UuidGenerator};
//! use portcullis_session::commands::{Checks, Commands, RequestContext};
//! use portcullis_session::config::SessionConfig;
//! use portcullis_session::mocks::{MockRateLimiter, MockUserDirectory, MockWebAuthnProvider};
//! use portcullis_session::providers::Argon2PasswordHasher;
//! use portcullis_session::state::UserSelector;
//! use portcullis_session::token::EncryptionKey;
//! use portcullis_testing::InMemoryEventStore;
//! use std::sync::Arc;
//!
//! # fn main() {
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//! let commands = Commands::start(
//!     Arc::new(InMemoryEventStore::new()),
//!     Arc::new(UuidGenerator::new()),
//!     Arc::new(SystemClock::new()),
//!     MockUserDirectory::new(),
//!     MockWebAuthnProvider::new(),
//!     Argon2PasswordHasher::new(),
//!     MockRateLimiter::new(),
//!     &EncryptionKey::generate(),
//!     SessionConfig::new("login.example.com"),
//! )
//! .unwrap();
//!
//! let ctx = RequestContext {
//!     instance_id: "inst-1".into(),
//!     caller_user_id: "service-account".into(),
//!     resource_owner: "org-1".into(),
//! };
//! let created = commands
//!     .create_session(&ctx, Checks::default(), Default::default(), None)
//!     .await
//!     .unwrap();
//! assert!(!created.session_token.is_empty());
//! # });
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod intent;
pub mod projection;
pub mod providers;
pub mod query;
pub mod state;
pub mod token;
pub mod write_model;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use commands::{Checks, Commands, RequestContext, SessionCommand};
pub use error::{ErrorKind, Result, SessionError};
pub use events::SessionEvent;
pub use projection::SessionProjection;
pub use query::Queries;
pub use state::{SessionState, UserSelector, UserVerificationRequirement};
pub use write_model::SessionWriteModel;
