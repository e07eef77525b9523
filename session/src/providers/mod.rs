//! Provider traits: the seams between the session engine and its
//! collaborators.
//!
//! Each trait abstracts one external capability the command engine needs:
//!
//! - [`UserDirectory`]: user lookup, stored password hashes, passkeys
//! - [`PasswordHasher`]: pluggable password verification (memory-hard
//!   default)
//! - [`WebAuthnProvider`]: FIDO2 challenge and assertion ceremonies
//! - [`RateLimiter`]: per-user attempt limiting
//!
//! Production implementations live next to the traits; deterministic
//! doubles live in [`crate::mocks`] behind the `test-utils` feature.

pub mod password;
pub mod rate_limiter;
pub mod user;
pub mod webauthn;

pub use password::{Argon2PasswordHasher, PasswordHasher};
pub use rate_limiter::{FixedWindowRateLimiter, RateLimiter};
pub use user::UserDirectory;
pub use webauthn::{AssertionOutcome, IssuedChallenge, WebAuthnProvider, WebauthnRsProvider};
