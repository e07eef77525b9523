//! Pluggable password hashing.
//!
//! The algorithm choice is deliberately open; the default is Argon2id.
//! Verification is CPU-bound and synchronous.

use crate::error::{Result, SessionError};
use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{PasswordHasher as _, PasswordVerifier as _};

/// Hashes and verifies passwords.
pub trait PasswordHasher: Send + Sync {
    /// Hash a password into a PHC string.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Internal` if hashing fails.
    fn hash(&self, password: &str) -> Result<String>;

    /// Verify a candidate password against a stored PHC string.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidCredentials` on mismatch and
    /// `SessionError::Internal` for an unparsable stored hash.
    fn verify(&self, password: &str, hash: &str) -> Result<()>;
}

/// Argon2id-backed hasher with the crate's default parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2PasswordHasher;

impl Argon2PasswordHasher {
    /// Create a new Argon2id hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| SessionError::Internal(format!("password hashing failed: {e}")))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<()> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| SessionError::Internal(format!("stored hash unparsable: {e}")))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| SessionError::InvalidCredentials)
    }
}
