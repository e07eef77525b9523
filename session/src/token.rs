//! Session bearer token minting and verification.
//!
//! A bearer token is the AES-256-GCM sealing of `(session_id, token_id,
//! secret)` under a server-held key, base64-url encoded for transport.
//! Only the SHA-256 digest of the secret is ever persisted (inside the
//! `session.token.set` event); the plaintext secret leaves the server
//! exactly once, inside the freshly minted bearer.
//!
//! Verification recovers `(session_id, token_id)` by decrypting, compares
//! both in constant time against the session's current binding, and
//! optionally re-checks the secret digest as defense in depth on the
//! command path.

use crate::error::{Result, SessionError};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use constant_time_eq::constant_time_eq;
use portcullis_core::id::IdGenerator;
use rand::RngCore;
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;
const SECRET_LEN: usize = 32;

/// Symmetric key for sealing session and intent tokens.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Create a key from exactly 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] for any other length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SessionError::InvalidArgument("encryption key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// Generate a random key (for tests and local development).
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0_u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub(crate) fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey").finish_non_exhaustive()
    }
}

/// A freshly minted token: the parts the engine persists plus the bearer
/// returned to the caller exactly once.
#[derive(Clone, Debug)]
pub struct MintedToken {
    /// Public token identifier bound to the session.
    pub token_id: String,
    /// SHA-256 digest of the secret, base64-url encoded.
    pub secret_digest: String,
    /// The opaque bearer string for the caller.
    pub bearer: String,
}

/// Mints and verifies session bearer tokens.
#[derive(Clone)]
pub struct SessionTokenService {
    key: EncryptionKey,
}

impl SessionTokenService {
    /// Create a token service over the given key.
    #[must_use]
    pub const fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// Mint a fresh token for a session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Internal`] if sealing fails.
    pub fn mint(&self, session_id: &str, ids: &dyn IdGenerator) -> Result<MintedToken> {
        let token_id = ids.next_id();

        let mut secret_bytes = [0_u8; SECRET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut secret_bytes);
        let secret = URL_SAFE_NO_PAD.encode(secret_bytes);
        let secret_digest = digest(&secret);

        let plaintext = format!("{session_id}:{token_id}:{secret}");

        let mut nonce_bytes = [0_u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .key
            .cipher()
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| SessionError::Internal("token sealing failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(MintedToken {
            token_id,
            secret_digest,
            bearer: URL_SAFE_NO_PAD.encode(sealed),
        })
    }

    /// Verify a bearer token against a session's current token binding.
    ///
    /// Compares the recovered session id, then the token id in constant
    /// time, then (when supplied) the secret digest.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TokenMismatch`] on any decode, decryption,
    /// or comparison failure; the cause is deliberately not distinguished.
    pub fn verify(
        &self,
        bearer: &str,
        session_id: &str,
        current_token_id: &str,
        secret_digest: Option<&str>,
    ) -> Result<()> {
        let sealed = URL_SAFE_NO_PAD
            .decode(bearer)
            .map_err(|_| SessionError::TokenMismatch)?;
        if sealed.len() <= NONCE_LEN {
            return Err(SessionError::TokenMismatch);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .key
            .cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SessionError::TokenMismatch)?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| SessionError::TokenMismatch)?;

        let mut parts = plaintext.splitn(3, ':');
        let (Some(sid), Some(tid), Some(secret)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SessionError::TokenMismatch);
        };

        if !constant_time_eq(sid.as_bytes(), session_id.as_bytes()) {
            return Err(SessionError::TokenMismatch);
        }
        if !constant_time_eq(tid.as_bytes(), current_token_id.as_bytes()) {
            return Err(SessionError::TokenMismatch);
        }
        if let Some(expected) = secret_digest {
            if !constant_time_eq(digest(secret).as_bytes(), expected.as_bytes()) {
                return Err(SessionError::TokenMismatch);
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for SessionTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokenService").finish_non_exhaustive()
    }
}

fn digest(secret: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(secret.as_bytes()))
}
