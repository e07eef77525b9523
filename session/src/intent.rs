//! Federated identity-provider intent tokens.
//!
//! When a user completes an IdP flow, the intent subsystem hands the
//! client `(intent_id, intent_token)`. The session check validates that
//! the token was issued for that intent, belongs to the session's user,
//! and is recent. The token is the AES-256-GCM sealing of those claims
//! under the same server key the session tokens use.

use crate::error::{Result, SessionError};
use crate::token::EncryptionKey;
use aes_gcm::Nonce;
use aes_gcm::aead::Aead;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

const NONCE_LEN: usize = 12;

#[derive(Serialize, Deserialize)]
struct IntentClaims {
    intent_id: String,
    user_id: String,
    issued_at: DateTime<Utc>,
}

/// Issues and verifies intent tokens.
#[derive(Clone)]
pub struct IntentTokenService {
    key: EncryptionKey,
}

impl IntentTokenService {
    /// Create an intent token service over the given key.
    #[must_use]
    pub const fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// Issue a token binding an intent to a user at a point in time.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Internal`] if sealing fails.
    pub fn issue(
        &self,
        intent_id: &str,
        user_id: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<String> {
        let claims = IntentClaims {
            intent_id: intent_id.to_string(),
            user_id: user_id.to_string(),
            issued_at,
        };
        let plaintext = serde_json::to_vec(&claims)
            .map_err(|e| SessionError::Internal(format!("intent claims serialization: {e}")))?;

        let mut nonce_bytes = [0_u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .key
            .cipher()
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|_| SessionError::Internal("intent sealing failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Verify that a token matches the intent, belongs to the user, and
    /// was issued within `max_age` of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IntentInvalid`] on any mismatch or when the
    /// token is stale.
    pub fn verify(
        &self,
        token: &str,
        intent_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<()> {
        let sealed = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| SessionError::IntentInvalid)?;
        if sealed.len() <= NONCE_LEN {
            return Err(SessionError::IntentInvalid);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .key
            .cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SessionError::IntentInvalid)?;
        let claims: IntentClaims =
            serde_json::from_slice(&plaintext).map_err(|_| SessionError::IntentInvalid)?;

        if claims.intent_id != intent_id || claims.user_id != user_id {
            return Err(SessionError::IntentInvalid);
        }
        if claims.issued_at > now || now - claims.issued_at > max_age {
            return Err(SessionError::IntentInvalid);
        }

        Ok(())
    }
}

impl std::fmt::Debug for IntentTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentTokenService").finish_non_exhaustive()
    }
}
