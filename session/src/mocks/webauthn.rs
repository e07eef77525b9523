//! Mock WebAuthn provider.
//!
//! Simulates the two-phase ceremony without crypto. Tests feed the check
//! a serialized [`MockAssertion`] describing the outcome they want.

use crate::error::{Result, SessionError};
use crate::providers::webauthn::{AssertionOutcome, IssuedChallenge, WebAuthnProvider};
use serde::{Deserialize, Serialize};
use webauthn_rs::prelude::Passkey;

/// The assertion payload the mock accepts as `credential_assertion_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockAssertion {
    /// Credential id to report.
    pub credential_id: String,
    /// UV flag to report.
    pub user_verified: bool,
    /// Counter to report.
    pub counter: u32,
    /// When false, verification fails.
    pub valid: bool,
}

impl MockAssertion {
    /// A valid assertion with the given UV flag.
    #[must_use]
    pub fn verified(user_verified: bool) -> Self {
        Self {
            credential_id: "mock-credential".to_string(),
            user_verified,
            counter: 1,
            valid: true,
        }
    }

    /// Serialize into the bytes the check expects.
    ///
    /// # Panics
    ///
    /// Never panics; the struct always serializes.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Infallible for this struct
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }
}

/// Mock WebAuthn provider with deterministic challenges.
#[derive(Debug, Clone, Default)]
pub struct MockWebAuthnProvider;

impl MockWebAuthnProvider {
    /// Create a new mock provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl WebAuthnProvider for MockWebAuthnProvider {
    fn begin_authentication(
        &self,
        rp_domain: &str,
        passkeys: &[Passkey],
    ) -> Result<IssuedChallenge> {
        Ok(IssuedChallenge {
            credential_request_options: serde_json::json!({
                "publicKey": {
                    "challenge": "bW9jay1jaGFsbGVuZ2U",
                    "rpId": rp_domain,
                    "allowCredentials": [],
                    "timeout": 60_000,
                }
            }),
            verification_state: serde_json::json!({
                "mock": true,
                "rpId": rp_domain,
                "knownCredentials": passkeys.len(),
            }),
        })
    }

    fn finish_authentication(
        &self,
        _rp_domain: &str,
        assertion_data: &[u8],
        verification_state: &serde_json::Value,
        _passkeys: &[Passkey],
    ) -> Result<AssertionOutcome> {
        if verification_state.get("mock").is_none() {
            return Err(SessionError::Internal("verifier state corrupt".into()));
        }

        let assertion: MockAssertion = serde_json::from_slice(assertion_data).map_err(|e| {
            SessionError::WebAuthnVerificationFailed {
                reason: format!("assertion undecodable: {e}"),
            }
        })?;

        if !assertion.valid {
            return Err(SessionError::WebAuthnVerificationFailed {
                reason: "signature mismatch".to_string(),
            });
        }

        Ok(AssertionOutcome {
            credential_id: assertion.credential_id,
            user_verified: assertion.user_verified,
            counter: assertion.counter,
        })
    }
}
