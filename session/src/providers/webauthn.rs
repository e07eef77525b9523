//! WebAuthn/FIDO2 provider trait and `webauthn-rs` implementation.
//!
//! The ceremony is two-phase. `begin_authentication` allocates a random
//! 32-byte challenge and returns the `PublicKeyCredentialRequestOptions`
//! for the client plus the opaque verifier state the engine stores in the
//! challenge event. `finish_authentication` replays that state against
//! the client's assertion: origin, rpIdHash, signature, and counter are
//! all validated; counter regression is rejected as a cloned-authenticator
//! signal.
//!
//! When the session's user is already identified, the challenge carries
//! the user's credentials as the allow-list; without a user the ceremony
//! falls back to discoverable credentials and the user is bound at check
//! time.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use webauthn_rs::prelude::{
    DiscoverableAuthentication, DiscoverableKey, Passkey, PasskeyAuthentication,
    PublicKeyCredential, Url, Webauthn, WebauthnBuilder,
};

/// A challenge issued to a client.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedChallenge {
    /// `PublicKeyCredentialRequestOptions` for the client, as JSON.
    pub credential_request_options: serde_json::Value,
    /// Opaque verifier state; persisted in the challenge event and needed
    /// to finish the ceremony.
    pub verification_state: serde_json::Value,
}

/// Outcome of a verified assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionOutcome {
    /// The credential that signed, base64-url encoded.
    pub credential_id: String,
    /// Whether the authenticator verified the user (UV flag).
    pub user_verified: bool,
    /// Signature counter after this assertion.
    pub counter: u32,
}

/// WebAuthn ceremonies behind a seam, so tests stay deterministic.
pub trait WebAuthnProvider: Send + Sync {
    /// Begin an authentication ceremony for the relying-party domain.
    ///
    /// `passkeys` is the allow-list; empty means discoverable.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Internal` if challenge creation fails.
    fn begin_authentication(&self, rp_domain: &str, passkeys: &[Passkey])
    -> Result<IssuedChallenge>;

    /// Verify an assertion against stored verifier state.
    ///
    /// `rp_domain` is the domain the challenge was issued for; `passkeys`
    /// must be the session user's credentials (discoverable ceremonies
    /// match the asserting credential against them).
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WebAuthnVerificationFailed` when the
    /// assertion does not satisfy the challenge.
    fn finish_authentication(
        &self,
        rp_domain: &str,
        assertion_data: &[u8],
        verification_state: &serde_json::Value,
        passkeys: &[Passkey],
    ) -> Result<AssertionOutcome>;
}

/// Verifier state for either ceremony variant.
#[derive(Serialize, Deserialize)]
enum AuthenticationState {
    /// Allow-listed ceremony for a known user.
    Passkey(PasskeyAuthentication),
    /// Discoverable ceremony; the user is bound at check time.
    Discoverable(DiscoverableAuthentication),
}

/// Production provider over `webauthn-rs`.
#[derive(Debug, Clone, Default)]
pub struct WebauthnRsProvider;

impl WebauthnRsProvider {
    /// Create a new provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn relying_party(rp_domain: &str) -> Result<Webauthn> {
        let origin = Url::parse(&format!("https://{rp_domain}"))
            .map_err(|e| SessionError::InvalidArgument(format!("invalid rp domain: {e}")))?;
        WebauthnBuilder::new(rp_domain, &origin)
            .map_err(|e| SessionError::Internal(format!("webauthn setup: {e}")))?
            .build()
            .map_err(|e| SessionError::Internal(format!("webauthn setup: {e}")))
    }
}

impl WebAuthnProvider for WebauthnRsProvider {
    fn begin_authentication(
        &self,
        rp_domain: &str,
        passkeys: &[Passkey],
    ) -> Result<IssuedChallenge> {
        let webauthn = Self::relying_party(rp_domain)?;

        let (options, state) = if passkeys.is_empty() {
            let (rcr, state) = webauthn
                .start_discoverable_authentication()
                .map_err(|e| SessionError::Internal(format!("challenge creation: {e}")))?;
            (
                serde_json::to_value(rcr),
                serde_json::to_value(AuthenticationState::Discoverable(state)),
            )
        } else {
            let (rcr, state) = webauthn
                .start_passkey_authentication(passkeys)
                .map_err(|e| SessionError::Internal(format!("challenge creation: {e}")))?;
            (
                serde_json::to_value(rcr),
                serde_json::to_value(AuthenticationState::Passkey(state)),
            )
        };

        Ok(IssuedChallenge {
            credential_request_options: options
                .map_err(|e| SessionError::Internal(format!("challenge encoding: {e}")))?,
            verification_state: state
                .map_err(|e| SessionError::Internal(format!("state encoding: {e}")))?,
        })
    }

    fn finish_authentication(
        &self,
        rp_domain: &str,
        assertion_data: &[u8],
        verification_state: &serde_json::Value,
        passkeys: &[Passkey],
    ) -> Result<AssertionOutcome> {
        let credential: PublicKeyCredential = serde_json::from_slice(assertion_data)
            .map_err(|e| SessionError::WebAuthnVerificationFailed {
                reason: format!("assertion undecodable: {e}"),
            })?;
        let state: AuthenticationState = serde_json::from_value(verification_state.clone())
            .map_err(|e| SessionError::Internal(format!("verifier state corrupt: {e}")))?;

        let webauthn = Self::relying_party(rp_domain)?;
        let result = match state {
            AuthenticationState::Passkey(state) => webauthn
                .finish_passkey_authentication(&credential, &state)
                .map_err(|e| SessionError::WebAuthnVerificationFailed {
                    reason: e.to_string(),
                })?,
            AuthenticationState::Discoverable(state) => {
                let keys: Vec<DiscoverableKey> =
                    passkeys.iter().map(DiscoverableKey::from).collect();
                webauthn
                    .finish_discoverable_authentication(&credential, state, &keys)
                    .map_err(|e| SessionError::WebAuthnVerificationFailed {
                        reason: e.to_string(),
                    })?
            }
        };

        Ok(AssertionOutcome {
            credential_id: base64_url(result.cred_id().as_ref()),
            user_verified: result.user_verified(),
            counter: result.counter(),
        })
    }
}

fn base64_url(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;

    #[test]
    fn begin_discoverable_produces_options_and_state() {
        let provider = WebauthnRsProvider::new();
        let challenge = provider.begin_authentication("example.com", &[]).unwrap();

        // The client-facing options carry a challenge; the state decodes
        // back into the discoverable variant.
        assert!(
            challenge.credential_request_options["publicKey"]["challenge"]
                .as_str()
                .is_some()
        );
        let state: AuthenticationState =
            serde_json::from_value(challenge.verification_state).unwrap();
        assert!(matches!(state, AuthenticationState::Discoverable(_)));
    }

    #[test]
    fn invalid_rp_domain_is_rejected() {
        let provider = WebauthnRsProvider::new();
        let err = provider.begin_authentication("", &[]).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidArgument(_) | SessionError::Internal(_)
        ));
    }

    #[test]
    fn garbage_assertion_fails_verification() {
        let provider = WebauthnRsProvider::new();
        let challenge = provider.begin_authentication("example.com", &[]).unwrap();

        let err = provider
            .finish_authentication(
                "example.com",
                b"not json",
                &challenge.verification_state,
                &[],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::WebAuthnVerificationFailed { .. }
        ));
    }
}
