//! Session domain state types.
//!
//! The session aggregate accumulates authentication *factors* against a
//! user until downstream consumers (an OIDC authorization endpoint, for
//! example) consider it strong enough. All types are `Clone` and serde-
//! serializable so they can travel in event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Life-cycle state of a session aggregate.
///
/// `Terminated` is absorbing: no command mutates a terminated session and
/// its factors are frozen as of termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionState {
    /// The session accepts further checks and mutations.
    #[default]
    Active,
    /// The session has been terminated.
    Terminated,
}

impl SessionState {
    /// Stable string form stored in the read model.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Terminated => "terminated",
        }
    }
}

/// The user identification factor.
///
/// Set exactly once per session; later checks against the same user only
/// refresh `checked_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFactor {
    /// Identified user.
    pub user_id: String,
    /// Login name at check time.
    pub login_name: String,
    /// Display name at check time.
    pub display_name: String,
    /// Organization owning the user.
    pub resource_owner: String,
    /// When the user was identified.
    pub checked_at: DateTime<Utc>,
}

/// The password factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordFactor {
    /// When the password was verified.
    pub checked_at: DateTime<Utc>,
}

/// The federated identity-provider intent factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentFactor {
    /// When the intent was verified.
    pub checked_at: DateTime<Utc>,
}

/// The WebAuthn factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebAuthnFactor {
    /// When the assertion was verified.
    pub checked_at: DateTime<Utc>,
    /// Whether the authenticator verified the user (UV flag), subject to
    /// the challenge's requirement.
    pub user_verified: bool,
}

/// Client preference for authenticator user verification.
///
/// `Required` plus an assertion without the UV flag fails the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UserVerificationRequirement {
    /// No preference transmitted.
    #[default]
    Unspecified,
    /// Verification must happen; UV=false is rejected.
    Required,
    /// Verification preferred but not enforced.
    Preferred,
    /// Verification discouraged; a set UV flag is not recorded.
    Discouraged,
}

/// A pending WebAuthn challenge, single-use.
///
/// Replaced by the next challenge, consumed by the next matching check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChallenge {
    /// Requested user verification.
    pub user_verification: UserVerificationRequirement,
    /// Relying-party domain the challenge was issued for.
    pub rp_domain: String,
    /// The `PublicKeyCredentialRequestOptions` handed to the client.
    pub credential_request_options: serde_json::Value,
    /// Opaque verifier state needed to finish the ceremony.
    pub verification_state: serde_json::Value,
    /// When the challenge was issued.
    pub challenged_at: DateTime<Utc>,
}

/// How a check identifies the user.
///
/// Resolved by the user directory into a [`ResolvedUser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserSelector {
    /// Look up by the user's id.
    ById(String),
    /// Look up by one of the user's login names.
    ByLoginName(String),
}

/// A user as resolved by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedUser {
    /// The user's id.
    pub user_id: String,
    /// Primary login name.
    pub login_name: String,
    /// Human display name.
    pub display_name: String,
    /// Organization owning the user.
    pub resource_owner: String,
}

/// Session metadata: UTF-8 keys to opaque byte values.
///
/// Last write wins; a key set to an empty value is a deletion.
pub type Metadata = HashMap<String, Vec<u8>>;

/// Mutation result details returned by every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDetails {
    /// Aggregate sequence after the mutation.
    pub sequence: u64,
    /// Commit time of the last event.
    pub change_date: DateTime<Utc>,
    /// Organization owning the session.
    pub resource_owner: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_strings() {
        assert_eq!(SessionState::Active.as_str(), "active");
        assert_eq!(SessionState::Terminated.as_str(), "terminated");
    }

    #[test]
    fn default_state_is_active() {
        assert_eq!(SessionState::default(), SessionState::Active);
    }

    #[test]
    fn user_verification_default_is_unspecified() {
        assert_eq!(
            UserVerificationRequirement::default(),
            UserVerificationRequirement::Unspecified
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn selector_serialization_roundtrip() {
        let selector = UserSelector::ByLoginName("alice@example.com".to_string());
        let json = serde_json::to_value(&selector).unwrap();
        let back: UserSelector = serde_json::from_value(json).unwrap();
        assert_eq!(selector, back);
    }
}
