//! Session domain events.
//!
//! Every state change of a session is persisted as one of these events;
//! the write model and the `sessions4` projection are both folds over
//! them. Event type names are the stable dotted identifiers stored in the
//! log; payloads are the serde encoding of the variant.

use crate::state::{Metadata, PendingChallenge, UserVerificationRequirement};
use chrono::{DateTime, Utc};
use portcullis_core::aggregate::AggregateType;
use portcullis_core::event::{Event, EventError, PendingEvent, StoredEvent};
use serde::{Deserialize, Serialize};

/// Aggregate type of session streams.
pub const SESSION_AGGREGATE: &str = "session";

/// Event type emitted when an organization is removed (owned by the org
/// aggregate; the session projection flags affected rows).
pub const ORG_REMOVED: &str = "org.removed";

/// Event type emitted when a whole tenant is removed.
pub const INSTANCE_REMOVED: &str = "instance.removed";

/// Aggregate type for session streams, as a typed value.
#[must_use]
pub fn session_aggregate_type() -> AggregateType {
    AggregateType::from(SESSION_AGGREGATE)
}

/// Facts recorded about a session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum SessionEvent {
    /// The session was created.
    Added {
        /// Organization owning the session.
        resource_owner: String,
    },

    /// The user factor was checked.
    UserChecked {
        /// Identified user.
        user_id: String,
        /// Login name at check time.
        login_name: String,
        /// Display name at check time.
        display_name: String,
        /// Organization owning the user.
        resource_owner: String,
        /// Verification time.
        checked_at: DateTime<Utc>,
    },

    /// The password factor was checked.
    PasswordChecked {
        /// Verification time.
        checked_at: DateTime<Utc>,
    },

    /// The federated IdP intent factor was checked.
    IntentChecked {
        /// Verification time.
        checked_at: DateTime<Utc>,
    },

    /// A WebAuthn challenge was issued.
    WebAuthnChallenged {
        /// Requested user verification.
        user_verification: UserVerificationRequirement,
        /// Relying-party domain.
        rp_domain: String,
        /// Options handed to the client.
        credential_request_options: serde_json::Value,
        /// Opaque verifier state for the matching check.
        verification_state: serde_json::Value,
    },

    /// The WebAuthn factor was checked; consumes the pending challenge.
    WebAuthnChecked {
        /// Verification time.
        checked_at: DateTime<Utc>,
        /// UV flag, subject to the challenge's requirement.
        user_verified: bool,
    },

    /// A fresh bearer token was bound to the session, invalidating the
    /// previous one.
    TokenSet {
        /// Public token identifier.
        token_id: String,
        /// SHA-256 digest of the secret; the plaintext is never persisted.
        secret_digest: String,
    },

    /// Metadata entries were upserted; empty values are deletions.
    MetadataSet {
        /// The written entries.
        metadata: Metadata,
    },

    /// The session was terminated. Absorbing.
    Terminated,
}

impl Event for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Added { .. } => "session.added",
            Self::UserChecked { .. } => "session.user.checked",
            Self::PasswordChecked { .. } => "session.password.checked",
            Self::IntentChecked { .. } => "session.intent.checked",
            Self::WebAuthnChallenged { .. } => "session.webauthn.challenged",
            Self::WebAuthnChecked { .. } => "session.webauthn.checked",
            Self::TokenSet { .. } => "session.token.set",
            Self::MetadataSet { .. } => "session.metadata.set",
            Self::Terminated => "session.terminated",
        }
    }
}

impl SessionEvent {
    /// Convert into a pending event ready for the log.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// serialized.
    pub fn to_pending(&self, creator: &str) -> Result<PendingEvent, EventError> {
        PendingEvent::from_event(self, creator)
    }

    /// Decode a stored session event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] for a corrupt payload and
    /// [`EventError::UnknownEventType`] for a non-session event.
    pub fn from_stored(event: &StoredEvent) -> Result<Self, EventError> {
        if !event.event_type.starts_with("session.") {
            return Err(EventError::UnknownEventType(event.event_type.clone()));
        }
        event.decode()
    }

    /// The pending challenge carried by a challenge event, if any.
    #[must_use]
    pub fn challenge(&self, challenged_at: DateTime<Utc>) -> Option<PendingChallenge> {
        match self {
            Self::WebAuthnChallenged {
                user_verification,
                rp_domain,
                credential_request_options,
                verification_state,
            } => Some(PendingChallenge {
                user_verification: *user_verification,
                rp_domain: rp_domain.clone(),
                credential_request_options: credential_request_options.clone(),
                verification_state: verification_state.clone(),
                challenged_at,
            }),
            _ => None,
        }
    }
}
