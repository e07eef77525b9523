//! Session write model: the command side's view of one session.
//!
//! A pure, restartable fold over the session's events. The contract:
//! `append_and_reduce(model, new)` leaves the model in the same state as
//! reducing `existing ∪ new` from zero, and replaying a prefix is a no-op
//! (events at or below the model's sequence are skipped).

use crate::error::{Result, SessionError};
use crate::events::SessionEvent;
use crate::state::{
    IntentFactor, Metadata, PasswordFactor, PendingChallenge, SessionState, UserFactor,
    WebAuthnFactor,
};
use chrono::{DateTime, Utc};
use portcullis_core::aggregate::Sequence;
use portcullis_core::event::StoredEvent;

/// In-memory projection of one session's events, sufficient to validate
/// the next command.
#[derive(Debug, Clone, Default)]
pub struct SessionWriteModel {
    /// Session id (aggregate id).
    pub session_id: String,
    /// Tenant the session lives in.
    pub instance_id: String,
    /// Organization owning the session.
    pub resource_owner: String,
    /// User that created the session.
    pub creator: String,
    /// Creation time; set by `session.added`.
    pub creation_date: Option<DateTime<Utc>>,
    /// Commit time of the last applied event.
    pub change_date: Option<DateTime<Utc>>,
    /// Sequence of the last applied event.
    pub sequence: Sequence,
    /// Life-cycle state.
    pub state: SessionState,
    /// User factor, if checked.
    pub user_factor: Option<UserFactor>,
    /// Password factor, if checked.
    pub password_factor: Option<PasswordFactor>,
    /// Intent factor, if checked.
    pub intent_factor: Option<IntentFactor>,
    /// WebAuthn factor, if checked.
    pub webauthn_factor: Option<WebAuthnFactor>,
    /// Metadata after last-write-wins merging.
    pub metadata: Metadata,
    /// Currently bound token id, if any.
    pub token_id: Option<String>,
    /// Digest of the current token's secret.
    pub token_secret_digest: Option<String>,
    /// Pending WebAuthn challenge, if any.
    pub pending_challenge: Option<PendingChallenge>,
}

impl SessionWriteModel {
    /// Create an empty model for a session id.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Whether any event has been applied (the session exists).
    #[must_use]
    pub const fn exists(&self) -> bool {
        !self.sequence.is_initial()
    }

    /// Fold stored events into the model.
    ///
    /// Events at or below the current sequence are skipped, making prefix
    /// replay idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Internal`] for undecodable payloads.
    pub fn append_and_reduce(&mut self, events: &[StoredEvent]) -> Result<()> {
        for event in events {
            if event.sequence <= self.sequence {
                continue;
            }
            let session_event = SessionEvent::from_stored(event)
                .map_err(|e| SessionError::Internal(format!("corrupt session event: {e}")))?;
            self.apply(&session_event, event);
        }
        Ok(())
    }

    fn apply(&mut self, event: &SessionEvent, stored: &StoredEvent) {
        match event {
            SessionEvent::Added { resource_owner } => {
                self.instance_id = stored.aggregate.instance_id.as_str().to_string();
                self.resource_owner = resource_owner.clone();
                self.creator = stored.creator.clone();
                self.creation_date = Some(stored.created_at);
                self.state = SessionState::Active;
            }
            SessionEvent::UserChecked {
                user_id,
                login_name,
                display_name,
                resource_owner,
                checked_at,
            } => {
                self.user_factor = Some(UserFactor {
                    user_id: user_id.clone(),
                    login_name: login_name.clone(),
                    display_name: display_name.clone(),
                    resource_owner: resource_owner.clone(),
                    checked_at: *checked_at,
                });
            }
            SessionEvent::PasswordChecked { checked_at } => {
                self.password_factor = Some(PasswordFactor {
                    checked_at: *checked_at,
                });
            }
            SessionEvent::IntentChecked { checked_at } => {
                self.intent_factor = Some(IntentFactor {
                    checked_at: *checked_at,
                });
            }
            SessionEvent::WebAuthnChallenged { .. } => {
                self.pending_challenge = event.challenge(stored.created_at);
            }
            SessionEvent::WebAuthnChecked {
                checked_at,
                user_verified,
            } => {
                self.webauthn_factor = Some(WebAuthnFactor {
                    checked_at: *checked_at,
                    user_verified: *user_verified,
                });
                self.pending_challenge = None;
            }
            SessionEvent::TokenSet {
                token_id,
                secret_digest,
            } => {
                self.token_id = Some(token_id.clone());
                self.token_secret_digest = Some(secret_digest.clone());
            }
            SessionEvent::MetadataSet { metadata } => {
                for (key, value) in metadata {
                    if value.is_empty() {
                        self.metadata.remove(key);
                    } else {
                        self.metadata.insert(key.clone(), value.clone());
                    }
                }
            }
            SessionEvent::Terminated => {
                self.state = SessionState::Terminated;
            }
        }

        self.sequence = stored.sequence;
        self.change_date = Some(stored.created_at);
    }
}
