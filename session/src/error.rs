//! Error types for session operations.
//!
//! Errors carry a transport-agnostic [`ErrorKind`] so the RPC layer can
//! map them onto its status codes without matching on concrete variants.

use portcullis_core::event::EventError;
use portcullis_core::event_store::EventStoreError;
use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Transport-agnostic error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request or configuration.
    InvalidArgument,
    /// Unknown session or user.
    NotFound,
    /// Credentials present but wrong.
    Unauthenticated,
    /// Token mismatch or foreign session.
    PermissionDenied,
    /// Session terminated, requirement unmet, or ordering violated.
    FailedPrecondition,
    /// Optimistic concurrency race; retryable after reload.
    Conflict,
    /// Rate limit hit.
    TooManyRequests,
    /// Transient storage failure.
    Unavailable,
    /// Invariant violation or unexpected state.
    Internal,
}

/// Errors produced by session commands and queries.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed request or configuration value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No session with the given id exists.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The user lookup found nothing.
    #[error("User not found")]
    UserNotFound,

    /// Password or assertion verification failed.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// WebAuthn assertion verification failed.
    #[error("WebAuthn verification failed: {reason}")]
    WebAuthnVerificationFailed {
        /// Reason for failure.
        reason: String,
    },

    /// The IdP intent is unknown, foreign, or stale.
    #[error("Intent verification failed")]
    IntentInvalid,

    /// The supplied token does not authorize this session.
    #[error("Session token mismatch")]
    TokenMismatch,

    /// The caller is neither the creator nor a token holder.
    #[error("Not permitted on this session")]
    NotPermitted,

    /// The session is terminated and frozen.
    #[error("Session is terminated")]
    SessionTerminated,

    /// User verification was required but the assertion's UV flag unset.
    #[error("User verification required but not satisfied")]
    UserVerificationRequired,

    /// A factor check ran before the user factor was established.
    #[error("Check requires a checked user: {0}")]
    UserCheckMissing(&'static str),

    /// The user factor cannot switch to a different user.
    #[error("Session already bound to another user")]
    UserMismatch,

    /// A WebAuthn check arrived without a pending challenge.
    #[error("No pending WebAuthn challenge")]
    ChallengeMissing,

    /// The pending challenge is older than the configured TTL.
    #[error("WebAuthn challenge has expired")]
    ChallengeExpired,

    /// Too many attempts; retry later.
    #[error("Too many attempts, please retry after {retry_after:?}")]
    TooManyAttempts {
        /// Duration to wait before retrying.
        retry_after: std::time::Duration,
    },

    /// Optimistic concurrency race on the event log.
    #[error("Concurrent modification of session {session_id}")]
    Conflict {
        /// The contended session.
        session_id: String,
    },

    /// Transient storage failure.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Invariant violation or unexpected reducer state.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Classify the error for the transport layer.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::SessionNotFound(_) | Self::UserNotFound => ErrorKind::NotFound,
            Self::InvalidCredentials
            | Self::WebAuthnVerificationFailed { .. }
            | Self::IntentInvalid => ErrorKind::Unauthenticated,
            Self::TokenMismatch | Self::NotPermitted => ErrorKind::PermissionDenied,
            Self::SessionTerminated
            | Self::UserVerificationRequired
            | Self::UserCheckMissing(_)
            | Self::UserMismatch
            | Self::ChallengeMissing
            | Self::ChallengeExpired => ErrorKind::FailedPrecondition,
            Self::TooManyAttempts { .. } => ErrorKind::TooManyRequests,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the command engine may retry after reloading state.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict)
    }
}

impl From<EventStoreError> for SessionError {
    fn from(error: EventStoreError) -> Self {
        match error {
            EventStoreError::Conflict { aggregate_id, .. } => Self::Conflict {
                session_id: aggregate_id.into_inner(),
            },
            EventStoreError::Unavailable(message) => Self::Unavailable(message),
            EventStoreError::Serialization(message) | EventStoreError::Internal(message) => {
                Self::Internal(message)
            }
        }
    }
}

impl From<EventError> for SessionError {
    fn from(error: EventError) -> Self {
        Self::Internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(
            SessionError::SessionNotFound("s-1".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SessionError::InvalidCredentials.kind(),
            ErrorKind::Unauthenticated
        );
        assert_eq!(
            SessionError::TokenMismatch.kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            SessionError::UserVerificationRequired.kind(),
            ErrorKind::FailedPrecondition
        );
        assert_eq!(
            SessionError::Conflict {
                session_id: "s-1".into()
            }
            .kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn conflict_is_retryable() {
        assert!(SessionError::Conflict {
            session_id: "s-1".into()
        }
        .is_retryable());
        assert!(!SessionError::TokenMismatch.is_retryable());
    }

    #[test]
    fn store_conflict_maps_to_session_conflict() {
        let error = EventStoreError::Conflict {
            aggregate_id: "s-1".into(),
            expected: portcullis_core::aggregate::Sequence::new(1),
            actual: portcullis_core::aggregate::Sequence::new(2),
        };
        let mapped = SessionError::from(error);
        assert_eq!(mapped.kind(), ErrorKind::Conflict);
    }
}
