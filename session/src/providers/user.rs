//! User directory trait.
//!
//! The directory is owned by the user subsystem; the session engine only
//! reads from it. Storage is out of scope here, which is why this is a
//! trait and not a table.

use crate::error::Result;
use crate::state::{ResolvedUser, UserSelector};
use portcullis_core::aggregate::InstanceId;
use std::future::Future;
use webauthn_rs::prelude::Passkey;

/// Read access to the user directory.
pub trait UserDirectory: Send + Sync {
    /// Resolve a selector to a user.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UserNotFound` when nothing matches.
    fn resolve_user(
        &self,
        instance_id: &InstanceId,
        selector: &UserSelector,
    ) -> impl Future<Output = Result<ResolvedUser>> + Send;

    /// The user's stored password hash (PHC string), if a password is set.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UserNotFound` for an unknown user.
    fn password_hash(
        &self,
        instance_id: &InstanceId,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<String>>> + Send;

    /// The user's registered passkeys, for WebAuthn allow-lists and
    /// assertion verification.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UserNotFound` for an unknown user.
    fn passkeys(
        &self,
        instance_id: &InstanceId,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<Passkey>>> + Send;
}
