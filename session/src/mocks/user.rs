//! Mock user directory.

use crate::error::{Result, SessionError};
use crate::providers::UserDirectory;
use crate::state::{ResolvedUser, UserSelector};
use portcullis_core::aggregate::InstanceId;
use std::sync::{Arc, RwLock};
use webauthn_rs::prelude::Passkey;

/// A user known to the mock directory.
#[derive(Debug, Clone)]
pub struct MockUser {
    /// User id.
    pub user_id: String,
    /// Login name.
    pub login_name: String,
    /// Display name.
    pub display_name: String,
    /// Owning organization.
    pub resource_owner: String,
    /// Stored password hash (PHC string), if any.
    pub password_hash: Option<String>,
}

/// In-memory user directory.
///
/// # Example
///
/// ```
/// use portcullis_session::mocks::{MockUser, MockUserDirectory};
///
/// let directory = MockUserDirectory::new().with_user(MockUser {
///     user_id: "user-1".into(),
///     login_name: "alice".into(),
///     display_name: "Alice".into(),
///     resource_owner: "org-1".into(),
///     password_hash: None,
/// });
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockUserDirectory {
    users: Arc<RwLock<Vec<MockUser>>>,
}

impl MockUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user, builder-style.
    #[must_use]
    #[allow(clippy::missing_panics_doc)] // Lock poisoning only
    pub fn with_user(self, user: MockUser) -> Self {
        #[allow(clippy::unwrap_used)] // Test infrastructure
        self.users.write().unwrap().push(user);
        self
    }

    fn find(&self, selector: &UserSelector) -> Option<MockUser> {
        #[allow(clippy::unwrap_used)] // Test infrastructure
        let users = self.users.read().unwrap();
        users
            .iter()
            .find(|u| match selector {
                UserSelector::ById(id) => &u.user_id == id,
                UserSelector::ByLoginName(name) => &u.login_name == name,
            })
            .cloned()
    }
}

impl UserDirectory for MockUserDirectory {
    async fn resolve_user(
        &self,
        _instance_id: &InstanceId,
        selector: &UserSelector,
    ) -> Result<ResolvedUser> {
        self.find(selector)
            .map(|u| ResolvedUser {
                user_id: u.user_id,
                login_name: u.login_name,
                display_name: u.display_name,
                resource_owner: u.resource_owner,
            })
            .ok_or(SessionError::UserNotFound)
    }

    async fn password_hash(
        &self,
        _instance_id: &InstanceId,
        user_id: &str,
    ) -> Result<Option<String>> {
        self.find(&UserSelector::ById(user_id.to_string()))
            .map(|u| u.password_hash)
            .ok_or(SessionError::UserNotFound)
    }

    async fn passkeys(&self, _instance_id: &InstanceId, user_id: &str) -> Result<Vec<Passkey>> {
        self.find(&UserSelector::ById(user_id.to_string()))
            .map(|_| Vec::new())
            .ok_or(SessionError::UserNotFound)
    }
}
