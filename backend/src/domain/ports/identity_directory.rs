//! Port for looking up the external identities a user holds.
//!
//! The authorisation facade binds pending grants to whichever identities the
//! directory reports: code host accounts always, plus either the username or
//! the verified emails depending on the configured bind-ID policy.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::{Accounts, UserId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by identity directory adapters.
    pub enum IdentityDirectoryError {
        /// No live user exists with the requested ID.
        UserNotFound {
            /// User that was looked up.
            user_id: UserId,
        } => "user {user_id} not found",
        /// Directory connection could not be established.
        Connection {
            /// Database error text.
            message: String,
        } => "identity directory connection failed: {message}",
        /// Query failed during execution.
        Query {
            /// Database error text.
            message: String,
        } => "identity directory query failed: {message}",
    }
}

/// Identities known for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentities {
    /// Platform user.
    pub user_id: UserId,
    /// Platform username.
    pub username: String,
    /// Emails with a verification timestamp. Unverified emails are omitted.
    pub verified_emails: Vec<String>,
    /// Live code host accounts grouped by namespace.
    pub external_accounts: Vec<Accounts>,
}

/// Identity lookup used at grant time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Fetch the identities of a live user.
    async fn user_identities(
        &self,
        user_id: UserId,
    ) -> Result<UserIdentities, IdentityDirectoryError>;
}

/// In-memory directory for tests that do not need a database.
#[derive(Debug, Default, Clone)]
pub struct FixtureIdentityDirectory {
    users: BTreeMap<UserId, UserIdentities>,
}

impl FixtureIdentityDirectory {
    /// Register a user's identities.
    #[must_use]
    pub fn with_user(mut self, identities: UserIdentities) -> Self {
        self.users.insert(identities.user_id, identities);
        self
    }
}

#[async_trait]
impl IdentityDirectory for FixtureIdentityDirectory {
    async fn user_identities(
        &self,
        user_id: UserId,
    ) -> Result<UserIdentities, IdentityDirectoryError> {
        self.users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| IdentityDirectoryError::user_not_found(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserIdentities {
        UserIdentities {
            user_id: UserId::new(1),
            username: "alice".to_owned(),
            verified_emails: vec!["alice@example.com".to_owned()],
            external_accounts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn fixture_returns_registered_identities() {
        let directory = FixtureIdentityDirectory::default().with_user(alice());

        let identities = directory
            .user_identities(UserId::new(1))
            .await
            .expect("fixture lookup should succeed");

        assert_eq!(identities, alice());
    }

    #[tokio::test]
    async fn fixture_reports_unknown_users() {
        let directory = FixtureIdentityDirectory::default();

        let err = directory
            .user_identities(UserId::new(9))
            .await
            .expect_err("unknown user should fail");

        assert!(err.is_user_not_found());
        assert_eq!(err.to_string(), "user 9 not found");
    }
}
