//! Port for pending permissions and their resolution into real grants.
//!
//! Pending grants are recorded against external identities (bind IDs) before
//! any platform user owns them. Each bind ID is assigned a surrogate ID the
//! first time it is seen; the repository-centric pending mirror stores those
//! surrogate IDs rather than the bind strings.

use async_trait::async_trait;

use crate::domain::{
    Accounts, PendingBindings, Perms, PermType, RepoId, RepoPendingPermissions, UserId,
    UserPendingPermissions, UserPendingPermissionsKey,
};

use super::PermsStoreError;

/// Pending permission store and grant resolver.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PendingPermsRepository: Send + Sync {
    /// Load the pending row for one identity.
    ///
    /// Returns [`PermsStoreError::NotFound`] when absent.
    async fn load_user_pending_permissions(
        &self,
        key: &UserPendingPermissionsKey,
    ) -> Result<UserPendingPermissions, PermsStoreError>;

    /// Load the pending mirror row of a repository.
    ///
    /// Returns [`PermsStoreError::NotFound`] when absent.
    async fn load_repo_pending_permissions(
        &self,
        repo_id: RepoId,
        perm: Perms,
    ) -> Result<RepoPendingPermissions, PermsStoreError>;

    /// Resolve every bind ID in `accounts` to its surrogate ID, creating stub
    /// rows for bind IDs seen for the first time.
    async fn resolve_pending_bindings(
        &self,
        accounts: &Accounts,
        perm: Perms,
        kind: PermType,
    ) -> Result<PendingBindings, PermsStoreError>;

    /// Replace the set of identities with pending access to a repository.
    ///
    /// Returns the bindings resolved for `accounts`. Surrogate IDs consumed by
    /// a concurrent grant are skipped rather than reported as errors.
    async fn set_repo_pending_permissions(
        &self,
        accounts: &Accounts,
        repo_id: RepoId,
        perm: Perms,
    ) -> Result<PendingBindings, PermsStoreError>;

    /// Bind IDs in a namespace that still have pending repositories.
    async fn list_pending_users(
        &self,
        service_type: &str,
        service_id: &str,
    ) -> Result<Vec<String>, PermsStoreError>;

    /// Delete the pending rows of every bind ID in `accounts`.
    async fn delete_all_user_pending_permissions(
        &self,
        accounts: &Accounts,
    ) -> Result<(), PermsStoreError>;

    /// Grant one identity's pending repositories to `user_id` and delete the
    /// pending row. A missing or empty pending row is a no-op.
    async fn grant_pending_permissions(
        &self,
        user_id: UserId,
        key: &UserPendingPermissionsKey,
    ) -> Result<(), PermsStoreError>;

    /// Grant several identities to `user_id` in one transaction.
    async fn grant_all_pending_permissions(
        &self,
        user_id: UserId,
        keys: &[UserPendingPermissionsKey],
    ) -> Result<(), PermsStoreError>;

    /// Delete a user's permissions and the pending rows of every identity
    /// the user held, in one transaction.
    async fn revoke_user_permissions(
        &self,
        user_id: UserId,
        accounts: &[Accounts],
    ) -> Result<(), PermsStoreError>;
}
