//! Port for the mirrored permission projections.
//!
//! A [`PermsRepository`] owns the user-centric and repository-centric
//! permission rows. Every full-replace write locks the centric row, diffs it
//! against the requested set and applies the diff to the mirror inside the
//! same transaction, so `r ∈ user(u).ids ⟺ u ∈ repo(r).user_ids` holds for
//! every live user once the write commits.

use async_trait::async_trait;

use crate::domain::{Perms, PermType, RepoId, RepoPermissions, UserId, UserPermissions};

use super::define_port_error;

define_port_error! {
    /// Errors raised by permission store adapters.
    pub enum PermsStoreError {
        /// The requested row does not exist.
        NotFound => "permissions not found",
        /// A write was attempted without an `updated_at` timestamp.
        UpdatedAtNotSet => "permissions updated_at timestamp must be set",
        /// A write was attempted without a `synced_at` timestamp.
        SyncedAtNotSet => "permissions synced_at timestamp must be set",
        /// Store connection could not be established.
        Connection {
            /// Database error text.
            message: String,
        } => "permissions store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query {
            /// Database error text.
            message: String,
        } => "permissions store query failed: {message}",
        /// The transaction was aborted by the database and may be retried.
        Transient {
            /// Database error text.
            message: String,
        } => "permissions store transaction aborted: {message}",
    }
}

/// Permission record store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermsRepository: Send + Sync {
    /// Load the repositories a user may access.
    ///
    /// Returns [`PermsStoreError::NotFound`] when the user has no row, which
    /// is distinct from a row with an empty set.
    async fn load_user_permissions(
        &self,
        user_id: UserId,
        perm: Perms,
        kind: PermType,
    ) -> Result<UserPermissions, PermsStoreError>;

    /// Load the users that may access a repository, including the
    /// unrestricted flag.
    async fn load_repo_permissions(
        &self,
        repo_id: RepoId,
        perm: Perms,
    ) -> Result<RepoPermissions, PermsStoreError>;

    /// Replace a user's repository set and update the repository mirror.
    ///
    /// `updated_at` and `synced_at` are stamped with the current time even
    /// when the set is unchanged. Returns the stored record.
    async fn set_user_permissions(
        &self,
        permissions: &UserPermissions,
    ) -> Result<UserPermissions, PermsStoreError>;

    /// Replace a repository's user set and update the user mirror.
    ///
    /// The unrestricted flag is persisted as given. Returns the stored record.
    async fn set_repo_permissions(
        &self,
        permissions: &RepoPermissions,
    ) -> Result<RepoPermissions, PermsStoreError>;

    /// Flip the unrestricted flag on existing repository rows.
    ///
    /// Empty `repo_ids` is a no-op.
    async fn set_repo_permissions_unrestricted(
        &self,
        repo_ids: &[RepoId],
        unrestricted: bool,
    ) -> Result<(), PermsStoreError>;

    /// Stamp `updated_at` and `synced_at` on a repository row without
    /// changing its user set, creating an empty row if needed.
    async fn touch_repo_permissions(&self, repo_id: RepoId) -> Result<(), PermsStoreError>;

    /// Delete every user-centric row of a user.
    ///
    /// Repository rows keep the user's ID until their next full write.
    async fn delete_all_user_permissions(&self, user_id: UserId) -> Result<(), PermsStoreError>;
}
