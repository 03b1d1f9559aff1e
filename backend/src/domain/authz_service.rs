//! Authorisation facade consumed by the rest of the platform.
//!
//! [`AuthzService`] turns account lifecycle events into permission store
//! operations: binding pending grants when a user appears, filtering
//! candidate repositories on access checks and revoking everything a user
//! held when the account is deleted.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::ports::{
    IdentityDirectory, IdentityDirectoryError, PendingPermsRepository, PermsRepository,
    PermsStoreError,
};
use super::{Accounts, BindIdPolicy, PermType, Perms, RepoId, UserId};

/// Errors returned by [`AuthzService`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    /// The configured bind-ID policy is not recognised.
    #[error("unrecognised bind ID policy: {policy}")]
    Configuration {
        /// Configured value.
        policy: String,
    },
    /// The permission store failed.
    #[error(transparent)]
    Store(#[from] PermsStoreError),
    /// The identity directory failed.
    #[error(transparent)]
    Identity(#[from] IdentityDirectoryError),
}

impl AuthzError {
    /// Create a configuration error for `policy`.
    pub fn configuration(policy: impl Into<String>) -> Self {
        Self::Configuration {
            policy: policy.into(),
        }
    }
}

/// Anything that can be filtered by repository ID.
pub trait RepoCandidate {
    /// Repository the candidate refers to.
    fn repo_id(&self) -> RepoId;
}

impl RepoCandidate for RepoId {
    fn repo_id(&self) -> RepoId {
        *self
    }
}

/// Arguments for [`AuthzService::grant_pending_permissions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantPendingPermissionsArgs {
    /// User receiving the grants.
    pub user_id: UserId,
    /// Permission level to grant.
    pub perm: Perms,
    /// Object kind to grant.
    pub kind: PermType,
}

/// Arguments for [`AuthzService::authorized_repos`].
#[derive(Debug, Clone, Copy)]
pub struct AuthorizedReposArgs<'a, T> {
    /// User performing the access check.
    pub user_id: UserId,
    /// Permission level required.
    pub perm: Perms,
    /// Object kind of the candidates.
    pub kind: PermType,
    /// Candidates to filter.
    pub repos: &'a [T],
}

/// Arguments for [`AuthzService::revoke_user_permissions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeUserPermissionsArgs {
    /// User being removed.
    pub user_id: UserId,
    /// Every identity batch the user held.
    pub accounts: Vec<Accounts>,
}

/// Authorisation facade over the permission stores.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use perms_store::domain::ports::{
/// #     IdentityDirectory, PendingPermsRepository, PermsRepository,
/// # };
/// # use perms_store::domain::{
/// #     AuthzService, GrantPendingPermissionsArgs, PermType, Perms, UserId,
/// # };
/// # async fn example<R, P, D>(
/// #     perms: Arc<R>,
/// #     pending: Arc<P>,
/// #     directory: Arc<D>,
/// # ) -> Result<(), perms_store::domain::AuthzError>
/// # where
/// #     R: PermsRepository,
/// #     P: PendingPermsRepository,
/// #     D: IdentityDirectory,
/// # {
/// let service = AuthzService::new(perms, pending, directory, "email");
/// service
///     .grant_pending_permissions(GrantPendingPermissionsArgs {
///         user_id: UserId::new(1),
///         perm: Perms::Read,
///         kind: PermType::Repos,
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct AuthzService<R, P, D> {
    perms: Arc<R>,
    pending: Arc<P>,
    directory: Arc<D>,
    bind_id_policy: String,
}

impl<R, P, D> AuthzService<R, P, D>
where
    R: PermsRepository,
    P: PendingPermsRepository,
    D: IdentityDirectory,
{
    /// Create the facade. `bind_id_policy` is validated on each grant.
    pub fn new(
        perms: Arc<R>,
        pending: Arc<P>,
        directory: Arc<D>,
        bind_id_policy: impl Into<String>,
    ) -> Self {
        Self {
            perms,
            pending,
            directory,
            bind_id_policy: bind_id_policy.into(),
        }
    }

    /// Resolve every pending grant bound to one of the user's identities.
    ///
    /// All identities are granted in one transaction. Identities without
    /// pending grants are skipped.
    ///
    /// # Errors
    ///
    /// [`AuthzError::Configuration`] when the bind-ID policy is not
    /// recognised; no store call is made in that case.
    pub async fn grant_pending_permissions(
        &self,
        args: GrantPendingPermissionsArgs,
    ) -> Result<(), AuthzError> {
        let policy: BindIdPolicy = self
            .bind_id_policy
            .parse()
            .map_err(|_| AuthzError::configuration(self.bind_id_policy.as_str()))?;

        let identities = self.directory.user_identities(args.user_id).await?;
        let keys = policy.pending_keys(&identities, args.perm, args.kind);
        if keys.is_empty() {
            debug!(user_id = %args.user_id, "no identities to bind pending permissions to");
            return Ok(());
        }

        self.pending
            .grant_all_pending_permissions(args.user_id, &keys)
            .await?;
        info!(
            user_id = %args.user_id,
            identities = keys.len(),
            policy = %policy,
            "granted pending permissions"
        );
        Ok(())
    }

    /// Keep the candidates the user may access, in their original order.
    ///
    /// A user without a permission row may access nothing.
    pub async fn authorized_repos<'a, T>(
        &self,
        args: AuthorizedReposArgs<'a, T>,
    ) -> Result<Vec<&'a T>, AuthzError>
    where
        T: RepoCandidate + Sync,
    {
        if args.repos.is_empty() {
            return Ok(Vec::new());
        }

        let authorized: BTreeSet<RepoId> = match self
            .perms
            .load_user_permissions(args.user_id, args.perm, args.kind)
            .await
        {
            Ok(permissions) => permissions.ids,
            Err(PermsStoreError::NotFound) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        Ok(args
            .repos
            .iter()
            .filter(|repo| authorized.contains(&repo.repo_id()))
            .collect())
    }

    /// Delete the user's permissions and every pending grant bound to the
    /// identities they held, so a later owner of the same username or email
    /// does not inherit them.
    pub async fn revoke_user_permissions(
        &self,
        args: &RevokeUserPermissionsArgs,
    ) -> Result<(), AuthzError> {
        self.pending
            .revoke_user_permissions(args.user_id, &args.accounts)
            .await?;
        info!(
            user_id = %args.user_id,
            account_batches = args.accounts.len(),
            "revoked user permissions"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "authz_service_tests.rs"]
mod tests;
