//! Read-only queries used by permission sync schedulers and dashboards.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Accounts, PermsMetrics, RepoId, UserId};

use super::PermsStoreError;

/// An ID paired with the time its permissions were last fully synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStamp<T> {
    /// User or repository ID.
    pub id: T,
    /// `None` when never synced.
    pub synced_at: Option<DateTime<Utc>>,
}

/// Scheduling and staleness queries over the permission projections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermsSchedulingQuery: Send + Sync {
    /// Live users without a user-centric permission row.
    ///
    /// Site administrators are skipped unless the store enforces permissions
    /// for them.
    async fn user_ids_with_no_perms(&self) -> Result<Vec<UserId>, PermsStoreError>;

    /// Count of [`Self::user_ids_with_no_perms`].
    async fn count_users_with_no_perms(&self) -> Result<i64, PermsStoreError>;

    /// Live private repositories with neither a permission nor a pending row.
    async fn repo_ids_with_no_perms(&self) -> Result<Vec<RepoId>, PermsStoreError>;

    /// Count of [`Self::repo_ids_with_no_perms`].
    async fn count_repos_with_no_perms(&self) -> Result<i64, PermsStoreError>;

    /// Users whose code host connection synced after their permissions did.
    async fn user_ids_with_outdated_perms(
        &self,
    ) -> Result<Vec<SyncStamp<UserId>>, PermsStoreError>;

    /// Up to `limit` live users with the oldest `synced_at`, never-synced
    /// first. A non-zero `age` excludes users synced within `age` of now.
    async fn user_ids_with_oldest_perms(
        &self,
        limit: usize,
        age: Duration,
    ) -> Result<Vec<SyncStamp<UserId>>, PermsStoreError>;

    /// Repository counterpart of [`Self::user_ids_with_oldest_perms`].
    async fn repo_ids_with_oldest_perms(
        &self,
        limit: usize,
        age: Duration,
    ) -> Result<Vec<SyncStamp<RepoId>>, PermsStoreError>;

    /// Map live external account IDs in `accounts` to their owning users.
    async fn get_user_ids_by_external_accounts(
        &self,
        accounts: &Accounts,
    ) -> Result<BTreeMap<String, UserId>, PermsStoreError>;

    /// Whether the user belongs to an organisation that owns a code host
    /// connection.
    async fn user_is_member_of_org_has_code_host_connection(
        &self,
        user_id: UserId,
    ) -> Result<bool, PermsStoreError>;

    /// Staleness counts and timestamp gaps. Rows last written more than
    /// `stale_after` ago count as stale.
    async fn metrics(&self, stale_after: Duration) -> Result<PermsMetrics, PermsStoreError>;
}
