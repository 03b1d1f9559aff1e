//! Permission records for the mirrored user/repository projections.
//!
//! Every `(user, repository)` grant is stored twice: once in the user-centric
//! projection ([`UserPermissions`]) and once in the repository-centric
//! projection ([`RepoPermissions`]). Pending grants follow the same shape,
//! keyed by external identity instead of user ID.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PendingUserId, RepoId, UserId};

/// Error returned when a stored enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised {kind} value: {value}")]
pub struct UnknownValueError {
    kind: &'static str,
    value: String,
}

impl UnknownValueError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// Permission level granted on an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Perms {
    /// Read access.
    #[default]
    Read,
}

impl Perms {
    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
        }
    }
}

impl fmt::Display for Perms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Perms {
    type Err = UnknownValueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "read" => Ok(Self::Read),
            other => Err(UnknownValueError::new("permission", other)),
        }
    }
}

/// Kind of object a user-centric permission row refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermType {
    /// Repository objects.
    #[default]
    Repos,
}

impl PermType {
    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Repos => "repos",
        }
    }
}

impl fmt::Display for PermType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermType {
    type Err = UnknownValueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "repos" => Ok(Self::Repos),
            other => Err(UnknownValueError::new("object type", other)),
        }
    }
}

/// The set of repositories a user may access for one `(perm, kind)` pair.
///
/// `updated_at` is stamped on every write. `synced_at` is stamped only by
/// full user-centric replacements and stays `None` for rows that were only
/// ever touched through the repository mirror or a pending grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermissions {
    /// Owning user.
    pub user_id: UserId,
    /// Permission level.
    pub perm: Perms,
    /// Object kind of `ids`.
    pub kind: PermType,
    /// Authorised repository IDs.
    pub ids: BTreeSet<RepoId>,
    /// Last write time.
    pub updated_at: Option<DateTime<Utc>>,
    /// Last full resync time.
    pub synced_at: Option<DateTime<Utc>>,
}

impl UserPermissions {
    /// Read permissions over repositories with no timestamps set.
    pub fn new(user_id: UserId, ids: impl IntoIterator<Item = RepoId>) -> Self {
        Self {
            user_id,
            perm: Perms::Read,
            kind: PermType::Repos,
            ids: ids.into_iter().collect(),
            updated_at: None,
            synced_at: None,
        }
    }
}

/// The set of users that may access a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPermissions {
    /// Repository the row describes.
    pub repo_id: RepoId,
    /// Permission level.
    pub perm: Perms,
    /// Users explicitly granted access.
    pub user_ids: BTreeSet<UserId>,
    /// Last write time.
    pub updated_at: Option<DateTime<Utc>>,
    /// Last full resync time.
    pub synced_at: Option<DateTime<Utc>>,
    /// Every user may access the repository regardless of `user_ids`.
    ///
    /// Only persisted and reported here; enforcement belongs to the caller.
    pub unrestricted: bool,
}

impl RepoPermissions {
    /// Restricted read permissions with no timestamps set.
    pub fn new(repo_id: RepoId, user_ids: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            repo_id,
            perm: Perms::Read,
            user_ids: user_ids.into_iter().collect(),
            updated_at: None,
            synced_at: None,
            unrestricted: false,
        }
    }

    /// Set the unrestricted flag.
    #[must_use]
    pub const fn with_unrestricted(mut self, unrestricted: bool) -> Self {
        self.unrestricted = unrestricted;
        self
    }
}

/// Identifies one pending-permissions row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserPendingPermissionsKey {
    /// Identity namespace type, e.g. a code host kind.
    pub service_type: String,
    /// Identity namespace instance.
    pub service_id: String,
    /// External identity (username, email or account ID).
    pub bind_id: String,
    /// Permission level.
    pub perm: Perms,
    /// Object kind.
    pub kind: PermType,
}

impl UserPendingPermissionsKey {
    /// Key for read permissions over repositories.
    pub fn new(
        service_type: impl Into<String>,
        service_id: impl Into<String>,
        bind_id: impl Into<String>,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            service_id: service_id.into(),
            bind_id: bind_id.into(),
            perm: Perms::Read,
            kind: PermType::Repos,
        }
    }

    /// Override the permission level and object kind.
    #[must_use]
    pub fn with_scope(mut self, perm: Perms, kind: PermType) -> Self {
        self.perm = perm;
        self.kind = kind;
        self
    }
}

/// Grants bound to an external identity that no user has claimed yet.
///
/// A row with empty `ids` is a stub that only reserves the surrogate `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPendingPermissions {
    /// Surrogate key.
    pub id: PendingUserId,
    /// Identity and scope of the row.
    pub key: UserPendingPermissionsKey,
    /// Repositories pending for this identity.
    pub ids: BTreeSet<RepoId>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Mirror of pending grants keyed by repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPendingPermissions {
    /// Repository the row describes.
    pub repo_id: RepoId,
    /// Permission level.
    pub perm: Perms,
    /// Surrogate keys of identities with pending access.
    pub pending_user_ids: BTreeSet<PendingUserId>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// A batch of external identities sharing one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accounts {
    /// Identity namespace type.
    pub service_type: String,
    /// Identity namespace instance.
    pub service_id: String,
    /// Bind IDs in the namespace.
    pub account_ids: Vec<String>,
}

impl Accounts {
    /// Build an account batch.
    pub fn new<I, S>(
        service_type: impl Into<String>,
        service_id: impl Into<String>,
        account_ids: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            service_type: service_type.into(),
            service_id: service_id.into(),
            account_ids: account_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of account IDs in the batch.
    pub fn len(&self) -> usize {
        self.account_ids.len()
    }

    /// Whether the batch carries no account IDs.
    pub fn is_empty(&self) -> bool {
        self.account_ids.is_empty()
    }
}

/// Bind ID to surrogate ID mapping produced by resolve-or-create.
///
/// Bind IDs seen for the first time are reported through [`Self::created`]
/// so callers can tell a partial resolution from a full one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBindings {
    ids: BTreeMap<String, PendingUserId>,
    created: BTreeSet<String>,
}

impl PendingBindings {
    /// Record a bind ID that already had a surrogate ID.
    pub fn record_existing(&mut self, bind_id: impl Into<String>, id: PendingUserId) {
        self.ids.insert(bind_id.into(), id);
    }

    /// Record a bind ID whose stub row was created by this resolution.
    pub fn record_created(&mut self, bind_id: impl Into<String>, id: PendingUserId) {
        let bind_id = bind_id.into();
        self.created.insert(bind_id.clone());
        self.ids.insert(bind_id, id);
    }

    /// Surrogate ID for `bind_id`, if resolved.
    pub fn get(&self, bind_id: &str) -> Option<PendingUserId> {
        self.ids.get(bind_id).copied()
    }

    /// Whether `bind_id` was created by this resolution.
    pub fn was_created(&self, bind_id: &str) -> bool {
        self.created.contains(bind_id)
    }

    /// Bind IDs created by this resolution, in sorted order.
    pub fn created(&self) -> impl Iterator<Item = &str> {
        self.created.iter().map(String::as_str)
    }

    /// Every resolved surrogate ID.
    pub fn pending_ids(&self) -> BTreeSet<PendingUserId> {
        self.ids.values().copied().collect()
    }

    /// Iterate `(bind_id, surrogate_id)` pairs in bind ID order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, PendingUserId)> {
        self.ids.iter().map(|(bind_id, id)| (bind_id.as_str(), *id))
    }

    /// Number of resolved bind IDs.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing was resolved.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Staleness figures for schedulers and dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PermsMetrics {
    /// Live users whose permissions were last written before the cutoff.
    pub users_with_stale_perms: i64,
    /// Seconds between the oldest and newest user permission writes.
    pub users_perms_gap_seconds: f64,
    /// Live private repositories whose permissions are stale.
    pub repos_with_stale_perms: i64,
    /// Seconds between the oldest and newest repository permission writes.
    pub repos_perms_gap_seconds: f64,
    /// Live private repositories with stale sub-repository permissions.
    pub sub_repos_with_stale_perms: i64,
    /// Seconds between the oldest and newest sub-repository permission writes.
    pub sub_repos_perms_gap_seconds: f64,
}
