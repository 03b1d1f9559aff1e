//! Internal Diesel row structs for the permission tables.
//!
//! Rows never leave the persistence layer. Conversions into domain records
//! parse the stored enum strings; conversions from domain records enforce the
//! timestamp invariants before any statement is issued.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::domain::ports::PermsStoreError;
use crate::domain::{
    PendingUserId, PermType, Perms, RepoId, RepoPendingPermissions, RepoPermissions, UserId,
    UserPendingPermissions, UserPendingPermissionsKey, UserPermissions,
};

use super::schema::{
    repo_pending_permissions, repo_permissions, user_pending_permissions, user_permissions,
};

fn parse_perm(raw: &str) -> Result<Perms, PermsStoreError> {
    raw.parse()
        .map_err(|err: crate::domain::UnknownValueError| PermsStoreError::query(err.to_string()))
}

fn parse_kind(raw: &str) -> Result<PermType, PermsStoreError> {
    raw.parse()
        .map_err(|err: crate::domain::UnknownValueError| PermsStoreError::query(err.to_string()))
}

/// Convert domain IDs into the `int4[]` column representation.
pub(crate) fn repo_ids_to_ints<'a>(ids: impl IntoIterator<Item = &'a RepoId>) -> Vec<i32> {
    ids.into_iter().map(|id| id.get()).collect()
}

/// Convert domain IDs into the `int4[]` column representation.
pub(crate) fn user_ids_to_ints<'a>(ids: impl IntoIterator<Item = &'a UserId>) -> Vec<i32> {
    ids.into_iter().map(|id| id.get()).collect()
}

/// Convert surrogate IDs into the `int8[]` column representation.
pub(crate) fn pending_ids_to_ints<'a>(
    ids: impl IntoIterator<Item = &'a PendingUserId>,
) -> Vec<i64> {
    ids.into_iter().map(|id| id.get()).collect()
}

// ---------------------------------------------------------------------------
// user_permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = user_permissions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserPermissionsRow {
    pub user_id: i32,
    pub permission: String,
    pub object_type: String,
    pub object_ids_ints: Vec<i32>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserPermissionsRow> for UserPermissions {
    type Error = PermsStoreError;

    fn try_from(row: UserPermissionsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: UserId::new(row.user_id),
            perm: parse_perm(&row.permission)?,
            kind: parse_kind(&row.object_type)?,
            ids: row.object_ids_ints.into_iter().map(RepoId::new).collect(),
            updated_at: Some(row.updated_at),
            synced_at: row.synced_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_permissions)]
pub(crate) struct NewUserPermissionsRow<'a> {
    pub user_id: i32,
    pub permission: &'a str,
    pub object_type: &'a str,
    pub object_ids_ints: Vec<i32>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl<'a> NewUserPermissionsRow<'a> {
    /// Row for a full user-centric write. Both timestamps must be set.
    pub fn for_full_write(permissions: &'a UserPermissions) -> Result<Self, PermsStoreError> {
        let updated_at = permissions
            .updated_at
            .ok_or(PermsStoreError::UpdatedAtNotSet)?;
        let synced_at = permissions
            .synced_at
            .ok_or(PermsStoreError::SyncedAtNotSet)?;
        Ok(Self {
            user_id: permissions.user_id.get(),
            permission: permissions.perm.as_str(),
            object_type: permissions.kind.as_str(),
            object_ids_ints: repo_ids_to_ints(&permissions.ids),
            updated_at,
            synced_at: Some(synced_at),
        })
    }
}

// ---------------------------------------------------------------------------
// repo_permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = repo_permissions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct RepoPermissionsRow {
    pub repo_id: i32,
    pub permission: String,
    pub user_ids_ints: Vec<i32>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub unrestricted: bool,
}

impl TryFrom<RepoPermissionsRow> for RepoPermissions {
    type Error = PermsStoreError;

    fn try_from(row: RepoPermissionsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            repo_id: RepoId::new(row.repo_id),
            perm: parse_perm(&row.permission)?,
            user_ids: row.user_ids_ints.into_iter().map(UserId::new).collect(),
            updated_at: Some(row.updated_at),
            synced_at: row.synced_at,
            unrestricted: row.unrestricted,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = repo_permissions)]
pub(crate) struct NewRepoPermissionsRow<'a> {
    pub repo_id: i32,
    pub permission: &'a str,
    pub user_ids_ints: Vec<i32>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub unrestricted: bool,
}

impl<'a> NewRepoPermissionsRow<'a> {
    /// Row for a full repository-centric write. Both timestamps must be set.
    pub fn for_full_write(permissions: &'a RepoPermissions) -> Result<Self, PermsStoreError> {
        let updated_at = permissions
            .updated_at
            .ok_or(PermsStoreError::UpdatedAtNotSet)?;
        let synced_at = permissions
            .synced_at
            .ok_or(PermsStoreError::SyncedAtNotSet)?;
        Ok(Self {
            repo_id: permissions.repo_id.get(),
            permission: permissions.perm.as_str(),
            user_ids_ints: user_ids_to_ints(&permissions.user_ids),
            updated_at,
            synced_at: Some(synced_at),
            unrestricted: permissions.unrestricted,
        })
    }
}

// ---------------------------------------------------------------------------
// user_pending_permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = user_pending_permissions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserPendingPermissionsRow {
    pub id: i64,
    pub service_type: String,
    pub service_id: String,
    pub bind_id: String,
    pub permission: String,
    pub object_type: String,
    pub object_ids_ints: Vec<i32>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserPendingPermissionsRow> for UserPendingPermissions {
    type Error = PermsStoreError;

    fn try_from(row: UserPendingPermissionsRow) -> Result<Self, Self::Error> {
        let key = UserPendingPermissionsKey::new(row.service_type, row.service_id, row.bind_id)
            .with_scope(parse_perm(&row.permission)?, parse_kind(&row.object_type)?);
        Ok(Self {
            id: PendingUserId::new(row.id),
            key,
            ids: row.object_ids_ints.into_iter().map(RepoId::new).collect(),
            updated_at: row.updated_at,
        })
    }
}

/// Stub row reserving a surrogate ID for a bind ID.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_pending_permissions)]
pub(crate) struct NewPendingStubRow<'a> {
    pub service_type: &'a str,
    pub service_id: &'a str,
    pub bind_id: &'a str,
    pub permission: &'a str,
    pub object_type: &'a str,
    pub object_ids_ints: Vec<i32>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// repo_pending_permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = repo_pending_permissions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct RepoPendingPermissionsRow {
    pub repo_id: i32,
    pub permission: String,
    pub user_ids_ints: Vec<i64>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RepoPendingPermissionsRow> for RepoPendingPermissions {
    type Error = PermsStoreError;

    fn try_from(row: RepoPendingPermissionsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            repo_id: RepoId::new(row.repo_id),
            perm: parse_perm(&row.permission)?,
            pending_user_ids: row
                .user_ids_ints
                .into_iter()
                .map(PendingUserId::new)
                .collect(),
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = repo_pending_permissions)]
pub(crate) struct NewRepoPendingPermissionsRow<'a> {
    pub repo_id: i32,
    pub permission: &'a str,
    pub user_ids_ints: Vec<i64>,
    pub updated_at: DateTime<Utc>,
}
