//! Scheduling and staleness queries for [`DieselPermsStore`].
//!
//! These read across the platform tables (`users`, `repo`,
//! `external_services`, `org_members`, `sub_repo_permissions`) as well as the
//! permission projections, so they are written as raw SQL.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use diesel::sql_query;
use diesel::sql_types::{Array, BigInt, Bool, Double, Int4, Nullable, Text, Timestamptz};
use diesel::QueryableByName;
use diesel_async::RunQueryDsl;
use tracing::debug;

use crate::domain::ports::{PermsSchedulingQuery, PermsStoreError, SyncStamp};
use crate::domain::{Accounts, PermsMetrics, RepoId, UserId};

use super::diesel_perms_store::DieselPermsStore;

const USERS_WITH_NO_PERMS_SQL: &str = r#"
SELECT users.id
FROM users
WHERE users.deleted_at IS NULL
AND ($1 OR users.site_admin = FALSE)
AND NOT EXISTS (
    SELECT FROM user_permissions WHERE user_permissions.user_id = users.id
)
ORDER BY users.id
"#;

const COUNT_USERS_WITH_NO_PERMS_SQL: &str = r#"
SELECT COUNT(*) AS count
FROM users
WHERE users.deleted_at IS NULL
AND ($1 OR users.site_admin = FALSE)
AND NOT EXISTS (
    SELECT FROM user_permissions WHERE user_permissions.user_id = users.id
)
"#;

const REPOS_WITH_NO_PERMS_SQL: &str = r#"
SELECT repo.id
FROM repo
WHERE repo.deleted_at IS NULL
AND repo.private = TRUE
AND repo.id NOT IN (
    SELECT perms.repo_id FROM repo_permissions AS perms
    UNION
    SELECT pending.repo_id FROM repo_pending_permissions AS pending
)
ORDER BY repo.id
"#;

const COUNT_REPOS_WITH_NO_PERMS_SQL: &str = r#"
SELECT COUNT(*) AS count
FROM repo
WHERE repo.deleted_at IS NULL
AND repo.private = TRUE
AND repo.id NOT IN (
    SELECT perms.repo_id FROM repo_permissions AS perms
    UNION
    SELECT pending.repo_id FROM repo_pending_permissions AS pending
)
"#;

const USERS_WITH_OUTDATED_PERMS_SQL: &str = r#"
SELECT outdated.id, outdated.synced_at
FROM (
    SELECT user_permissions.user_id AS id, user_permissions.synced_at
    FROM external_services
    JOIN user_permissions ON user_permissions.user_id = external_services.namespace_user_id
    WHERE external_services.deleted_at IS NULL
    AND (
        user_permissions.synced_at IS NULL
        OR external_services.last_sync_at >= user_permissions.synced_at
    )

    UNION

    SELECT user_permissions.user_id AS id, user_permissions.synced_at
    FROM external_services
    JOIN org_members ON org_members.org_id = external_services.namespace_org_id
    JOIN user_permissions ON user_permissions.user_id = org_members.user_id
    WHERE external_services.deleted_at IS NULL
    AND (
        user_permissions.synced_at IS NULL
        OR external_services.last_sync_at >= user_permissions.synced_at
    )
) AS outdated
ORDER BY outdated.id
"#;

const USERS_WITH_OLDEST_PERMS_SQL: &str = r#"
SELECT perms.user_id AS id, perms.synced_at
FROM user_permissions AS perms
WHERE perms.user_id IN (SELECT users.id FROM users WHERE users.deleted_at IS NULL)
AND ($1::timestamptz IS NULL OR perms.synced_at IS NULL OR perms.synced_at < $1)
ORDER BY perms.synced_at ASC NULLS FIRST, perms.user_id
LIMIT $2
"#;

const REPOS_WITH_OLDEST_PERMS_SQL: &str = r#"
SELECT perms.repo_id AS id, perms.synced_at
FROM repo_permissions AS perms
WHERE perms.repo_id IN (SELECT repo.id FROM repo WHERE repo.deleted_at IS NULL)
AND ($1::timestamptz IS NULL OR perms.synced_at IS NULL OR perms.synced_at < $1)
ORDER BY perms.synced_at ASC NULLS FIRST, perms.repo_id
LIMIT $2
"#;

const USER_IDS_BY_EXTERNAL_ACCOUNTS_SQL: &str = r#"
SELECT user_id, account_id
FROM user_external_accounts
WHERE service_type = $1
AND service_id = $2
AND account_id = ANY ($3)
AND deleted_at IS NULL
"#;

const ORG_HAS_CODE_HOST_CONNECTION_SQL: &str = r#"
SELECT EXISTS (
    SELECT
    FROM org_members
    JOIN external_services ON external_services.namespace_org_id = org_members.org_id
    WHERE org_members.user_id = $1
) AS has_connection
"#;

const USER_STALENESS_SQL: &str = r#"
SELECT
    COUNT(*) FILTER (WHERE perms.updated_at <= $1) AS stale,
    EXTRACT(EPOCH FROM (MAX(perms.updated_at) - MIN(perms.updated_at)))::float8 AS gap_seconds
FROM user_permissions AS perms
WHERE perms.user_id IN (SELECT users.id FROM users WHERE users.deleted_at IS NULL)
"#;

const REPO_STALENESS_SQL: &str = r#"
SELECT
    COUNT(*) FILTER (WHERE perms.updated_at <= $1) AS stale,
    EXTRACT(EPOCH FROM (MAX(perms.updated_at) - MIN(perms.updated_at)))::float8 AS gap_seconds
FROM repo_permissions AS perms
WHERE perms.repo_id IN (
    SELECT repo.id FROM repo WHERE repo.deleted_at IS NULL AND repo.private = TRUE
)
"#;

const SUB_REPO_STALENESS_SQL: &str = r#"
SELECT
    COUNT(*) FILTER (WHERE perms.updated_at <= $1) AS stale,
    EXTRACT(EPOCH FROM (MAX(perms.updated_at) - MIN(perms.updated_at)))::float8 AS gap_seconds
FROM sub_repo_permissions AS perms
WHERE perms.repo_id IN (
    SELECT repo.id FROM repo WHERE repo.deleted_at IS NULL AND repo.private = TRUE
)
"#;

#[derive(Debug, QueryableByName)]
struct IdRow {
    #[diesel(sql_type = Int4)]
    id: i32,
}

#[derive(Debug, QueryableByName)]
struct IdStampRow {
    #[diesel(sql_type = Int4)]
    id: i32,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(Debug, QueryableByName)]
struct ExistsRow {
    #[diesel(sql_type = Bool)]
    has_connection: bool,
}

#[derive(Debug, QueryableByName)]
struct AccountOwnerRow {
    #[diesel(sql_type = Int4)]
    user_id: i32,
    #[diesel(sql_type = Text)]
    account_id: String,
}

#[derive(Debug, QueryableByName)]
struct StalenessRow {
    #[diesel(sql_type = BigInt)]
    stale: i64,
    #[diesel(sql_type = Nullable<Double>)]
    gap_seconds: Option<f64>,
}

impl StalenessRow {
    fn into_pair(self) -> (i64, f64) {
        (self.stale, self.gap_seconds.unwrap_or_default())
    }
}

/// `now - duration`, rejecting durations chrono cannot represent.
fn time_before(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>, PermsStoreError> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .ok_or_else(|| PermsStoreError::query(format!("duration out of range: {duration:?}")))
}

impl DieselPermsStore {
    /// Cutoff for the oldest-permissions queries; `None` disables it.
    fn oldest_cutoff(&self, age: Duration) -> Result<Option<DateTime<Utc>>, PermsStoreError> {
        if age.is_zero() {
            return Ok(None);
        }
        time_before(self.now(), age).map(Some)
    }

    async fn load_stamps(
        &self,
        query: &'static str,
        limit: usize,
        age: Duration,
    ) -> Result<Vec<IdStampRow>, PermsStoreError> {
        let cutoff = self.oldest_cutoff(age)?;
        let limit = i64::try_from(limit)
            .map_err(|_| PermsStoreError::query(format!("limit out of range: {limit}")))?;
        let mut conn = self.connection().await?;
        let rows = sql_query(query)
            .bind::<Nullable<Timestamptz>, _>(cutoff)
            .bind::<BigInt, _>(limit)
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn staleness(
        &self,
        query: &'static str,
        stale_before: DateTime<Utc>,
    ) -> Result<(i64, f64), PermsStoreError> {
        let mut conn = self.connection().await?;
        let row: StalenessRow = sql_query(query)
            .bind::<Timestamptz, _>(stale_before)
            .get_result(&mut conn)
            .await?;
        Ok(row.into_pair())
    }
}

#[async_trait]
impl PermsSchedulingQuery for DieselPermsStore {
    async fn user_ids_with_no_perms(&self) -> Result<Vec<UserId>, PermsStoreError> {
        let mut conn = self.connection().await?;
        let rows: Vec<IdRow> = sql_query(USERS_WITH_NO_PERMS_SQL)
            .bind::<Bool, _>(self.options().enforce_for_site_admins())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(|row| UserId::new(row.id)).collect())
    }

    async fn count_users_with_no_perms(&self) -> Result<i64, PermsStoreError> {
        let mut conn = self.connection().await?;
        let row: CountRow = sql_query(COUNT_USERS_WITH_NO_PERMS_SQL)
            .bind::<Bool, _>(self.options().enforce_for_site_admins())
            .get_result(&mut conn)
            .await?;
        Ok(row.count)
    }

    async fn repo_ids_with_no_perms(&self) -> Result<Vec<RepoId>, PermsStoreError> {
        let mut conn = self.connection().await?;
        let rows: Vec<IdRow> = sql_query(REPOS_WITH_NO_PERMS_SQL)
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(|row| RepoId::new(row.id)).collect())
    }

    async fn count_repos_with_no_perms(&self) -> Result<i64, PermsStoreError> {
        let mut conn = self.connection().await?;
        let row: CountRow = sql_query(COUNT_REPOS_WITH_NO_PERMS_SQL)
            .get_result(&mut conn)
            .await?;
        Ok(row.count)
    }

    async fn user_ids_with_outdated_perms(
        &self,
    ) -> Result<Vec<SyncStamp<UserId>>, PermsStoreError> {
        let mut conn = self.connection().await?;
        let rows: Vec<IdStampRow> = sql_query(USERS_WITH_OUTDATED_PERMS_SQL)
            .load(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| SyncStamp {
                id: UserId::new(row.id),
                synced_at: row.synced_at,
            })
            .collect())
    }

    async fn user_ids_with_oldest_perms(
        &self,
        limit: usize,
        age: Duration,
    ) -> Result<Vec<SyncStamp<UserId>>, PermsStoreError> {
        let rows = self
            .load_stamps(USERS_WITH_OLDEST_PERMS_SQL, limit, age)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| SyncStamp {
                id: UserId::new(row.id),
                synced_at: row.synced_at,
            })
            .collect())
    }

    async fn repo_ids_with_oldest_perms(
        &self,
        limit: usize,
        age: Duration,
    ) -> Result<Vec<SyncStamp<RepoId>>, PermsStoreError> {
        let rows = self
            .load_stamps(REPOS_WITH_OLDEST_PERMS_SQL, limit, age)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| SyncStamp {
                id: RepoId::new(row.id),
                synced_at: row.synced_at,
            })
            .collect())
    }

    async fn get_user_ids_by_external_accounts(
        &self,
        accounts: &Accounts,
    ) -> Result<BTreeMap<String, UserId>, PermsStoreError> {
        if accounts.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut conn = self.connection().await?;
        let rows: Vec<AccountOwnerRow> = sql_query(USER_IDS_BY_EXTERNAL_ACCOUNTS_SQL)
            .bind::<Text, _>(&accounts.service_type)
            .bind::<Text, _>(&accounts.service_id)
            .bind::<Array<Text>, _>(&accounts.account_ids)
            .load(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.account_id, UserId::new(row.user_id)))
            .collect())
    }

    async fn user_is_member_of_org_has_code_host_connection(
        &self,
        user_id: UserId,
    ) -> Result<bool, PermsStoreError> {
        let mut conn = self.connection().await?;
        let row: ExistsRow = sql_query(ORG_HAS_CODE_HOST_CONNECTION_SQL)
            .bind::<Int4, _>(user_id.get())
            .get_result(&mut conn)
            .await?;
        Ok(row.has_connection)
    }

    async fn metrics(&self, stale_after: Duration) -> Result<PermsMetrics, PermsStoreError> {
        let stale_before = time_before(self.now(), stale_after)?;

        let (users_with_stale_perms, users_perms_gap_seconds) =
            self.staleness(USER_STALENESS_SQL, stale_before).await?;
        let (repos_with_stale_perms, repos_perms_gap_seconds) =
            self.staleness(REPO_STALENESS_SQL, stale_before).await?;
        let (sub_repos_with_stale_perms, sub_repos_perms_gap_seconds) =
            self.staleness(SUB_REPO_STALENESS_SQL, stale_before).await?;

        debug!(%stale_before, "computed permission staleness metrics");
        Ok(PermsMetrics {
            users_with_stale_perms,
            users_perms_gap_seconds,
            repos_with_stale_perms,
            repos_perms_gap_seconds,
            sub_repos_with_stale_perms,
            sub_repos_perms_gap_seconds,
        })
    }
}
