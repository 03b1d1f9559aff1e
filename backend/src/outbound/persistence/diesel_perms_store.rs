//! PostgreSQL-backed permission record store.
//!
//! [`DieselPermsStore`] implements [`PermsRepository`] here and the pending
//! and scheduling ports in sibling modules. Every full-replace write runs in
//! one transaction: lock the centric row, diff it against the requested set,
//! page the diff onto the mirror table, then upsert the centric row.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::{excluded, on_constraint};
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::{AsyncConnection as _, AsyncPgConnection, RunQueryDsl};
use mockable::Clock;
use tracing::{debug, info};

use crate::domain::ports::{PermsRepository, PermsStoreError};
use crate::domain::{
    BatchPlanner, DEFAULT_MAX_BIND_PARAMETERS, PermType, Perms, REPO_ROW_PARAMETERS, RepoId,
    RepoPermissions, SetDiff, USER_ROW_PARAMETERS, UserId, UserPermissions, compute_diff,
};

use super::error_mapping::map_pool_error;
use super::mirror_sql::{MirrorTable, mirror_page_query};
use super::models::{
    NewRepoPermissionsRow, NewUserPermissionsRow, RepoPermissionsRow, UserPermissionsRow,
};
use super::pool::DbPool;
use super::schema::{repo_permissions, user_permissions};

/// Write-path tuning for [`DieselPermsStore`].
///
/// ```
/// use std::num::NonZeroUsize;
/// use perms_store::domain::BatchPlanner;
/// use perms_store::outbound::persistence::PermsStoreOptions;
///
/// let options = PermsStoreOptions::default()
///     .with_repo_planner(BatchPlanner::new(NonZeroUsize::MIN));
/// assert_eq!(options.repo_planner().capacity(), 1);
/// assert_eq!(options.user_planner().capacity(), 11_999);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermsStoreOptions {
    max_bind_parameters: usize,
    repo_planner: BatchPlanner,
    user_planner: BatchPlanner,
    enforce_for_site_admins: bool,
}

impl Default for PermsStoreOptions {
    fn default() -> Self {
        Self {
            max_bind_parameters: DEFAULT_MAX_BIND_PARAMETERS,
            repo_planner: BatchPlanner::for_mirror_budget(
                DEFAULT_MAX_BIND_PARAMETERS,
                REPO_ROW_PARAMETERS,
            ),
            user_planner: BatchPlanner::for_mirror_budget(
                DEFAULT_MAX_BIND_PARAMETERS,
                USER_ROW_PARAMETERS,
            ),
            enforce_for_site_admins: false,
        }
    }
}

impl PermsStoreOptions {
    /// Size every planner from a per-statement parameter ceiling.
    #[must_use]
    pub fn with_max_bind_parameters(mut self, max_bind_parameters: usize) -> Self {
        self.max_bind_parameters = max_bind_parameters;
        self.repo_planner =
            BatchPlanner::for_mirror_budget(max_bind_parameters, REPO_ROW_PARAMETERS);
        self.user_planner =
            BatchPlanner::for_mirror_budget(max_bind_parameters, USER_ROW_PARAMETERS);
        self
    }

    /// Planner for writes to `repo_permissions` pages.
    #[must_use]
    pub const fn with_repo_planner(mut self, planner: BatchPlanner) -> Self {
        self.repo_planner = planner;
        self
    }

    /// Planner for writes to `user_permissions` pages.
    #[must_use]
    pub const fn with_user_planner(mut self, planner: BatchPlanner) -> Self {
        self.user_planner = planner;
        self
    }

    /// Include site administrators in [`user_ids_with_no_perms`].
    ///
    /// [`user_ids_with_no_perms`]: crate::domain::ports::PermsSchedulingQuery::user_ids_with_no_perms
    #[must_use]
    pub const fn with_enforce_for_site_admins(mut self, enforce: bool) -> Self {
        self.enforce_for_site_admins = enforce;
        self
    }

    /// Parameter ceiling for statements not covered by a planner.
    pub const fn max_bind_parameters(&self) -> usize {
        self.max_bind_parameters
    }

    /// Pages repository-centric mirror writes.
    pub const fn repo_planner(&self) -> BatchPlanner {
        self.repo_planner
    }

    /// Pages user-centric mirror writes.
    pub const fn user_planner(&self) -> BatchPlanner {
        self.user_planner
    }

    /// Whether site administrators are scheduled for permission syncs.
    pub const fn enforce_for_site_admins(&self) -> bool {
        self.enforce_for_site_admins
    }
}

/// Diesel-backed implementation of the permission store ports.
#[derive(Clone)]
pub struct DieselPermsStore {
    pool: DbPool,
    clock: Arc<dyn Clock>,
    options: PermsStoreOptions,
}

impl DieselPermsStore {
    /// Create a store over `pool`, stamping writes with `clock`.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use mockable::DefaultClock;
    /// use perms_store::outbound::persistence::{
    ///     DbPool, DieselPermsStore, PermsStoreOptions, PoolConfig,
    /// };
    ///
    /// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// let pool = DbPool::new(PoolConfig::new("postgres://localhost/perms")).await?;
    /// let store = DieselPermsStore::new(pool, Arc::new(DefaultClock), PermsStoreOptions::default());
    /// # let _ = store;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>, options: PermsStoreOptions) -> Self {
        Self {
            pool,
            clock,
            options,
        }
    }

    /// Write-path options in effect.
    pub const fn options(&self) -> &PermsStoreOptions {
        &self.options
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    pub(crate) async fn connection(
        &self,
    ) -> Result<
        diesel_async::pooled_connection::bb8::PooledConnection<'_, AsyncPgConnection>,
        PermsStoreError,
    > {
        self.pool.get().await.map_err(map_pool_error)
    }
}

/// Apply `diff` to `table` one page at a time. Returns the pages written.
pub(crate) async fn write_mirror_pages(
    conn: &mut AsyncPgConnection,
    planner: BatchPlanner,
    table: MirrorTable,
    perm: Perms,
    diff: &SetDiff<i32>,
    member: i32,
    updated_at: DateTime<Utc>,
) -> Result<usize, PermsStoreError> {
    let mut pages = 0;
    for page in planner.pages(&diff.added, &diff.removed) {
        let rows = page.len();
        mirror_page_query(table, perm, page, member, updated_at)
            .execute(conn)
            .await?;
        pages += 1;
        debug!(?table, member, rows, page = pages, "wrote mirror page");
    }
    Ok(pages)
}

fn int_diff<T: Ord + Copy>(
    old: &BTreeSet<T>,
    new: &BTreeSet<T>,
    to_int: impl Fn(T) -> i32,
) -> SetDiff<i32> {
    let diff = compute_diff(old, new);
    SetDiff {
        added: diff.added.into_iter().map(&to_int).collect(),
        removed: diff.removed.into_iter().map(&to_int).collect(),
    }
}

#[async_trait]
impl PermsRepository for DieselPermsStore {
    async fn load_user_permissions(
        &self,
        user_id: UserId,
        perm: Perms,
        kind: PermType,
    ) -> Result<UserPermissions, PermsStoreError> {
        let mut conn = self.connection().await?;
        let row = user_permissions::table
            .filter(user_permissions::user_id.eq(user_id.get()))
            .filter(user_permissions::permission.eq(perm.as_str()))
            .filter(user_permissions::object_type.eq(kind.as_str()))
            .select(UserPermissionsRow::as_select())
            .first(&mut conn)
            .await?;
        row.try_into()
    }

    async fn load_repo_permissions(
        &self,
        repo_id: RepoId,
        perm: Perms,
    ) -> Result<RepoPermissions, PermsStoreError> {
        let mut conn = self.connection().await?;
        let row = repo_permissions::table
            .filter(repo_permissions::repo_id.eq(repo_id.get()))
            .filter(repo_permissions::permission.eq(perm.as_str()))
            .select(RepoPermissionsRow::as_select())
            .first(&mut conn)
            .await?;
        row.try_into()
    }

    async fn set_user_permissions(
        &self,
        permissions: &UserPermissions,
    ) -> Result<UserPermissions, PermsStoreError> {
        let now = self.now();
        let mut stored = permissions.clone();
        stored.updated_at = Some(now);
        stored.synced_at = Some(now);
        let row = NewUserPermissionsRow::for_full_write(&stored)?;
        let planner = self.options.repo_planner;
        let perm = stored.perm;
        let new_ids = &stored.ids;

        let mut pooled = self.connection().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let (diff, pages) = conn
            .transaction::<_, PermsStoreError, _>(|conn| {
                async move {
                    let current: Option<Vec<i32>> = user_permissions::table
                        .filter(user_permissions::user_id.eq(row.user_id))
                        .filter(user_permissions::permission.eq(row.permission))
                        .filter(user_permissions::object_type.eq(row.object_type))
                        .select(user_permissions::object_ids_ints)
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?;
                    let old: BTreeSet<RepoId> =
                        current.unwrap_or_default().into_iter().map(RepoId::new).collect();
                    let diff = int_diff(&old, new_ids, RepoId::get);

                    let pages = write_mirror_pages(
                        conn,
                        planner,
                        MirrorTable::Repo,
                        perm,
                        &diff,
                        row.user_id,
                        now,
                    )
                    .await?;

                    diesel::insert_into(user_permissions::table)
                        .values(&row)
                        .on_conflict(on_constraint("user_permissions_perm_object_unique"))
                        .do_update()
                        .set((
                            user_permissions::object_ids_ints
                                .eq(excluded(user_permissions::object_ids_ints)),
                            user_permissions::updated_at.eq(excluded(user_permissions::updated_at)),
                            user_permissions::synced_at.eq(excluded(user_permissions::synced_at)),
                        ))
                        .execute(conn)
                        .await?;

                    Ok((diff, pages))
                }
                .scope_boxed()
            })
            .await?;

        info!(
            user_id = %stored.user_id,
            added = diff.added.len(),
            removed = diff.removed.len(),
            pages,
            "synced user permissions"
        );
        Ok(stored)
    }

    async fn set_repo_permissions(
        &self,
        permissions: &RepoPermissions,
    ) -> Result<RepoPermissions, PermsStoreError> {
        let now = self.now();
        let mut stored = permissions.clone();
        stored.updated_at = Some(now);
        stored.synced_at = Some(now);
        let row = NewRepoPermissionsRow::for_full_write(&stored)?;
        let planner = self.options.user_planner;
        let perm = stored.perm;
        let new_ids = &stored.user_ids;

        let mut pooled = self.connection().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let (diff, pages) = conn
            .transaction::<_, PermsStoreError, _>(|conn| {
                async move {
                    let current: Option<Vec<i32>> = repo_permissions::table
                        .filter(repo_permissions::repo_id.eq(row.repo_id))
                        .filter(repo_permissions::permission.eq(row.permission))
                        .select(repo_permissions::user_ids_ints)
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?;
                    let old: BTreeSet<UserId> =
                        current.unwrap_or_default().into_iter().map(UserId::new).collect();
                    let diff = int_diff(&old, new_ids, UserId::get);

                    let pages = write_mirror_pages(
                        conn,
                        planner,
                        MirrorTable::User {
                            kind: PermType::Repos,
                        },
                        perm,
                        &diff,
                        row.repo_id,
                        now,
                    )
                    .await?;

                    diesel::insert_into(repo_permissions::table)
                        .values(&row)
                        .on_conflict(on_constraint("repo_permissions_perm_unique"))
                        .do_update()
                        .set((
                            repo_permissions::user_ids_ints
                                .eq(excluded(repo_permissions::user_ids_ints)),
                            repo_permissions::updated_at.eq(excluded(repo_permissions::updated_at)),
                            repo_permissions::synced_at.eq(excluded(repo_permissions::synced_at)),
                            repo_permissions::unrestricted
                                .eq(excluded(repo_permissions::unrestricted)),
                        ))
                        .execute(conn)
                        .await?;

                    Ok((diff, pages))
                }
                .scope_boxed()
            })
            .await?;

        info!(
            repo_id = %stored.repo_id,
            added = diff.added.len(),
            removed = diff.removed.len(),
            pages,
            unrestricted = stored.unrestricted,
            "synced repository permissions"
        );
        Ok(stored)
    }

    async fn set_repo_permissions_unrestricted(
        &self,
        repo_ids: &[RepoId],
        unrestricted: bool,
    ) -> Result<(), PermsStoreError> {
        if repo_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<i32> = repo_ids.iter().map(|id| id.get()).collect();
        let chunk_size = self.options.repo_planner.capacity();

        let mut pooled = self.connection().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let updated = conn
            .transaction::<_, PermsStoreError, _>(|conn| {
                async move {
                    let mut updated = 0;
                    for chunk in ids.chunks(chunk_size) {
                        updated += diesel::update(
                            repo_permissions::table
                                .filter(repo_permissions::repo_id.eq_any(chunk)),
                        )
                        .set(repo_permissions::unrestricted.eq(unrestricted))
                        .execute(conn)
                        .await?;
                    }
                    Ok(updated)
                }
                .scope_boxed()
            })
            .await?;

        debug!(
            requested = repo_ids.len(),
            updated, unrestricted, "set repository unrestricted flag"
        );
        Ok(())
    }

    async fn touch_repo_permissions(&self, repo_id: RepoId) -> Result<(), PermsStoreError> {
        let now = self.now();
        let mut touched = RepoPermissions::new(repo_id, []);
        touched.updated_at = Some(now);
        touched.synced_at = Some(now);
        let row = NewRepoPermissionsRow::for_full_write(&touched)?;

        let mut conn = self.connection().await?;
        diesel::insert_into(repo_permissions::table)
            .values(&row)
            .on_conflict(on_constraint("repo_permissions_perm_unique"))
            .do_update()
            .set((
                repo_permissions::updated_at.eq(excluded(repo_permissions::updated_at)),
                repo_permissions::synced_at.eq(excluded(repo_permissions::synced_at)),
            ))
            .execute(&mut conn)
            .await?;

        debug!(%repo_id, "touched repository permissions");
        Ok(())
    }

    async fn delete_all_user_permissions(&self, user_id: UserId) -> Result<(), PermsStoreError> {
        let mut conn = self.connection().await?;
        let deleted = diesel::delete(
            user_permissions::table.filter(user_permissions::user_id.eq(user_id.get())),
        )
        .execute(&mut conn)
        .await?;

        debug!(%user_id, deleted, "deleted user permissions");
        Ok(())
    }
}
