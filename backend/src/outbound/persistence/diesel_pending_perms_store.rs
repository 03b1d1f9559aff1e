//! Pending permissions and grant resolution for [`DieselPermsStore`].
//!
//! Lock order inside every transaction here: the pending row(s) being
//! consumed, then the user-centric row, then repository mirror rows in
//! ascending ID order.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Array, Bool, Int4, Int8, Text, Timestamptz};
use diesel::upsert::{excluded, on_constraint};
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::{AsyncConnection as _, AsyncPgConnection, RunQueryDsl};
use tracing::{debug, info, warn};

use crate::domain::ports::{PendingPermsRepository, PermsStoreError};
use crate::domain::{
    Accounts, BatchPlanner, PendingBindings, PendingUserId, PermType, Perms, RepoId,
    RepoPendingPermissions, SetDiff, UserId, UserPendingPermissions, UserPendingPermissionsKey,
    compute_diff,
};

use super::diesel_perms_store::{DieselPermsStore, write_mirror_pages};
use super::mirror_sql::{MirrorTable, pending_objects_query};
use super::models::{
    NewPendingStubRow, NewRepoPendingPermissionsRow, RepoPendingPermissionsRow,
    UserPendingPermissionsRow, pending_ids_to_ints,
};
use super::schema::{repo_pending_permissions, user_pending_permissions, user_permissions};

/// Bind parameters per stub row inserted by resolve-or-create.
const STUB_ROW_PARAMETERS: usize = 7;

const UNION_USER_PERMISSIONS_SQL: &str = r#"
INSERT INTO user_permissions (user_id, permission, object_type, object_ids_ints, updated_at)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT ON CONSTRAINT user_permissions_perm_object_unique DO UPDATE SET
    object_ids_ints = perm_ids_union(user_permissions.object_ids_ints, excluded.object_ids_ints),
    updated_at = excluded.updated_at
"#;

#[derive(QueryableByName)]
struct PendingIdRow {
    #[diesel(sql_type = Int8)]
    id: i64,
}

/// Resolve every bind ID in `accounts` to its surrogate ID, inserting stub
/// rows for the ones seen for the first time.
async fn resolve_bindings(
    conn: &mut AsyncPgConnection,
    accounts: &Accounts,
    perm: Perms,
    kind: PermType,
    stub_page: usize,
    now: DateTime<Utc>,
) -> Result<PendingBindings, PermsStoreError> {
    let bind_ids: BTreeSet<&str> = accounts.account_ids.iter().map(String::as_str).collect();
    let mut bindings = PendingBindings::default();
    if bind_ids.is_empty() {
        return Ok(bindings);
    }

    let existing: Vec<(i64, String)> = user_pending_permissions::table
        .filter(user_pending_permissions::service_type.eq(&accounts.service_type))
        .filter(user_pending_permissions::service_id.eq(&accounts.service_id))
        .filter(user_pending_permissions::permission.eq(perm.as_str()))
        .filter(user_pending_permissions::object_type.eq(kind.as_str()))
        .filter(user_pending_permissions::bind_id.eq_any(bind_ids.iter().copied()))
        .select((user_pending_permissions::id, user_pending_permissions::bind_id))
        .load(conn)
        .await?;
    for (id, bind_id) in existing {
        bindings.record_existing(bind_id, PendingUserId::new(id));
    }

    let missing: Vec<NewPendingStubRow<'_>> = bind_ids
        .iter()
        .copied()
        .filter(|bind_id| bindings.get(bind_id).is_none())
        .map(|bind_id| NewPendingStubRow {
            service_type: &accounts.service_type,
            service_id: &accounts.service_id,
            bind_id,
            permission: perm.as_str(),
            object_type: kind.as_str(),
            object_ids_ints: Vec::new(),
            updated_at: now,
        })
        .collect();

    let mut created_count = 0_usize;
    for stubs in missing.chunks(stub_page) {
        // A concurrent resolver may have inserted the same bind ID; the
        // no-op update makes RETURNING report its ID instead of failing, and
        // `xmax = 0` holds only for rows this statement inserted.
        let returned = diesel::insert_into(user_pending_permissions::table)
            .values(stubs)
            .on_conflict(on_constraint(
                "user_pending_permissions_service_perm_object_unique",
            ))
            .do_update()
            .set(
                user_pending_permissions::updated_at
                    .eq(excluded(user_pending_permissions::updated_at)),
            )
            .returning((
                user_pending_permissions::id,
                user_pending_permissions::bind_id,
                sql::<Bool>("xmax = 0"),
            ))
            .get_results::<(i64, String, bool)>(conn)
            .await?;
        for (id, bind_id, inserted) in returned {
            if inserted {
                created_count += 1;
                bindings.record_created(bind_id, PendingUserId::new(id));
            } else {
                bindings.record_existing(bind_id, PendingUserId::new(id));
            }
        }
    }

    debug!(
        service_type = %accounts.service_type,
        resolved = bindings.len(),
        created = created_count,
        "resolved pending bindings"
    );
    Ok(bindings)
}

/// Move one identity's pending repositories into `user_id`'s permissions.
/// Returns the number of repositories granted.
async fn grant_one(
    conn: &mut AsyncPgConnection,
    planner: BatchPlanner,
    user_id: UserId,
    key: &UserPendingPermissionsKey,
    now: DateTime<Utc>,
) -> Result<usize, PermsStoreError> {
    let pending: Option<(i64, Vec<i32>)> = user_pending_permissions::table
        .filter(user_pending_permissions::service_type.eq(&key.service_type))
        .filter(user_pending_permissions::service_id.eq(&key.service_id))
        .filter(user_pending_permissions::permission.eq(key.perm.as_str()))
        .filter(user_pending_permissions::object_type.eq(key.kind.as_str()))
        .filter(user_pending_permissions::bind_id.eq(&key.bind_id))
        .select((
            user_pending_permissions::id,
            user_pending_permissions::object_ids_ints,
        ))
        .for_update()
        .first(conn)
        .await
        .optional()?;

    let Some((pending_id, object_ids)) = pending else {
        debug!(%user_id, bind_id = %key.bind_id, "no pending permissions to grant");
        return Ok(0);
    };
    if object_ids.is_empty() {
        debug!(%user_id, bind_id = %key.bind_id, "pending row holds no repositories");
        return Ok(0);
    }

    user_permissions::table
        .filter(user_permissions::user_id.eq(user_id.get()))
        .filter(user_permissions::permission.eq(key.perm.as_str()))
        .filter(user_permissions::object_type.eq(key.kind.as_str()))
        .select(user_permissions::user_id)
        .for_update()
        .load::<i32>(conn)
        .await?;

    let repo_ids: BTreeSet<i32> = object_ids.into_iter().collect();
    let grant = SetDiff {
        added: repo_ids.iter().copied().collect(),
        removed: Vec::new(),
    };
    let pages = write_mirror_pages(
        conn,
        planner,
        MirrorTable::Repo,
        key.perm,
        &grant,
        user_id.get(),
        now,
    )
    .await?;

    sql_query(UNION_USER_PERMISSIONS_SQL)
        .bind::<Int4, _>(user_id.get())
        .bind::<Text, _>(key.perm.as_str())
        .bind::<Text, _>(key.kind.as_str())
        .bind::<Array<Int4>, _>(grant.added.clone())
        .bind::<Timestamptz, _>(now)
        .execute(conn)
        .await?;

    diesel::delete(user_pending_permissions::table.find(pending_id))
        .execute(conn)
        .await?;

    debug!(
        %user_id,
        bind_id = %key.bind_id,
        pending_id,
        repos = grant.added.len(),
        pages,
        "granted pending permissions"
    );
    Ok(grant.added.len())
}

async fn delete_pending_accounts(
    conn: &mut AsyncPgConnection,
    accounts: &Accounts,
) -> Result<usize, PermsStoreError> {
    if accounts.is_empty() {
        return Ok(0);
    }
    let deleted = diesel::delete(
        user_pending_permissions::table
            .filter(user_pending_permissions::service_type.eq(&accounts.service_type))
            .filter(user_pending_permissions::service_id.eq(&accounts.service_id))
            .filter(user_pending_permissions::bind_id.eq_any(&accounts.account_ids)),
    )
    .execute(conn)
    .await?;
    Ok(deleted)
}

fn sorted_keys(keys: &[UserPendingPermissionsKey]) -> Vec<&UserPendingPermissionsKey> {
    let mut sorted: Vec<&UserPendingPermissionsKey> = keys.iter().collect();
    sorted.sort_by(|left, right| {
        (&left.service_type, &left.service_id, &left.bind_id).cmp(&(
            &right.service_type,
            &right.service_id,
            &right.bind_id,
        ))
    });
    sorted.dedup();
    sorted
}

impl DieselPermsStore {
    fn stub_page(&self) -> usize {
        BatchPlanner::for_parameter_budget(
            self.options().max_bind_parameters(),
            STUB_ROW_PARAMETERS,
        )
        .capacity()
    }
}

#[async_trait]
impl PendingPermsRepository for DieselPermsStore {
    async fn load_user_pending_permissions(
        &self,
        key: &UserPendingPermissionsKey,
    ) -> Result<UserPendingPermissions, PermsStoreError> {
        let mut conn = self.connection().await?;
        let row = user_pending_permissions::table
            .filter(user_pending_permissions::service_type.eq(&key.service_type))
            .filter(user_pending_permissions::service_id.eq(&key.service_id))
            .filter(user_pending_permissions::permission.eq(key.perm.as_str()))
            .filter(user_pending_permissions::object_type.eq(key.kind.as_str()))
            .filter(user_pending_permissions::bind_id.eq(&key.bind_id))
            .select(UserPendingPermissionsRow::as_select())
            .first(&mut conn)
            .await?;
        row.try_into()
    }

    async fn load_repo_pending_permissions(
        &self,
        repo_id: RepoId,
        perm: Perms,
    ) -> Result<RepoPendingPermissions, PermsStoreError> {
        let mut conn = self.connection().await?;
        let row = repo_pending_permissions::table
            .filter(repo_pending_permissions::repo_id.eq(repo_id.get()))
            .filter(repo_pending_permissions::permission.eq(perm.as_str()))
            .select(RepoPendingPermissionsRow::as_select())
            .first(&mut conn)
            .await?;
        row.try_into()
    }

    async fn resolve_pending_bindings(
        &self,
        accounts: &Accounts,
        perm: Perms,
        kind: PermType,
    ) -> Result<PendingBindings, PermsStoreError> {
        let now = self.now();
        let stub_page = self.stub_page();
        let mut pooled = self.connection().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        conn.transaction::<_, PermsStoreError, _>(|conn| {
            async move { resolve_bindings(conn, accounts, perm, kind, stub_page, now).await }
                .scope_boxed()
        })
        .await
    }

    async fn set_repo_pending_permissions(
        &self,
        accounts: &Accounts,
        repo_id: RepoId,
        perm: Perms,
    ) -> Result<PendingBindings, PermsStoreError> {
        let now = self.now();
        let kind = PermType::Repos;
        let stub_page = self.stub_page();
        let mut pooled = self.connection().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, PermsStoreError, _>(|conn| {
            async move {
                let bindings =
                    resolve_bindings(conn, accounts, perm, kind, stub_page, now).await?;

                let current: Option<Vec<i64>> = repo_pending_permissions::table
                    .filter(repo_pending_permissions::repo_id.eq(repo_id.get()))
                    .filter(repo_pending_permissions::permission.eq(perm.as_str()))
                    .select(repo_pending_permissions::user_ids_ints)
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;
                let old: BTreeSet<PendingUserId> = current
                    .unwrap_or_default()
                    .into_iter()
                    .map(PendingUserId::new)
                    .collect();
                let new = bindings.pending_ids();
                let diff = compute_diff(&old, &new);
                if diff.is_empty() {
                    debug!(%repo_id, "pending permissions unchanged");
                    return Ok(bindings);
                }

                let touched = pending_ids_to_ints(diff.touched());
                let updated: Vec<PendingIdRow> = pending_objects_query(
                    pending_ids_to_ints(&diff.added),
                    touched.clone(),
                    repo_id.get(),
                    now,
                    perm,
                    kind,
                )
                .load(conn)
                .await?;
                if updated.len() < touched.len() {
                    let live: BTreeSet<i64> = updated.iter().map(|row| row.id).collect();
                    let skipped: Vec<i64> = touched
                        .iter()
                        .copied()
                        .filter(|id| !live.contains(id))
                        .collect();
                    warn!(
                        %repo_id,
                        ?skipped,
                        "skipped pending identities that no longer exist"
                    );
                }

                let row = NewRepoPendingPermissionsRow {
                    repo_id: repo_id.get(),
                    permission: perm.as_str(),
                    user_ids_ints: pending_ids_to_ints(&new),
                    updated_at: now,
                };
                diesel::insert_into(repo_pending_permissions::table)
                    .values(&row)
                    .on_conflict(on_constraint("repo_pending_permissions_perm_unique"))
                    .do_update()
                    .set((
                        repo_pending_permissions::user_ids_ints
                            .eq(excluded(repo_pending_permissions::user_ids_ints)),
                        repo_pending_permissions::updated_at
                            .eq(excluded(repo_pending_permissions::updated_at)),
                    ))
                    .execute(conn)
                    .await?;

                info!(
                    %repo_id,
                    service_type = %accounts.service_type,
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    "synced pending repository permissions"
                );
                Ok(bindings)
            }
            .scope_boxed()
        })
        .await
    }

    async fn list_pending_users(
        &self,
        service_type: &str,
        service_id: &str,
    ) -> Result<Vec<String>, PermsStoreError> {
        let mut conn = self.connection().await?;
        let bind_ids = user_pending_permissions::table
            .filter(user_pending_permissions::service_type.eq(service_type))
            .filter(user_pending_permissions::service_id.eq(service_id))
            .filter(user_pending_permissions::object_ids_ints.ne(Vec::<i32>::new()))
            .select(user_pending_permissions::bind_id)
            .distinct()
            .order(user_pending_permissions::bind_id)
            .load(&mut conn)
            .await?;
        Ok(bind_ids)
    }

    async fn delete_all_user_pending_permissions(
        &self,
        accounts: &Accounts,
    ) -> Result<(), PermsStoreError> {
        let mut conn = self.connection().await?;
        let deleted = delete_pending_accounts(&mut conn, accounts).await?;
        debug!(
            service_type = %accounts.service_type,
            accounts = accounts.len(),
            deleted,
            "deleted pending permissions"
        );
        Ok(())
    }

    async fn grant_pending_permissions(
        &self,
        user_id: UserId,
        key: &UserPendingPermissionsKey,
    ) -> Result<(), PermsStoreError> {
        self.grant_all_pending_permissions(user_id, std::slice::from_ref(key))
            .await
    }

    async fn grant_all_pending_permissions(
        &self,
        user_id: UserId,
        keys: &[UserPendingPermissionsKey],
    ) -> Result<(), PermsStoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let now = self.now();
        let planner = self.options().repo_planner();
        let keys = sorted_keys(keys);
        let mut pooled = self.connection().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let granted = conn
            .transaction::<_, PermsStoreError, _>(|conn| {
                async move {
                    let mut granted = 0;
                    for key in keys {
                        granted += grant_one(conn, planner, user_id, key, now).await?;
                    }
                    Ok(granted)
                }
                .scope_boxed()
            })
            .await?;

        debug!(%user_id, granted, "resolved pending permissions");
        Ok(())
    }

    async fn revoke_user_permissions(
        &self,
        user_id: UserId,
        accounts: &[Accounts],
    ) -> Result<(), PermsStoreError> {
        let mut pooled = self.connection().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let (permissions, pending) = conn
            .transaction::<_, PermsStoreError, _>(|conn| {
                async move {
                    let permissions = diesel::delete(
                        user_permissions::table
                            .filter(user_permissions::user_id.eq(user_id.get())),
                    )
                    .execute(conn)
                    .await?;
                    let mut pending = 0;
                    for batch in accounts {
                        pending += delete_pending_accounts(conn, batch).await?;
                    }
                    Ok((permissions, pending))
                }
                .scope_boxed()
            })
            .await?;

        debug!(
            %user_id,
            permissions,
            pending,
            "revoked permissions and pending grants"
        );
        Ok(())
    }
}
