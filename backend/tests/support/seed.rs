//! Platform fixture seeding for integration tests.
//!
//! The store only reads these tables, so suites populate them directly over a
//! synchronous `postgres` client. Timestamps are passed as RFC 3339 text and
//! cast server-side.

use chrono::{DateTime, Utc};
use perms_store::domain::{RepoId, UserId};
use postgres::Client;

use super::format_postgres_error;

fn insert_returning_id(
    client: &mut Client,
    sql: &str,
    params: &[&(dyn postgres::types::ToSql + Sync)],
) -> Result<i32, String> {
    let row = client
        .query_one(sql, params)
        .map_err(|err| format_postgres_error(&err))?;
    Ok(row.get(0))
}

fn execute(
    client: &mut Client,
    sql: &str,
    params: &[&(dyn postgres::types::ToSql + Sync)],
) -> Result<(), String> {
    client
        .execute(sql, params)
        .map_err(|err| format_postgres_error(&err))?;
    Ok(())
}

/// Insert a live user.
pub fn insert_user(client: &mut Client, username: &str, site_admin: bool) -> Result<UserId, String> {
    insert_returning_id(
        client,
        "INSERT INTO users (username, site_admin) VALUES ($1, $2) RETURNING id",
        &[&username, &site_admin],
    )
    .map(UserId::new)
}

/// Soft-delete a user.
pub fn soft_delete_user(client: &mut Client, user_id: UserId) -> Result<(), String> {
    execute(
        client,
        "UPDATE users SET deleted_at = now() WHERE id = $1",
        &[&user_id.get()],
    )
}

/// Attach an email to a user, verified or not.
pub fn insert_email(
    client: &mut Client,
    user_id: UserId,
    email: &str,
    verified: bool,
) -> Result<(), String> {
    execute(
        client,
        "INSERT INTO user_emails (user_id, email, verified_at) \
         VALUES ($1, $2, CASE WHEN $3::boolean THEN now() END)",
        &[&user_id.get(), &email, &verified],
    )
}

/// Link a code host account to a user.
pub fn insert_external_account(
    client: &mut Client,
    user_id: UserId,
    service_type: &str,
    service_id: &str,
    account_id: &str,
) -> Result<i32, String> {
    insert_returning_id(
        client,
        "INSERT INTO user_external_accounts (user_id, service_type, service_id, account_id) \
         VALUES ($1, $2, $3, $4) RETURNING id",
        &[&user_id.get(), &service_type, &service_id, &account_id],
    )
}

/// Soft-delete a code host account link.
pub fn soft_delete_external_account(client: &mut Client, account_row: i32) -> Result<(), String> {
    execute(
        client,
        "UPDATE user_external_accounts SET deleted_at = now() WHERE id = $1",
        &[&account_row],
    )
}

/// Insert a live repository.
pub fn insert_repo(client: &mut Client, name: &str, private: bool) -> Result<RepoId, String> {
    insert_returning_id(
        client,
        "INSERT INTO repo (name, private) VALUES ($1, $2) RETURNING id",
        &[&name, &private],
    )
    .map(RepoId::new)
}

/// Soft-delete a repository.
pub fn soft_delete_repo(client: &mut Client, repo_id: RepoId) -> Result<(), String> {
    execute(
        client,
        "UPDATE repo SET deleted_at = now() WHERE id = $1",
        &[&repo_id.get()],
    )
}

/// Insert an organisation and return its ID.
pub fn insert_org(client: &mut Client, name: &str) -> Result<i32, String> {
    insert_returning_id(
        client,
        "INSERT INTO orgs (name) VALUES ($1) RETURNING id",
        &[&name],
    )
}

/// Add a user to an organisation.
pub fn add_org_member(client: &mut Client, org_id: i32, user_id: UserId) -> Result<(), String> {
    execute(
        client,
        "INSERT INTO org_members (org_id, user_id) VALUES ($1, $2)",
        &[&org_id, &user_id.get()],
    )
}

/// Register a code host connection owned by an organisation.
pub fn insert_org_code_host_connection(
    client: &mut Client,
    org_id: i32,
    kind: &str,
) -> Result<(), String> {
    execute(
        client,
        "INSERT INTO external_services (kind, display_name, namespace_org_id) \
         VALUES ($1, $1, $2)",
        &[&kind, &org_id],
    )
}

/// Register a code host connection owned by a user, last synced at
/// `last_sync_at`.
pub fn insert_user_code_host_connection(
    client: &mut Client,
    user_id: UserId,
    kind: &str,
    last_sync_at: DateTime<Utc>,
) -> Result<(), String> {
    execute(
        client,
        "INSERT INTO external_services (kind, display_name, namespace_user_id, last_sync_at) \
         VALUES ($1, $1, $2, $3::text::timestamptz)",
        &[&kind, &user_id.get(), &last_sync_at.to_rfc3339()],
    )
}

/// Record sub-repository permissions written at `updated_at`.
pub fn insert_sub_repo_permissions(
    client: &mut Client,
    repo_id: RepoId,
    user_id: UserId,
    updated_at: DateTime<Utc>,
) -> Result<(), String> {
    execute(
        client,
        "INSERT INTO sub_repo_permissions (repo_id, user_id, path_includes, updated_at) \
         VALUES ($1, $2, ARRAY['/**'], $3::text::timestamptz)",
        &[&repo_id.get(), &user_id.get(), &updated_at.to_rfc3339()],
    )
}

/// Every `(user_id, object_ids)` pair in `user_permissions`, ordered by user.
pub fn user_permission_rows(client: &mut Client) -> Result<Vec<(i32, Vec<i32>)>, String> {
    let rows = client
        .query(
            "SELECT user_id, object_ids_ints FROM user_permissions ORDER BY user_id",
            &[],
        )
        .map_err(|err| format_postgres_error(&err))?;
    Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
}

/// Every `(repo_id, user_ids)` pair in `repo_permissions`, ordered by repo.
pub fn repo_permission_rows(client: &mut Client) -> Result<Vec<(i32, Vec<i32>)>, String> {
    let rows = client
        .query(
            "SELECT repo_id, user_ids_ints FROM repo_permissions ORDER BY repo_id",
            &[],
        )
        .map_err(|err| format_postgres_error(&err))?;
    Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
}

/// Assert that both projections describe the same `(user, repo)` pairs.
///
/// Empty rows on either side carry no pairs and are ignored.
pub fn assert_projections_mirror(client: &mut Client) {
    let mut from_users: Vec<(i32, i32)> = user_permission_rows(client)
        .expect("user permissions load")
        .into_iter()
        .flat_map(|(user, repos)| repos.into_iter().map(move |repo| (user, repo)))
        .collect();
    let mut from_repos: Vec<(i32, i32)> = repo_permission_rows(client)
        .expect("repo permissions load")
        .into_iter()
        .flat_map(|(repo, users)| users.into_iter().map(move |user| (user, repo)))
        .collect();
    from_users.sort_unstable();
    from_repos.sort_unstable();

    assert_eq!(from_users, from_repos, "user and repository projections diverged");
}
