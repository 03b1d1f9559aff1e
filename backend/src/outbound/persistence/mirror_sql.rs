//! Batched statements that apply a diff to the mirrored projection.
//!
//! One statement is issued per [`Page`]. Each statement is a multi-row
//! upsert whose conflict branch unions the writer into rows listed as added
//! and removes it from every other row, so a single statement serves both
//! queues. Rows within a page are written in ascending ID order so
//! concurrent writers acquire mirror row locks in the same order.

use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_query;
use diesel::sql_types::{Array, Int4, Int8, Text, Timestamptz};

use crate::domain::{MIRROR_STATEMENT_PARAMETERS, Page, PermType, Perms};

/// Which mirror table a page is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MirrorTable {
    /// `repo_permissions`, keyed by repository; four parameters per row.
    Repo,
    /// `user_permissions`, keyed by user and object type; five parameters
    /// per row.
    User { kind: PermType },
}

impl MirrorTable {
    fn insert_prefix(self) -> &'static str {
        match self {
            Self::Repo => {
                "INSERT INTO repo_permissions \
                 (repo_id, permission, user_ids_ints, updated_at) VALUES "
            }
            Self::User { .. } => {
                "INSERT INTO user_permissions \
                 (user_id, permission, object_type, object_ids_ints, updated_at) VALUES "
            }
        }
    }

    fn conflict_clause(self, added_param: usize, member_param: usize) -> String {
        let (table, key, ids, constraint) = match self {
            Self::Repo => (
                "repo_permissions",
                "repo_id",
                "user_ids_ints",
                "repo_permissions_perm_unique",
            ),
            Self::User { .. } => (
                "user_permissions",
                "user_id",
                "object_ids_ints",
                "user_permissions_perm_object_unique",
            ),
        };
        format!(
            " ON CONFLICT ON CONSTRAINT {constraint} DO UPDATE SET \
             {ids} = CASE WHEN {table}.{key} = ANY (${added_param}) \
             THEN perm_ids_union({table}.{ids}, excluded.{ids}) \
             ELSE perm_ids_remove({table}.{ids}, ${member_param}) END, \
             updated_at = excluded.updated_at"
        )
    }

    /// Bind parameters each row of the VALUES list uses.
    pub(crate) const fn row_parameters(self) -> usize {
        match self {
            Self::Repo => crate::domain::REPO_ROW_PARAMETERS,
            Self::User { .. } => crate::domain::USER_ROW_PARAMETERS,
        }
    }
}

/// One row of a mirror page: the mirror key and whether the writer joins it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct MirrorRow {
    key: i32,
    joins: bool,
}

fn sorted_rows(page: Page<'_, i32>) -> Vec<MirrorRow> {
    let mut rows: Vec<MirrorRow> = page
        .added
        .iter()
        .map(|&key| MirrorRow { key, joins: true })
        .chain(page.removed.iter().map(|&key| MirrorRow { key, joins: false }))
        .collect();
    rows.sort_unstable();
    rows
}

fn values_sql(table: MirrorTable, rows: usize) -> String {
    let per_row = table.row_parameters();
    let tuples: Vec<String> = (0..rows)
        .map(|row| {
            let first = row * per_row + 1;
            let placeholders: Vec<String> =
                (first..first + per_row).map(|n| format!("${n}")).collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();
    tuples.join(", ")
}

/// Placeholder numbers of the added-keys and writer arrays bound after
/// `rows` VALUES rows. The writer's is the highest parameter of the statement.
fn trailing_parameters(table: MirrorTable, rows: usize) -> (usize, usize) {
    let added_param = rows * table.row_parameters() + 1;
    (added_param, added_param + MIRROR_STATEMENT_PARAMETERS - 1)
}

/// Build the upsert applying one page of a diff to `table`.
///
/// `member` is the ID of the centric row being written: added mirror rows
/// gain it and removed mirror rows lose it. A mirror row that does not exist
/// yet is created holding only `member` (or nothing, for removals).
pub(crate) fn mirror_page_query(
    table: MirrorTable,
    perm: Perms,
    page: Page<'_, i32>,
    member: i32,
    updated_at: DateTime<Utc>,
) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
    let rows = sorted_rows(page);
    let (added_param, member_param) = trailing_parameters(table, rows.len());

    let mut sql = String::from(table.insert_prefix());
    sql.push_str(&values_sql(table, rows.len()));
    sql.push_str(&table.conflict_clause(added_param, member_param));

    let mut query = sql_query(sql).into_boxed::<Pg>();
    for row in &rows {
        let ids = if row.joins { vec![member] } else { Vec::new() };
        query = query.bind::<Int4, _>(row.key).bind::<Text, _>(perm.as_str());
        if let MirrorTable::User { kind } = table {
            query = query.bind::<Text, _>(kind.as_str());
        }
        query = query
            .bind::<Array<Int4>, _>(ids)
            .bind::<Timestamptz, _>(updated_at);
    }

    query
        .bind::<Array<Int4>, _>(page.added.to_vec())
        .bind::<Array<Int4>, _>(vec![member])
}

/// SQL moving one repository in or out of the pending sets of identities.
///
/// Target rows are locked in ascending ID order before they are updated.
/// IDs that no longer resolve to a row, or resolve to a row of another
/// scope, are skipped. Binds: `$1` joining IDs, `$2` every touched ID,
/// `$3` the repository as a one-element array, `$4` timestamp, `$5`
/// permission, `$6` object type. Returns the updated IDs.
pub(crate) const UPDATE_PENDING_OBJECTS_SQL: &str = r#"
WITH targets AS (
    SELECT id
    FROM user_pending_permissions
    WHERE id = ANY ($2) AND permission = $5 AND object_type = $6
    ORDER BY id
    FOR UPDATE
)
UPDATE user_pending_permissions AS pending
SET object_ids_ints = CASE
        WHEN pending.id = ANY ($1) THEN perm_ids_union(pending.object_ids_ints, $3)
        ELSE perm_ids_remove(pending.object_ids_ints, $3)
    END,
    updated_at = $4
FROM targets
WHERE pending.id = targets.id
RETURNING pending.id
"#;

/// Build the pending-set update for one repository.
pub(crate) fn pending_objects_query(
    added: Vec<i64>,
    touched: Vec<i64>,
    repo_id: i32,
    updated_at: DateTime<Utc>,
    perm: Perms,
    kind: PermType,
) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
    sql_query(UPDATE_PENDING_OBJECTS_SQL)
        .into_boxed::<Pg>()
        .bind::<Array<Int8>, _>(added)
        .bind::<Array<Int8>, _>(touched)
        .bind::<Array<Int4>, _>(vec![repo_id])
        .bind::<Timestamptz, _>(updated_at)
        .bind::<Text, _>(perm.as_str())
        .bind::<Text, _>(kind.as_str())
}
