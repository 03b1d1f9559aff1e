//! Integration tests for the mirrored permission projections against
//! embedded PostgreSQL.
//!
//! Each test clones a fresh database from the migrated template and drives
//! `DieselPermsStore` through the `PermsRepository` port. Raw rows are read
//! back over a `postgres` client to check the mirror invariant directly.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use perms_store::domain::ports::{PermsRepository, PermsStoreError};
use perms_store::domain::{
    BatchPlanner, PermType, Perms, RepoId, RepoPermissions, UserId, UserPermissions,
};
use perms_store::outbound::persistence::{PermsStoreOptions, apply_migrations};
use rstest::{fixture, rstest};

mod support;

use support::StoreHarness;
use support::seed::{assert_projections_mirror, repo_permission_rows, user_permission_rows};

fn repo_set(ids: impl IntoIterator<Item = i32>) -> BTreeSet<RepoId> {
    ids.into_iter().map(RepoId::new).collect()
}

fn user_set(ids: impl IntoIterator<Item = i32>) -> BTreeSet<UserId> {
    ids.into_iter().map(UserId::new).collect()
}

#[fixture]
fn harness() -> Option<StoreHarness> {
    StoreHarness::start(PermsStoreOptions::default())
}

#[rstest]
fn missing_rows_are_not_found_but_empty_rows_load(harness: Option<StoreHarness>) {
    let Some(harness) = harness else {
        eprintln!("SKIP-TEST-CLUSTER: missing_rows_are_not_found_but_empty_rows_load skipped");
        return;
    };
    let user = UserId::new(1);

    let missing = harness
        .block_on(harness.store.load_user_permissions(user, Perms::Read, PermType::Repos))
        .expect_err("no row yet");
    assert!(missing.is_not_found());

    harness
        .block_on(harness.store.set_user_permissions(&UserPermissions::new(user, [])))
        .expect("empty write succeeds");
    let loaded = harness
        .block_on(harness.store.load_user_permissions(user, Perms::Read, PermType::Repos))
        .expect("empty row loads");
    assert!(loaded.ids.is_empty());
    assert!(loaded.synced_at.is_some());

    let repo_missing = harness
        .block_on(harness.store.load_repo_permissions(RepoId::new(9), Perms::Read))
        .expect_err("no repository row");
    assert_eq!(repo_missing, PermsStoreError::NotFound);
}

#[rstest]
fn user_writes_are_mirrored_into_repository_rows(harness: Option<StoreHarness>) {
    let Some(mut harness) = harness else {
        eprintln!("SKIP-TEST-CLUSTER: user_writes_are_mirrored_into_repository_rows skipped");
        return;
    };
    let (alice, bob) = (UserId::new(1), UserId::new(2));

    harness
        .block_on(async {
            harness
                .store
                .set_user_permissions(&UserPermissions::new(alice, repo_set([1, 2])))
                .await?;
            harness
                .store
                .set_user_permissions(&UserPermissions::new(bob, repo_set([2, 3])))
                .await
        })
        .expect("initial writes succeed");

    let shared = harness
        .block_on(harness.store.load_repo_permissions(RepoId::new(2), Perms::Read))
        .expect("mirror row exists");
    assert_eq!(shared.user_ids, user_set([1, 2]));
    assert_eq!(shared.synced_at, None, "mirror writes never stamp synced_at");

    harness
        .block_on(
            harness
                .store
                .set_user_permissions(&UserPermissions::new(alice, repo_set([2, 3]))),
        )
        .expect("replacement succeeds");

    let dropped = harness
        .block_on(harness.store.load_repo_permissions(RepoId::new(1), Perms::Read))
        .expect("removed mirror row is kept");
    assert!(dropped.user_ids.is_empty());
    let joined = harness
        .block_on(harness.store.load_repo_permissions(RepoId::new(3), Perms::Read))
        .expect("mirror row exists");
    assert_eq!(joined.user_ids, user_set([1, 2]));

    assert_projections_mirror(&mut harness.client);
}

#[rstest]
fn repeating_a_write_only_advances_timestamps(harness: Option<StoreHarness>) {
    let Some(mut harness) = harness else {
        eprintln!("SKIP-TEST-CLUSTER: repeating_a_write_only_advances_timestamps skipped");
        return;
    };
    let permissions = UserPermissions::new(UserId::new(7), repo_set([10, 11]));

    let first = harness
        .block_on(harness.store.set_user_permissions(&permissions))
        .expect("first write succeeds");
    let mirror_before = repo_permission_rows(&mut harness.client).expect("rows load");
    let repo_before = harness
        .block_on(harness.store.load_repo_permissions(RepoId::new(10), Perms::Read))
        .expect("mirror row exists");

    harness.clock.advance(Duration::from_secs(60));
    let second = harness
        .block_on(harness.store.set_user_permissions(&permissions))
        .expect("second write succeeds");

    assert_eq!(second.ids, first.ids);
    let first_synced = first.synced_at.expect("stamped");
    assert_eq!(
        second.synced_at,
        Some(first_synced + TimeDelta::seconds(60))
    );

    let loaded = harness
        .block_on(
            harness
                .store
                .load_user_permissions(UserId::new(7), Perms::Read, PermType::Repos),
        )
        .expect("row loads");
    assert_eq!(loaded, second);

    let repo_after = harness
        .block_on(harness.store.load_repo_permissions(RepoId::new(10), Perms::Read))
        .expect("mirror row exists");
    assert_eq!(repo_after, repo_before, "unchanged set leaves the mirror alone");
    assert_eq!(
        repo_permission_rows(&mut harness.client).expect("rows load"),
        mirror_before
    );
}

#[rstest]
fn repository_writes_mirror_users_and_keep_unrestricted(harness: Option<StoreHarness>) {
    let Some(mut harness) = harness else {
        eprintln!("SKIP-TEST-CLUSTER: repository_writes_mirror_users_and_keep_unrestricted skipped");
        return;
    };
    let repo = RepoId::new(42);

    let stored = harness
        .block_on(
            harness
                .store
                .set_repo_permissions(&RepoPermissions::new(repo, user_set([3, 1])).with_unrestricted(true)),
        )
        .expect("write succeeds");
    assert!(stored.unrestricted);

    let loaded = harness
        .block_on(harness.store.load_repo_permissions(repo, Perms::Read))
        .expect("row loads");
    assert_eq!(loaded, stored);

    let user = harness
        .block_on(
            harness
                .store
                .load_user_permissions(UserId::new(3), Perms::Read, PermType::Repos),
        )
        .expect("mirror row exists");
    assert_eq!(user.ids, repo_set([42]));
    assert_eq!(user.synced_at, None);

    harness
        .block_on(
            harness
                .store
                .set_repo_permissions(&RepoPermissions::new(repo, user_set([3]))),
        )
        .expect("replacement succeeds");
    let reloaded = harness
        .block_on(harness.store.load_repo_permissions(repo, Perms::Read))
        .expect("row loads");
    assert!(!reloaded.unrestricted, "full writes persist the flag as given");

    assert_eq!(
        user_permission_rows(&mut harness.client).expect("rows load"),
        vec![(1, Vec::new()), (3, vec![42])]
    );
    assert_projections_mirror(&mut harness.client);
}

#[rstest]
fn writes_larger_than_one_page_are_fully_mirrored(harness: Option<StoreHarness>) {
    let Some(mut harness) = harness else {
        eprintln!("SKIP-TEST-CLUSTER: writes_larger_than_one_page_are_fully_mirrored skipped");
        return;
    };
    let user = UserId::new(5);
    let ids = repo_set(1..=17_000);

    harness
        .block_on(
            harness
                .store
                .set_user_permissions(&UserPermissions::new(user, ids.clone())),
        )
        .expect("large write succeeds");

    let loaded = harness
        .block_on(harness.store.load_user_permissions(user, Perms::Read, PermType::Repos))
        .expect("row loads");
    assert_eq!(loaded.ids, ids);

    for repo in [1, 15_000, 15_001, 17_000] {
        let mirror = harness
            .block_on(harness.store.load_repo_permissions(RepoId::new(repo), Perms::Read))
            .expect("mirror row exists");
        assert_eq!(mirror.user_ids, user_set([5]), "repository {repo}");
    }
    assert_eq!(
        repo_permission_rows(&mut harness.client)
            .expect("rows load")
            .len(),
        17_000
    );
}

#[rstest]
fn tiny_pages_produce_the_same_projections() {
    let planner = BatchPlanner::new(NonZeroUsize::new(3).expect("non-zero"));
    let options = PermsStoreOptions::default()
        .with_repo_planner(planner)
        .with_user_planner(planner);
    let Some(mut harness) = StoreHarness::start(options) else {
        eprintln!("SKIP-TEST-CLUSTER: tiny_pages_produce_the_same_projections skipped");
        return;
    };

    harness
        .block_on(async {
            harness
                .store
                .set_user_permissions(&UserPermissions::new(UserId::new(1), repo_set(1..=10)))
                .await?;
            harness
                .store
                .set_user_permissions(&UserPermissions::new(
                    UserId::new(1),
                    repo_set([2, 4, 6, 8, 10, 12, 14]),
                ))
                .await?;
            harness
                .store
                .set_repo_permissions(&RepoPermissions::new(RepoId::new(4), user_set(1..=8)))
                .await
        })
        .expect("paged writes succeed");

    let user = harness
        .block_on(
            harness
                .store
                .load_user_permissions(UserId::new(1), Perms::Read, PermType::Repos),
        )
        .expect("row loads");
    assert_eq!(user.ids, repo_set([2, 4, 6, 8, 10, 12, 14]));
    let repo = harness
        .block_on(harness.store.load_repo_permissions(RepoId::new(4), Perms::Read))
        .expect("row loads");
    assert_eq!(repo.user_ids, user_set(1..=8));

    assert_projections_mirror(&mut harness.client);
}

#[rstest]
fn unrestricted_flag_only_updates_existing_rows(harness: Option<StoreHarness>) {
    let Some(harness) = harness else {
        eprintln!("SKIP-TEST-CLUSTER: unrestricted_flag_only_updates_existing_rows skipped");
        return;
    };

    harness
        .block_on(
            harness
                .store
                .set_repo_permissions(&RepoPermissions::new(RepoId::new(1), user_set([1]))),
        )
        .expect("seed row");

    harness
        .block_on(
            harness
                .store
                .set_repo_permissions_unrestricted(&[RepoId::new(1), RepoId::new(2)], true),
        )
        .expect("flag update succeeds");
    harness
        .block_on(harness.store.set_repo_permissions_unrestricted(&[], false))
        .expect("empty update is a no-op");

    let flagged = harness
        .block_on(harness.store.load_repo_permissions(RepoId::new(1), Perms::Read))
        .expect("row loads");
    assert!(flagged.unrestricted);
    assert_eq!(flagged.user_ids, user_set([1]));

    let absent = harness
        .block_on(harness.store.load_repo_permissions(RepoId::new(2), Perms::Read))
        .expect_err("flagging does not create rows");
    assert!(absent.is_not_found());
}

#[rstest]
fn touch_stamps_without_changing_users(harness: Option<StoreHarness>) {
    let Some(harness) = harness else {
        eprintln!("SKIP-TEST-CLUSTER: touch_stamps_without_changing_users skipped");
        return;
    };
    let repo = RepoId::new(3);

    harness
        .block_on(harness.store.touch_repo_permissions(repo))
        .expect("touch creates a row");
    let created = harness
        .block_on(harness.store.load_repo_permissions(repo, Perms::Read))
        .expect("row loads");
    assert!(created.user_ids.is_empty());

    harness
        .block_on(
            harness
                .store
                .set_repo_permissions(&RepoPermissions::new(repo, user_set([9]))),
        )
        .expect("write succeeds");
    harness.clock.advance(Duration::from_secs(3_600));
    harness
        .block_on(harness.store.touch_repo_permissions(repo))
        .expect("touch succeeds");

    let touched = harness
        .block_on(harness.store.load_repo_permissions(repo, Perms::Read))
        .expect("row loads");
    let expected = Utc
        .with_ymd_and_hms(2024, 1, 1, 1, 0, 0)
        .single()
        .expect("valid timestamp");
    assert_eq!(touched.user_ids, user_set([9]));
    assert_eq!(touched.synced_at, Some(expected));
    assert_eq!(touched.updated_at, Some(expected));
}

#[rstest]
fn deleting_user_rows_leaves_repository_mirror(harness: Option<StoreHarness>) {
    let Some(mut harness) = harness else {
        eprintln!("SKIP-TEST-CLUSTER: deleting_user_rows_leaves_repository_mirror skipped");
        return;
    };
    let user = UserId::new(4);

    harness
        .block_on(
            harness
                .store
                .set_user_permissions(&UserPermissions::new(user, repo_set([1]))),
        )
        .expect("write succeeds");
    harness
        .block_on(harness.store.delete_all_user_permissions(user))
        .expect("delete succeeds");

    let missing = harness
        .block_on(harness.store.load_user_permissions(user, Perms::Read, PermType::Repos))
        .expect_err("row deleted");
    assert!(missing.is_not_found());
    assert_eq!(
        repo_permission_rows(&mut harness.client).expect("rows load"),
        vec![(1, vec![4])]
    );
}

#[rstest]
fn cloned_databases_have_every_migration_applied(harness: Option<StoreHarness>) {
    let Some(harness) = harness else {
        eprintln!("SKIP-TEST-CLUSTER: cloned_databases_have_every_migration_applied skipped");
        return;
    };

    assert_eq!(apply_migrations(&harness.database_url), Ok(0));
}
