//! Shared embedded PostgreSQL helpers for integration tests.
//!
//! Every suite clones its database from a template migrated once per
//! migrations hash, so schema setup runs the crate's embedded migrations and
//! cannot drift from what production applies.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use perms_store::outbound::persistence::apply_migrations;
use pg_embedded_setup_unpriv::test_support::hash_directory;
use pg_embedded_setup_unpriv::{ClusterHandle, TemporaryDatabase};
use uuid::Uuid;

static TEMPLATE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const TEMPLATE_NAME_PREFIX: &str = "perms_template";
const TEMPLATE_PROVISION_RETRIES: usize = 5;
const TEMPLATE_PROVISION_RETRY_DELAY: Duration = Duration::from_millis(500);

fn migrations_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

fn template_database_name() -> Result<String, String> {
    let hash =
        hash_directory(migrations_dir()).map_err(|err| format!("hash migrations: {err}"))?;
    let short_hash = hash.get(..8).unwrap_or(&hash);
    Ok(format!("{TEMPLATE_NAME_PREFIX}_{short_hash}"))
}

/// Creates or reuses a template database with every migration applied.
fn ensure_template_database(cluster: &ClusterHandle) -> Result<String, String> {
    let template_name = template_database_name()?;
    let _lock = TEMPLATE_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|err| err.into_inner());

    let exists = cluster
        .database_exists(template_name.as_str())
        .map_err(|err| format!("template check: {err:?}"))?;

    if !exists {
        cluster
            .create_database(template_name.as_str())
            .map_err(|err| format!("create template: {err:?}"))?;

        let url = cluster.connection().database_url(&template_name);
        apply_migrations(&url).map_err(|err| err.to_string())?;
    }

    Ok(template_name)
}

fn provision_template_database_attempt(
    cluster: &ClusterHandle,
    attempt: usize,
) -> Result<TemporaryDatabase, String> {
    let template_name = ensure_template_database(cluster).map_err(|error| {
        format!("template check: attempt {attempt}/{TEMPLATE_PROVISION_RETRIES}: {error}")
    })?;
    let db_name = format!("test_{}", Uuid::new_v4());
    cluster
        .temporary_database_from_template(db_name.as_str(), template_name.as_str())
        .map_err(|error| {
            format!(
                "create database from template: attempt {attempt}/{TEMPLATE_PROVISION_RETRIES}: {error:?}"
            )
        })
}

/// Provisions a temporary database cloned from the migration template.
pub fn provision_template_database(cluster: &ClusterHandle) -> Result<TemporaryDatabase, String> {
    let mut last_error = None;
    for attempt in 1..=TEMPLATE_PROVISION_RETRIES {
        match provision_template_database_attempt(cluster, attempt) {
            Ok(database) => return Ok(database),
            Err(error) => last_error = Some(error),
        };
        if attempt < TEMPLATE_PROVISION_RETRIES {
            std::thread::sleep(TEMPLATE_PROVISION_RETRY_DELAY);
        }
    }

    Err(last_error
        .unwrap_or_else(|| "create database from template: exhausted retries".to_owned()))
}
