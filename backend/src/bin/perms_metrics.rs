//! Report permission staleness and sync backlog as JSON.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::io::{self, Write};
use std::sync::Arc;

use mockable::DefaultClock;
use ortho_config::OrthoConfig as _;
use perms_store::config::PermsSettings;
use perms_store::domain::PermsMetrics;
use perms_store::domain::ports::{PermsSchedulingQuery, PermsStoreError};
use perms_store::outbound::persistence::{DbPool, DieselPermsStore, PoolConfig, apply_migrations};
use serde::Serialize;
use tokio::runtime::Builder;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// Everything the command prints.
#[derive(Debug, Serialize)]
struct Report {
    stale_after_secs: u64,
    #[serde(flatten)]
    metrics: PermsMetrics,
    users_with_no_perms: i64,
    repos_with_no_perms: i64,
}

fn main() -> io::Result<()> {
    if let Err(error) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(%error, "tracing init failed");
    }

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| io::Error::other(format!("create Tokio runtime: {error}")))?;
    runtime.block_on(async_main())
}

async fn async_main() -> io::Result<()> {
    let settings = PermsSettings::load_from_iter(std::env::args_os())
        .map_err(|error| io::Error::other(format!("load settings: {error}")))?;
    let database_url = settings.database_url.clone().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "database URL is required (--database-url or PERMS_DATABASE_URL)",
        )
    })?;

    if settings.run_migrations {
        let url = database_url.clone();
        let applied = tokio::task::spawn_blocking(move || apply_migrations(&url))
            .await
            .map_err(|error| io::Error::other(format!("migration task: {error}")))?
            .map_err(io::Error::other)?;
        info!(applied, "applied pending migrations");
    }

    let pool = DbPool::new(PoolConfig::new(&database_url).with_max_size(2))
        .await
        .map_err(|error| io::Error::other(format!("create database pool: {error}")))?;
    let store = DieselPermsStore::new(pool, Arc::new(DefaultClock), settings.store_options());

    let report = collect(&store, &settings)
        .await
        .map_err(|error| io::Error::other(format!("query permission metrics: {error}")))?;
    info!(
        users_with_stale_perms = report.metrics.users_with_stale_perms,
        repos_with_stale_perms = report.metrics.repos_with_stale_perms,
        "collected permission metrics"
    );

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report).map_err(io::Error::other)?;
    writeln!(stdout)
}

async fn collect<Q: PermsSchedulingQuery>(
    store: &Q,
    settings: &PermsSettings,
) -> Result<Report, PermsStoreError> {
    let stale_after = settings.stale_after();
    Ok(Report {
        stale_after_secs: stale_after.as_secs(),
        metrics: store.metrics(stale_after).await?,
        users_with_no_perms: store.count_users_with_no_perms().await?,
        repos_with_no_perms: store.count_repos_with_no_perms().await?,
    })
}
