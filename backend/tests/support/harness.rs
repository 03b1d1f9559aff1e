//! Store harness shared by the PostgreSQL-backed suites.
//!
//! Each harness owns a database cloned from the migrated template, a Tokio
//! runtime for driving the async store from synchronous tests, a settable
//! clock and a `postgres` client for seeding and raw assertions.

use std::future::Future;
use std::sync::Arc;

use mockable::Clock;
use perms_store::outbound::persistence::{DbPool, DieselPermsStore, PermsStoreOptions, PoolConfig};
use perms_store::test_support::MutableClock;
use pg_embedded_setup_unpriv::TemporaryDatabase;
use postgres::{Client, NoTls};
use tokio::runtime::Runtime;

use super::pg_embed::shared_cluster;
use super::{format_postgres_error, handle_cluster_setup_failure, provision_template_database};

pub struct StoreHarness {
    pub runtime: Runtime,
    pub store: DieselPermsStore,
    pub pool: DbPool,
    pub clock: Arc<MutableClock>,
    pub client: Client,
    pub database_url: String,
    _database: TemporaryDatabase,
}

impl StoreHarness {
    /// Set up a harness, honouring `SKIP_TEST_CLUSTER` on failure.
    pub fn start(options: PermsStoreOptions) -> Option<Self> {
        match Self::try_start(options, 2) {
            Ok(harness) => Some(harness),
            Err(reason) => handle_cluster_setup_failure(reason),
        }
    }

    /// Set up a harness whose pool holds up to `pool_size` connections.
    pub fn try_start(options: PermsStoreOptions, pool_size: u32) -> Result<Self, String> {
        let runtime = Runtime::new().map_err(|err| err.to_string())?;
        let cluster = shared_cluster()?;
        let database = provision_template_database(cluster)?;
        let database_url = database.url().to_owned();

        let config = PoolConfig::new(database_url.as_str())
            .with_max_size(pool_size)
            .with_min_idle(Some(1));
        let pool = runtime
            .block_on(async { DbPool::new(config).await })
            .map_err(|err| err.to_string())?;

        let clock = Arc::new(MutableClock::at_epoch_offset(0));
        let store_clock: Arc<dyn Clock> = clock.clone();
        let store = DieselPermsStore::new(pool.clone(), store_clock, options);
        let client = Client::connect(database_url.as_str(), NoTls)
            .map_err(|err| format_postgres_error(&err))?;

        Ok(Self {
            runtime,
            store,
            pool,
            clock,
            client,
            database_url,
            _database: database,
        })
    }

    /// Drive `future` to completion on the harness runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
