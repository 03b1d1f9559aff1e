//! PostgreSQL persistence adapters using Diesel.
//!
//! Concrete implementations of the domain ports backed by PostgreSQL through
//! `diesel-async` and a `bb8` pool.
//!
//! - **Thin adapters**: adapters translate between rows and domain records
//!   and run the statements; diffing and paging come from the domain.
//! - **Internal models**: row structs (`models.rs`) and table definitions
//!   (`schema.rs`) never leave this module.
//! - **One transaction per write**: every operation that touches both
//!   projections commits or rolls back as a unit.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mockable::DefaultClock;
//! use perms_store::outbound::persistence::{
//!     DbPool, DieselIdentityDirectory, DieselPermsStore, PermsStoreOptions, PoolConfig,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/perms")).await?;
//! let store = DieselPermsStore::new(
//!     pool.clone(),
//!     Arc::new(DefaultClock),
//!     PermsStoreOptions::default(),
//! );
//! let directory = DieselIdentityDirectory::new(pool);
//! # let _ = (store, directory);
//! # Ok(())
//! # }
//! ```

mod diesel_identity_directory;
mod diesel_pending_perms_store;
mod diesel_perms_scheduling_query;
mod diesel_perms_store;
mod error_mapping;
mod migrations;
mod mirror_sql;
mod models;
mod pool;
mod schema;

pub use diesel_identity_directory::DieselIdentityDirectory;
pub use diesel_perms_store::{DieselPermsStore, PermsStoreOptions};
pub use migrations::{MIGRATIONS, MigrationError, apply_migrations};
pub use pool::{DbPool, PoolConfig, PoolError};
