//! Embedded schema migrations.

use diesel::{Connection, PgConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

/// Migrations creating the platform tables the store reads and the four
/// permission tables it owns.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Errors raised while applying migrations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    /// The database could not be reached.
    #[error("connect for migrations: {message}")]
    Connection {
        /// Connection error text.
        message: String,
    },
    /// A migration failed to apply.
    #[error("apply migrations: {message}")]
    Apply {
        /// Migration harness error text.
        message: String,
    },
}

/// Apply every pending migration to `database_url`. Returns how many ran.
///
/// Blocks on a synchronous connection; async callers should run it on a
/// blocking thread.
pub fn apply_migrations(database_url: &str) -> Result<usize, MigrationError> {
    let mut connection =
        PgConnection::establish(database_url).map_err(|error| MigrationError::Connection {
            message: error.to_string(),
        })?;
    let applied = connection
        .run_pending_migrations(MIGRATIONS)
        .map_err(|error| MigrationError::Apply {
            message: error.to_string(),
        })?;
    Ok(applied.len())
}
