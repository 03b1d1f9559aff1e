//! Translation of pool and Diesel failures into port errors.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::debug;

use crate::domain::ports::{IdentityDirectoryError, PermsStoreError};

use super::pool::PoolError;

/// Message PostgreSQL reports for a deadlock victim (SQLSTATE 40P01).
const DEADLOCK_MESSAGE: &str = "deadlock detected";

/// Whether the database aborted the transaction in a way a retry can fix.
///
/// Serialisation failures are classified by Diesel from their SQLSTATE.
/// Deadlocks reach Diesel as [`DatabaseErrorKind::Unknown`] and
/// `DatabaseErrorInformation` does not carry the SQLSTATE, so they are
/// recognised by the server's message text. That text follows the server's
/// `lc_messages`; with a non-English setting deadlock victims surface as
/// [`PermsStoreError::Query`] instead.
fn is_transient(kind: &DatabaseErrorKind, message: &str) -> bool {
    matches!(kind, DatabaseErrorKind::SerializationFailure)
        || message.contains(DEADLOCK_MESSAGE)
}

fn log_diesel_error(error: &DieselError) {
    match error {
        DieselError::DatabaseError(kind, info) => {
            debug!(
                ?kind,
                message = info.message(),
                constraint = ?info.constraint_name(),
                "diesel operation failed"
            );
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(error),
            error = %error,
            "diesel operation failed"
        ),
    }
}

/// Map pool errors to permission store connection errors.
pub(crate) fn map_pool_error(error: PoolError) -> PermsStoreError {
    PermsStoreError::connection(error.into_message())
}

/// Map Diesel errors to permission store errors.
///
/// `NotFound` is kept as [`PermsStoreError::NotFound`] so `first()` lookups
/// can be propagated with `?`. Deadlock victims and serialisation failures
/// become [`PermsStoreError::Transient`].
pub(crate) fn map_diesel_error(error: DieselError) -> PermsStoreError {
    log_diesel_error(&error);

    match error {
        DieselError::NotFound => PermsStoreError::not_found(),
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            PermsStoreError::connection(info.message().to_owned())
        }
        DieselError::DatabaseError(kind, info) if is_transient(&kind, info.message()) => {
            PermsStoreError::transient(info.message().to_owned())
        }
        DieselError::DatabaseError(_, info) => PermsStoreError::query(info.message().to_owned()),
        other => PermsStoreError::query(other.to_string()),
    }
}

impl From<DieselError> for PermsStoreError {
    fn from(error: DieselError) -> Self {
        map_diesel_error(error)
    }
}

/// Map pool errors to identity directory connection errors.
pub(crate) fn map_directory_pool_error(error: PoolError) -> IdentityDirectoryError {
    IdentityDirectoryError::connection(error.into_message())
}

/// Map Diesel errors to identity directory errors.
pub(crate) fn map_directory_diesel_error(error: DieselError) -> IdentityDirectoryError {
    log_diesel_error(&error);

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            IdentityDirectoryError::connection(info.message().to_owned())
        }
        DieselError::DatabaseError(_, info) => {
            IdentityDirectoryError::query(info.message().to_owned())
        }
        other => IdentityDirectoryError::query(other.to_string()),
    }
}
