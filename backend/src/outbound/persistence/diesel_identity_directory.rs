//! PostgreSQL-backed identity directory.
//!
//! Reads the platform's `users`, `user_emails` and `user_external_accounts`
//! tables to list the identities pending grants may be bound to.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{IdentityDirectory, IdentityDirectoryError, UserIdentities};
use crate::domain::{Accounts, UserId};

use super::error_mapping::{map_directory_diesel_error, map_directory_pool_error};
use super::pool::DbPool;
use super::schema::{user_emails, user_external_accounts, users};

/// Diesel-backed implementation of [`IdentityDirectory`].
#[derive(Clone)]
pub struct DieselIdentityDirectory {
    pool: DbPool,
}

impl DieselIdentityDirectory {
    /// Create a directory reading through `pool`.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Group `(service_type, service_id, account_id)` rows sorted by namespace.
fn group_accounts(rows: Vec<(String, String, String)>) -> Vec<Accounts> {
    let mut grouped: Vec<Accounts> = Vec::new();
    for (service_type, service_id, account_id) in rows {
        match grouped.last_mut() {
            Some(last) if last.service_type == service_type && last.service_id == service_id => {
                last.account_ids.push(account_id);
            }
            _ => grouped.push(Accounts::new(service_type, service_id, [account_id])),
        }
    }
    grouped
}

#[async_trait]
impl IdentityDirectory for DieselIdentityDirectory {
    async fn user_identities(
        &self,
        user_id: UserId,
    ) -> Result<UserIdentities, IdentityDirectoryError> {
        let mut conn = self.pool.get().await.map_err(map_directory_pool_error)?;

        let username: String = users::table
            .filter(users::id.eq(user_id.get()))
            .filter(users::deleted_at.is_null())
            .select(users::username)
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_directory_diesel_error)?
            .ok_or(IdentityDirectoryError::UserNotFound { user_id })?;

        let verified_emails: Vec<String> = user_emails::table
            .filter(user_emails::user_id.eq(user_id.get()))
            .filter(user_emails::verified_at.is_not_null())
            .select(user_emails::email)
            .order(user_emails::email)
            .load(&mut conn)
            .await
            .map_err(map_directory_diesel_error)?;

        let account_rows: Vec<(String, String, String)> = user_external_accounts::table
            .filter(user_external_accounts::user_id.eq(user_id.get()))
            .filter(user_external_accounts::deleted_at.is_null())
            .select((
                user_external_accounts::service_type,
                user_external_accounts::service_id,
                user_external_accounts::account_id,
            ))
            .order((
                user_external_accounts::service_type,
                user_external_accounts::service_id,
                user_external_accounts::account_id,
            ))
            .load(&mut conn)
            .await
            .map_err(map_directory_diesel_error)?;

        Ok(UserIdentities {
            user_id,
            username,
            verified_emails,
            external_accounts: group_accounts(account_rows),
        })
    }
}
