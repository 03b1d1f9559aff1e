//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `migrations/` exactly. The permission tables
//! have no surrogate primary key; their unique constraints are declared as
//! composite keys here so Diesel can address single rows.

diesel::table! {
    /// User-centric permission projection.
    user_permissions (user_id, permission, object_type) {
        user_id -> Int4,
        permission -> Text,
        object_type -> Text,
        /// Sorted, duplicate-free repository IDs.
        object_ids_ints -> Array<Int4>,
        updated_at -> Timestamptz,
        /// `NULL` until the first user-centric full write.
        synced_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    /// Repository-centric permission projection.
    repo_permissions (repo_id, permission) {
        repo_id -> Int4,
        permission -> Text,
        /// Sorted, duplicate-free user IDs.
        user_ids_ints -> Array<Int4>,
        updated_at -> Timestamptz,
        synced_at -> Nullable<Timestamptz>,
        unrestricted -> Bool,
    }
}

diesel::table! {
    /// Pending grants keyed by external identity.
    user_pending_permissions (id) {
        id -> Int8,
        service_type -> Text,
        service_id -> Text,
        bind_id -> Text,
        permission -> Text,
        object_type -> Text,
        object_ids_ints -> Array<Int4>,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Pending mirror keyed by repository.
    repo_pending_permissions (repo_id, permission) {
        repo_id -> Int4,
        permission -> Text,
        /// Surrogate IDs from `user_pending_permissions.id`.
        user_ids_ints -> Array<Int8>,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Platform users.
    users (id) {
        id -> Int4,
        username -> Text,
        site_admin -> Bool,
        created_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    /// Email addresses claimed by users.
    user_emails (user_id, email) {
        user_id -> Int4,
        email -> Text,
        verified_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Code host accounts linked to users.
    user_external_accounts (id) {
        id -> Int4,
        user_id -> Int4,
        service_type -> Text,
        service_id -> Text,
        account_id -> Text,
        client_id -> Text,
        created_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(user_emails -> users (user_id));
diesel::joinable!(user_external_accounts -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    repo_pending_permissions,
    repo_permissions,
    user_emails,
    user_external_accounts,
    user_pending_permissions,
    user_permissions,
    users,
);
