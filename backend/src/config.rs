//! Permission store settings loaded via OrthoConfig.
//!
//! Values layer defaults, an optional config file, `PERMS_*` environment
//! variables and CLI flags.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::DEFAULT_MAX_BIND_PARAMETERS;
use crate::outbound::persistence::PermsStoreOptions;

const DEFAULT_BIND_ID: &str = "email";
const DEFAULT_STALE_AFTER_SECS: u64 = 24 * 60 * 60;

/// Configuration for the permission store and authorisation facade.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "PERMS")]
pub struct PermsSettings {
    /// PostgreSQL connection URL.
    pub database_url: Option<String>,
    /// Platform identity pending grants bind to: `email` or `username`.
    pub bind_id: Option<String>,
    /// Bind parameters a single write statement may use.
    pub max_bind_parameters: Option<usize>,
    /// Treat site administrators like other users when listing users
    /// without permissions.
    #[ortho_config(default = false)]
    pub enforce_for_site_admins: bool,
    /// Age after which permissions count as stale in metrics.
    pub stale_after_secs: Option<u64>,
    /// Apply pending schema migrations before running.
    #[ortho_config(default = false)]
    pub run_migrations: bool,
}

impl PermsSettings {
    /// Configured bind-ID policy name, defaulting to `email`.
    ///
    /// The value is validated by the facade at grant time.
    pub fn bind_id(&self) -> &str {
        self.bind_id.as_deref().unwrap_or(DEFAULT_BIND_ID)
    }

    /// Configured parameter ceiling, defaulting to the store default.
    pub fn max_bind_parameters(&self) -> usize {
        self.max_bind_parameters
            .unwrap_or(DEFAULT_MAX_BIND_PARAMETERS)
    }

    /// Staleness threshold for metrics.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs.unwrap_or(DEFAULT_STALE_AFTER_SECS))
    }

    /// Options for the Diesel permission store.
    pub fn store_options(&self) -> PermsStoreOptions {
        PermsStoreOptions::default()
            .with_max_bind_parameters(self.max_bind_parameters())
            .with_enforce_for_site_admins(self.enforce_for_site_admins)
    }
}
