//! Site-wide choice of which platform identity pending grants bind to.

use std::fmt;
use std::str::FromStr;

use super::ports::UserIdentities;
use super::{PermType, Perms, UserPendingPermissionsKey};

/// Service type of identities issued by the platform itself.
pub const PLATFORM_SERVICE_TYPE: &str = "sourcegraph";

/// Service ID of identities issued by the platform itself.
pub const PLATFORM_SERVICE_ID: &str = "https://sourcegraph.com/";

/// Error returned for an unrecognised policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised bind ID policy: {0}")]
pub struct UnknownBindIdPolicy(pub String);

/// Which platform identity pending grants are bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindIdPolicy {
    /// Bind to verified email addresses.
    Email,
    /// Bind to the platform username.
    Username,
}

impl BindIdPolicy {
    /// Configuration value of the policy.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Username => "username",
        }
    }

    /// Pending-permission keys for every identity `identities` holds.
    ///
    /// Code host accounts are always included. Platform identities follow
    /// the policy; unverified emails are never bound.
    pub fn pending_keys(
        self,
        identities: &UserIdentities,
        perm: Perms,
        kind: PermType,
    ) -> Vec<UserPendingPermissionsKey> {
        let platform_ids: Vec<&str> = match self {
            Self::Email => identities
                .verified_emails
                .iter()
                .map(String::as_str)
                .collect(),
            Self::Username => vec![identities.username.as_str()],
        };

        let platform = platform_ids
            .into_iter()
            .map(|bind_id| (PLATFORM_SERVICE_TYPE, PLATFORM_SERVICE_ID, bind_id));
        let external = identities.external_accounts.iter().flat_map(|accounts| {
            accounts.account_ids.iter().map(|account_id| {
                (
                    accounts.service_type.as_str(),
                    accounts.service_id.as_str(),
                    account_id.as_str(),
                )
            })
        });

        platform
            .chain(external)
            .map(|(service_type, service_id, bind_id)| {
                UserPendingPermissionsKey::new(service_type, service_id, bind_id)
                    .with_scope(perm, kind)
            })
            .collect()
    }
}

impl fmt::Display for BindIdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindIdPolicy {
    type Err = UnknownBindIdPolicy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "email" => Ok(Self::Email),
            "username" => Ok(Self::Username),
            other => Err(UnknownBindIdPolicy(other.to_owned())),
        }
    }
}
