//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod identity_directory;
mod pending_perms_repository;
mod perms_repository;
mod perms_scheduling_query;

#[cfg(test)]
pub use identity_directory::MockIdentityDirectory;
pub use identity_directory::{
    FixtureIdentityDirectory, IdentityDirectory, IdentityDirectoryError, UserIdentities,
};
#[cfg(test)]
pub use pending_perms_repository::MockPendingPermsRepository;
pub use pending_perms_repository::PendingPermsRepository;
#[cfg(test)]
pub use perms_repository::MockPermsRepository;
pub use perms_repository::{PermsRepository, PermsStoreError};
pub use perms_scheduling_query::{PermsSchedulingQuery, SyncStamp};
