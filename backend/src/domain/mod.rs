//! Domain primitives, services and ports.
//!
//! Purpose: model the two mirrored permission projections and their pending
//! counterparts independently of storage. Pure algorithms (set diff, write
//! paging) live here alongside the authorisation facade; persistence is
//! reached only through the traits in [`ports`].
//!
//! Public surface:
//! - `UserId`, `RepoId`, `PendingUserId`: integer identifiers.
//! - `UserPermissions`, `RepoPermissions` and their pending variants.
//! - `compute_diff` / `SetDiff`: sorted symmetric difference.
//! - `BatchPlanner`: pages mirror writes under a parameter ceiling.
//! - `AuthzService`: grant, filter and revoke entry points.

pub mod authz_service;
pub mod batch;
pub mod bind_policy;
pub mod ids;
pub mod permissions;
pub mod ports;
pub mod set_diff;

pub use self::authz_service::{
    AuthorizedReposArgs, AuthzError, AuthzService, GrantPendingPermissionsArgs, RepoCandidate,
    RevokeUserPermissionsArgs,
};
pub use self::batch::{
    BatchPlanner, DEFAULT_MAX_BIND_PARAMETERS, MIRROR_STATEMENT_PARAMETERS, Page, Pages,
    REPO_ROW_PARAMETERS, USER_ROW_PARAMETERS,
};
pub use self::bind_policy::{
    BindIdPolicy, PLATFORM_SERVICE_ID, PLATFORM_SERVICE_TYPE, UnknownBindIdPolicy,
};
pub use self::ids::{PendingUserId, RepoId, UserId};
pub use self::permissions::{
    Accounts, PendingBindings, PermType, Perms, PermsMetrics, RepoPendingPermissions,
    RepoPermissions, UnknownValueError, UserPendingPermissions, UserPendingPermissionsKey,
    UserPermissions,
};
pub use self::set_diff::{SetDiff, compute_diff};
