//! Mirrored user/repository permission store for a code search platform.
//!
//! - [`domain`]: permission records, set diff, write paging, the
//!   authorisation facade and the ports it depends on.
//! - [`outbound`]: Diesel/PostgreSQL adapters for those ports.
//! - [`config`]: layered settings.

pub mod config;
pub mod domain;
pub mod outbound;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
