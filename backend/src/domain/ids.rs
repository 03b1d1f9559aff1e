//! Integer identifiers used by the permission projections.
//!
//! User and repository identifiers mirror the platform's `int4` primary keys.
//! Pending identities are referenced through a surrogate `int8` key that is
//! assigned the first time a bind ID is seen and never reused.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Wrap a raw storage identifier.
            pub const fn new(raw: $inner) -> Self {
                Self(raw)
            }

            /// Access the raw storage identifier.
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            fn from(raw: $inner) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id! {
    /// Platform user identifier.
    UserId(i32)
}

define_id! {
    /// Repository identifier.
    RepoId(i32)
}

define_id! {
    /// Surrogate key of a pending-permissions row.
    PendingUserId(i64)
}
