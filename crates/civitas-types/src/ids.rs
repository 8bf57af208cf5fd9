//! Type-safe identifier wrappers.
//!
//! Entity identifiers are opaque handles issued by the entity registry.
//! They wrap a `u64` that is handed out sequentially, so ascending id order
//! is creation order. That ordering is what the scheduler iterates in.
//!
//! Run identifiers wrap a random [`Uuid`] and tag snapshots and logs of a
//! single simulation run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around a sequential `u64` handle.
macro_rules! define_handle {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw handle value.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Return the raw handle value.
            pub const fn into_inner(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

define_handle! {
    /// Unique identifier for a citizen, building, or infrastructure entity.
    ///
    /// Never reused within a run, even after the entity is destroyed.
    EntityId
}

/// Unique identifier for one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new random run identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
