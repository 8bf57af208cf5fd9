//! Shared resource accounting for the Civitas simulation.
//!
//! Every finite city resource (power, water, jobs, housing) is a
//! [`ResourcePool`] owned by the [`ResourceLedger`]. Pools are only mutated
//! through two atomic operations:
//!
//! - **reserve** -- check-and-increment. Either the full amount fits under
//!   capacity and is granted, or nothing changes and the request is denied.
//!   There are no partial grants.
//! - **release** -- decrement, clamped at zero. Releasing more than is
//!   allocated is an underflow; it is recovered by clamping and reported in
//!   the return value rather than as an error.
//!
//! Every mutation is also appended to a reservation log, so the
//! [`conservation`] check can prove at the end of a tick that the pools
//! agree with the history that produced them.
//!
//! # Concurrency
//!
//! The ledger takes `&mut self` and holds no locks. The engine runs each tick
//! phase with a single writer, so none are needed.
//!
//! # Usage
//!
//! ```
//! use civitas_ledger::{Release, Reservation, ResourceLedger};
//! use civitas_types::ResourceKind;
//!
//! let mut ledger = ResourceLedger::with_capacities([(ResourceKind::Power, 10)]);
//!
//! assert!(ledger.reserve(ResourceKind::Power, 7).is_granted());
//! assert!(!ledger.reserve(ResourceKind::Power, 4).is_granted());
//!
//! let release = ledger.release(ResourceKind::Power, 9);
//! assert!(release.is_underflow());
//! assert_eq!(ledger.allocated(ResourceKind::Power), 0);
//! ```
//!
//! [`ResourcePool`]: civitas_types::ResourcePool

pub mod conservation;
pub mod ledger;

// Re-export primary types at crate root.
pub use conservation::ConservationResult;
pub use ledger::{LedgerCheckpoint, Release, Reservation, ResourceLedger};

use std::collections::BTreeMap;

use civitas_types::ResourceKind;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when reconfiguring the ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// A capacity change would leave `allocated > capacity`.
    #[error(
        "cannot set {resource} capacity to {capacity}: {allocated} units are allocated"
    )]
    CapacityBelowAllocation {
        /// The resource being resized.
        resource: ResourceKind,
        /// The requested capacity.
        capacity: u64,
        /// Units currently allocated.
        allocated: u64,
    },
}

// ---------------------------------------------------------------------------
// Anomaly type
// ---------------------------------------------------------------------------

/// A disagreement between the pools and the reservation log.
///
/// Produced by the conservation check. The engine treats this as an
/// internal invariant violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAnomaly {
    /// The tick at which the check ran.
    pub tick: u64,
    /// Per-resource mismatch: (`allocated` in the pool, net allocation
    /// replayed from the log).
    pub imbalances: BTreeMap<ResourceKind, (u64, u64)>,
    /// Resources whose allocation exceeds capacity.
    pub over_capacity: Vec<ResourceKind>,
    /// Human-readable description of the anomaly.
    pub message: String,
}

impl core::fmt::Display for LedgerAnomaly {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.message)
    }
}
