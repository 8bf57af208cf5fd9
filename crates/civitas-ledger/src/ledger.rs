//! The resource ledger: pools plus an append-only reservation log.
//!
//! # Design
//!
//! - **Atomic**: `reserve` grants the whole amount or nothing.
//! - **Bounded**: `0 <= allocated <= capacity` holds after every call.
//! - **Append-only log**: every grant and release is recorded with the
//!   current tick; entries are never modified.
//! - **Settled on tick change**: moving to a new tick folds the previous
//!   tick's entries into a per-resource settled total, so the log holds one
//!   tick of history and the conservation check replays only that tick.
//! - **Checkpointable**: a checkpoint is the pools, the settled totals, and
//!   the current tick's entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use civitas_types::{LedgerEntry, LedgerEntryType, ResourceKind, ResourcePool};

use crate::LedgerError;
use crate::conservation::{ConservationResult, verify_conservation};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Outcome of [`ResourceLedger::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reservation {
    /// The full amount was reserved.
    Granted {
        /// Units reserved.
        amount: u64,
    },
    /// Nothing was reserved.
    Denied {
        /// Units requested.
        requested: u64,
        /// Units that were free at the time of the request.
        available: u64,
    },
}

impl Reservation {
    /// Whether the reservation was granted.
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// Outcome of [`ResourceLedger::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Release {
    /// The full amount was released.
    Released {
        /// Units released.
        amount: u64,
    },
    /// More was requested than was allocated; the allocation was clamped
    /// to zero.
    Clamped {
        /// Units the caller asked to release.
        requested: u64,
        /// Units actually released (the previous allocation).
        released: u64,
    },
}

impl Release {
    /// Whether the release underflowed and was clamped.
    pub const fn is_underflow(&self) -> bool {
        matches!(self, Self::Clamped { .. })
    }

    /// Units actually returned to the pool.
    pub const fn released(&self) -> u64 {
        match self {
            Self::Released { amount } => *amount,
            Self::Clamped { released, .. } => *released,
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Saved ledger state for rolling back a failed tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCheckpoint {
    pools: BTreeMap<ResourceKind, ResourcePool>,
    settled: BTreeMap<ResourceKind, u64>,
    entries: Vec<LedgerEntry>,
    tick: u64,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Owner of every [`ResourcePool`] in the simulation.
///
/// A pool exists for every [`ResourceKind`]; kinds that were not given a
/// capacity have capacity zero, so every reservation against them is
/// denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLedger {
    /// One pool per resource kind.
    pools: BTreeMap<ResourceKind, ResourcePool>,
    /// Net allocation from every tick before `tick`.
    settled: BTreeMap<ResourceKind, u64>,
    /// Reservation log for `tick`, in insertion order.
    entries: Vec<LedgerEntry>,
    /// Tick stamped onto new entries.
    tick: u64,
}

impl Default for ResourceLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLedger {
    /// Create a ledger where every pool has capacity zero.
    pub fn new() -> Self {
        let pools = ResourceKind::ALL
            .into_iter()
            .map(|resource| (resource, ResourcePool::new(resource, 0)))
            .collect();
        Self {
            pools,
            settled: BTreeMap::new(),
            entries: Vec::new(),
            tick: 0,
        }
    }

    /// Create a ledger with the given capacities. Unlisted kinds get zero.
    pub fn with_capacities<I>(capacities: I) -> Self
    where
        I: IntoIterator<Item = (ResourceKind, u64)>,
    {
        let mut ledger = Self::new();
        for (resource, capacity) in capacities {
            ledger
                .pools
                .insert(resource, ResourcePool::new(resource, capacity));
        }
        ledger
    }

    /// Set the tick stamped onto subsequent log entries.
    ///
    /// Moving to a different tick settles the entries of the previous one.
    pub fn set_tick(&mut self, tick: u64) {
        if tick != self.tick {
            self.settle();
        }
        self.tick = tick;
    }

    /// Fold the logged entries into the settled totals and clear the log.
    fn settle(&mut self) {
        for entry in self.entries.drain(..) {
            let net = self.settled.entry(entry.resource).or_insert(0);
            *net = match entry.entry_type {
                LedgerEntryType::Reserve => net.saturating_add(entry.amount),
                LedgerEntryType::Release => net.saturating_sub(entry.amount),
            };
        }
        self.settled.retain(|_, net| *net > 0);
    }

    /// Atomically reserve `amount` units of `resource`.
    ///
    /// Denied when `allocated + amount > capacity`; a denied request leaves
    /// the pool untouched. Reserving zero units is always granted and is
    /// not logged.
    pub fn reserve(&mut self, resource: ResourceKind, amount: u64) -> Reservation {
        if amount == 0 {
            return Reservation::Granted { amount };
        }

        let Some(pool) = self.pools.get_mut(&resource) else {
            return Reservation::Denied {
                requested: amount,
                available: 0,
            };
        };

        let available = pool.available();
        let fits = pool
            .allocated
            .checked_add(amount)
            .filter(|total| *total <= pool.capacity);

        match fits {
            Some(total) => {
                pool.allocated = total;
                self.entries.push(LedgerEntry {
                    tick: self.tick,
                    resource,
                    entry_type: LedgerEntryType::Reserve,
                    amount,
                });
                Reservation::Granted { amount }
            }
            None => {
                debug!(
                    tick = self.tick,
                    %resource,
                    requested = amount,
                    available,
                    "Reservation denied"
                );
                Reservation::Denied {
                    requested: amount,
                    available,
                }
            }
        }
    }

    /// Release `amount` units of `resource`.
    ///
    /// Releasing more than is allocated clamps the allocation to zero and
    /// returns [`Release::Clamped`]; the caller decides whether to surface
    /// it further.
    pub fn release(&mut self, resource: ResourceKind, amount: u64) -> Release {
        let Some(pool) = self.pools.get_mut(&resource) else {
            return Release::Clamped {
                requested: amount,
                released: 0,
            };
        };

        let outcome = match pool.allocated.checked_sub(amount) {
            Some(remaining) => {
                pool.allocated = remaining;
                Release::Released { amount }
            }
            None => {
                let released = pool.allocated;
                pool.allocated = 0;
                warn!(
                    tick = self.tick,
                    %resource,
                    requested = amount,
                    released,
                    "Release underflow, allocation clamped to zero"
                );
                Release::Clamped {
                    requested: amount,
                    released,
                }
            }
        };

        let moved = outcome.released();
        if moved > 0 {
            self.entries.push(LedgerEntry {
                tick: self.tick,
                resource,
                entry_type: LedgerEntryType::Release,
                amount: moved,
            });
        }

        outcome
    }

    /// Total capacity of `resource`.
    pub fn capacity_of(&self, resource: ResourceKind) -> u64 {
        self.pools.get(&resource).map_or(0, |pool| pool.capacity)
    }

    /// Units of `resource` currently allocated.
    pub fn allocated(&self, resource: ResourceKind) -> u64 {
        self.pools.get(&resource).map_or(0, |pool| pool.allocated)
    }

    /// Units of `resource` currently free.
    pub fn available(&self, resource: ResourceKind) -> u64 {
        self.pools.get(&resource).map_or(0, ResourcePool::available)
    }

    /// Copy of the pool for `resource`.
    pub fn pool(&self, resource: ResourceKind) -> ResourcePool {
        self.pools
            .get(&resource)
            .copied()
            .unwrap_or_else(|| ResourcePool::new(resource, 0))
    }

    /// Copies of every pool, in [`ResourceKind::ALL`] order.
    pub fn pools(&self) -> Vec<ResourcePool> {
        self.pools.values().copied().collect()
    }

    /// Change the capacity of `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::CapacityBelowAllocation`] if the new capacity
    /// is smaller than what is currently allocated.
    pub fn set_capacity(
        &mut self,
        resource: ResourceKind,
        capacity: u64,
    ) -> Result<(), LedgerError> {
        let pool = self
            .pools
            .entry(resource)
            .or_insert_with(|| ResourcePool::new(resource, 0));
        if capacity < pool.allocated {
            return Err(LedgerError::CapacityBelowAllocation {
                resource,
                capacity,
                allocated: pool.allocated,
            });
        }
        pool.capacity = capacity;
        Ok(())
    }

    /// The current tick's reservation log, in insertion order.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Net allocation of `resource` settled from earlier ticks.
    pub fn settled(&self, resource: ResourceKind) -> u64 {
        self.settled.get(&resource).copied().unwrap_or(0)
    }

    /// Check that the pools agree with the settled totals plus the current
    /// tick's log.
    pub fn verify_conservation(&self) -> ConservationResult {
        verify_conservation(self.tick, &self.pools, &self.settled, &self.entries)
    }

    /// Capture the current state for a later [`restore`](Self::restore).
    pub fn checkpoint(&self) -> LedgerCheckpoint {
        LedgerCheckpoint {
            pools: self.pools.clone(),
            settled: self.settled.clone(),
            entries: self.entries.clone(),
            tick: self.tick,
        }
    }

    /// Roll back to a checkpoint taken from this ledger.
    pub fn restore(&mut self, checkpoint: LedgerCheckpoint) {
        self.pools = checkpoint.pools;
        self.settled = checkpoint.settled;
        self.entries = checkpoint.entries;
        self.tick = checkpoint.tick;
    }
}
