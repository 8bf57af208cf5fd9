//! Conservation check for the resource ledger.
//!
//! Starting from the settled allocation carried in from earlier ticks,
//! replaying the current tick's log entries must reproduce the allocation
//! of every pool:
//!
//! ```text
//! allocated(R) == settled(R) + sum(reserve for R) - sum(release for R)
//! ```
//!
//! with the replayed allocation never going negative, and no pool may hold
//! more than its capacity. Reserve and release keep this
//! true by construction; the check catches anything that mutates a pool
//! without going through them.
//!
//! Only the current tick is replayed, so the cost of a check does not grow
//! with the length of the run.

use std::collections::{BTreeMap, BTreeSet};

use civitas_types::{LedgerEntry, LedgerEntryType, ResourceKind, ResourcePool};

use crate::LedgerAnomaly;

/// The result of a conservation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConservationResult {
    /// Pools and log agree.
    Balanced,
    /// At least one pool disagrees with the log or exceeds its capacity.
    Anomaly(LedgerAnomaly),
}

impl ConservationResult {
    /// Whether the ledger balanced.
    pub const fn is_balanced(&self) -> bool {
        matches!(self, Self::Balanced)
    }
}

/// Verify `pools` against `settled` plus the current tick's `entries`.
///
/// `tick` only labels the anomaly.
pub fn verify_conservation(
    tick: u64,
    pools: &BTreeMap<ResourceKind, ResourcePool>,
    settled: &BTreeMap<ResourceKind, u64>,
    entries: &[LedgerEntry],
) -> ConservationResult {
    let mut replayed = settled.clone();
    let mut broken: BTreeSet<ResourceKind> = BTreeSet::new();

    for entry in entries {
        let running = replayed.entry(entry.resource).or_insert(0);
        let next = match entry.entry_type {
            LedgerEntryType::Reserve => running.checked_add(entry.amount),
            LedgerEntryType::Release => running.checked_sub(entry.amount),
        };
        match next {
            Some(value) => *running = value,
            None => {
                broken.insert(entry.resource);
                *running = 0;
            }
        }
    }

    let mut imbalances = BTreeMap::new();
    let mut over_capacity = Vec::new();

    for (resource, pool) in pools {
        let net = replayed.get(resource).copied().unwrap_or(0);
        if net != pool.allocated || broken.contains(resource) {
            imbalances.insert(*resource, (pool.allocated, net));
        }
        if pool.allocated > pool.capacity {
            over_capacity.push(*resource);
        }
    }

    // Log entries for a resource with no pool at all.
    for (resource, net) in &replayed {
        if !pools.contains_key(resource) && *net != 0 {
            imbalances.insert(*resource, (0, *net));
        }
    }

    if imbalances.is_empty() && over_capacity.is_empty() {
        return ConservationResult::Balanced;
    }

    let message = format!(
        "LEDGER_ANOMALY at tick {tick}: {} imbalanced pool(s), {} over capacity",
        imbalances.len(),
        over_capacity.len()
    );
    ConservationResult::Anomaly(LedgerAnomaly {
        tick,
        imbalances,
        over_capacity,
        message,
    })
}
