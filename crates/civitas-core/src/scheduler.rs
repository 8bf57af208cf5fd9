//! Per-tick action scheduling and resource contention.
//!
//! Every tick the [`ActionScheduler`] walks the active entities in a fixed
//! order and asks the [`ResourceLedger`] for each entity's demand, one
//! resource at a time. The ordering is the tie-break:
//!
//! 1. **Kind** -- citizens, then buildings, then infrastructure.
//! 2. **Id** -- ascending within a kind (creation order).
//!
//! An entity whose reservations were all granted performs its full action.
//! One denial is enough to degrade it, but the tick carries on: contention
//! is an expected outcome, not a failure.
//!
//! Grants are leases. The engine hands the previous tick's leases back to
//! [`release_leases`] before the next pass, so capacity is contested afresh
//! every tick.
//!
//! # Known limitation
//!
//! [`AllocationPolicy::FirstCome`] lets the earliest entities win scarce
//! resources every tick. It is a fairness policy, not starvation
//! avoidance. [`AllocationPolicy::RoundRobin`] moves the head of the queue
//! each tick without changing the ledger contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use civitas_entities::{Demand, EntityRegistry, RegistryError, demand_for};
use civitas_ledger::{Release, Reservation, ResourceLedger};
use civitas_types::{Entity, EntityId, EntityKind, ResourceKind, ResourceMask, Subtype};

/// Errors that can occur during a scheduling pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The registry changed underneath the pass.
    #[error("registry error during scheduling: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: RegistryError,
    },
}

/// How the fixed entity order is turned into a reservation queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Serve entities in the fixed order every tick.
    #[default]
    FirstCome,
    /// Rotate the fixed order left by `tick % len` before serving.
    RoundRobin,
}

/// Whether an entity acted at full strength this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Every reservation was granted.
    Full,
    /// At least one reservation was denied.
    Degraded,
}

/// What one entity did during a scheduling pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAction {
    /// The acting entity.
    pub entity_id: EntityId,
    /// Its subtype at the time of the pass.
    pub subtype: Subtype,
    /// Reservations that were granted, in request order.
    pub granted: Vec<Demand>,
    /// Resources that were denied.
    pub denied: ResourceMask,
    /// Full or degraded.
    pub outcome: ActionOutcome,
}

/// Denied reservations for one resource during a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortage {
    /// Number of denied reservations.
    pub denied_requests: u32,
    /// Units requested by the denied reservations.
    pub units_denied: u64,
}

/// A granted reservation that must be released before the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Holder of the grant.
    pub entity_id: EntityId,
    /// Resource reserved.
    pub resource: ResourceKind,
    /// Units reserved.
    pub amount: u64,
}

/// A lease release that found less allocated than it held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseUnderflow {
    /// Resource released.
    pub resource: ResourceKind,
    /// Units the lease held.
    pub requested: u64,
    /// Units actually released after clamping.
    pub released: u64,
}

/// Result of one scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePass {
    /// One record per scheduled entity, in service order.
    pub actions: Vec<EntityAction>,
    /// Per-resource denials. Resources with no denial are absent.
    pub shortages: BTreeMap<ResourceKind, Shortage>,
    /// Grants to hand back before the next pass.
    pub leases: Vec<Lease>,
}

impl SchedulePass {
    /// Number of entities that acted at full strength.
    pub fn performed(&self) -> u32 {
        self.count(ActionOutcome::Full)
    }

    /// Number of entities that acted in degraded mode.
    pub fn degraded(&self) -> u32 {
        self.count(ActionOutcome::Degraded)
    }

    fn count(&self, outcome: ActionOutcome) -> u32 {
        let n = self
            .actions
            .iter()
            .filter(|action| action.outcome == outcome)
            .count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }
}

/// Decides who acts each tick and in what order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionScheduler {
    policy: AllocationPolicy,
}

impl ActionScheduler {
    /// Create a scheduler with the given allocation policy.
    pub const fn new(policy: AllocationPolicy) -> Self {
        Self { policy }
    }

    /// The active allocation policy.
    pub const fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// Active entities in the order they will be served at `tick`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Registry`] if a listed id cannot be read
    /// back from the registry.
    pub fn schedule_order(
        &self,
        tick: u64,
        registry: &EntityRegistry,
    ) -> Result<Vec<Entity>, SchedulerError> {
        let mut order = Vec::with_capacity(registry.len());
        for kind in EntityKind::ALL {
            for id in registry.list_by_kind(kind) {
                let entity = registry.get(id)?;
                if entity.is_active() {
                    order.push(entity);
                }
            }
        }

        if self.policy == AllocationPolicy::RoundRobin {
            let len = u64::try_from(order.len()).unwrap_or(u64::MAX);
            let offset = tick
                .checked_rem(len)
                .and_then(|shift| usize::try_from(shift).ok())
                .unwrap_or(0);
            order.rotate_left(offset);
        }

        Ok(order)
    }

    /// Run one pass: reserve every active entity's demand in service order.
    ///
    /// The ledger should already be tagged with `tick`. Denials never fail
    /// the pass.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Registry`] if the registry is inconsistent.
    pub fn run_pass(
        &self,
        tick: u64,
        registry: &EntityRegistry,
        ledger: &mut ResourceLedger,
    ) -> Result<SchedulePass, SchedulerError> {
        let order = self.schedule_order(tick, registry)?;
        let mut pass = SchedulePass {
            actions: Vec::with_capacity(order.len()),
            ..SchedulePass::default()
        };

        for entity in order {
            let entity_id = entity.id;
            let subtype = entity.subtype;
            let mut granted = Vec::new();
            let mut denied = ResourceMask::EMPTY;

            for &(resource, amount) in demand_for(subtype, entity.state) {
                match ledger.reserve(resource, amount) {
                    Reservation::Granted { amount } => {
                        granted.push((resource, amount));
                        if amount > 0 {
                            pass.leases.push(Lease {
                                entity_id,
                                resource,
                                amount,
                            });
                        }
                    }
                    Reservation::Denied { requested, .. } => {
                        denied.insert(resource);
                        let shortage = pass.shortages.entry(resource).or_default();
                        shortage.denied_requests = shortage.denied_requests.saturating_add(1);
                        shortage.units_denied = shortage.units_denied.saturating_add(requested);
                    }
                }
            }

            let outcome = if denied.is_empty() {
                ActionOutcome::Full
            } else {
                ActionOutcome::Degraded
            };
            pass.actions.push(EntityAction {
                entity_id,
                subtype,
                granted,
                denied,
                outcome,
            });
        }

        debug!(
            tick,
            scheduled = pass.actions.len(),
            leases = pass.leases.len(),
            shortages = pass.shortages.len(),
            policy = ?self.policy,
            "Scheduling pass complete"
        );
        Ok(pass)
    }
}

/// Release every lease back to the ledger.
///
/// Returns the releases that had to be clamped. A clamp means something
/// else already released capacity this lease was holding; the ledger
/// recovers and the caller decides whether to report it.
pub fn release_leases(ledger: &mut ResourceLedger, leases: &[Lease]) -> Vec<LeaseUnderflow> {
    let mut underflows = Vec::new();
    for lease in leases {
        if let Release::Clamped {
            requested,
            released,
        } = ledger.release(lease.resource, lease.amount)
        {
            warn!(
                entity_id = %lease.entity_id,
                resource = %lease.resource,
                requested,
                released,
                "Lease release clamped"
            );
            underflows.push(LeaseUnderflow {
                resource: lease.resource,
                requested,
                released,
            });
        }
    }
    underflows
}
