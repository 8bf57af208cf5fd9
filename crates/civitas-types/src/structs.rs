//! Core record types: entities, resource pools, events, ledger entries, and
//! the exported simulation snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{EntityKind, EntityState, EventKind, LedgerEntryType, ResourceKind, Subtype};
use crate::ids::{EntityId, RunId};

/// Version tag carried by every [`SimulationSnapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Snapshot of a single entity.
///
/// The registry owns the live record; everything outside it holds only
/// copies of this struct or the [`EntityId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier.
    pub id: EntityId,
    /// Kind, always equal to `subtype.kind()`.
    pub kind: EntityKind,
    /// Concrete subtype.
    pub subtype: Subtype,
    /// Lifecycle state.
    pub state: EntityState,
}

impl Entity {
    /// Whether the scheduler should consider this entity.
    pub fn is_active(&self) -> bool {
        self.state == EntityState::Active
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A finite shared resource and how much of it is currently allocated.
///
/// Invariant: `allocated <= capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourcePool {
    /// Which resource this pool tracks.
    pub resource: ResourceKind,
    /// Total units available.
    pub capacity: u64,
    /// Units currently reserved.
    pub allocated: u64,
}

impl ResourcePool {
    /// An empty pool with the given capacity.
    pub const fn new(resource: ResourceKind, capacity: u64) -> Self {
        Self {
            resource,
            capacity,
            allocated: 0,
        }
    }

    /// Units still free.
    pub const fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.allocated)
    }
}

/// A compact set of [`ResourceKind`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceMask(u8);

impl ResourceMask {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Add a resource to the set.
    pub const fn insert(&mut self, resource: ResourceKind) {
        self.0 |= resource.bit();
    }

    /// Whether the set contains `resource`.
    pub const fn contains(self, resource: ResourceKind) -> bool {
        self.0 & resource.bit() != 0
    }

    /// Whether the set is empty.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the members in [`ResourceKind::ALL`] order.
    pub fn iter(self) -> impl Iterator<Item = ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(move |resource| self.contains(*resource))
    }
}

impl FromIterator<ResourceKind> for ResourceMask {
    fn from_iter<I: IntoIterator<Item = ResourceKind>>(iter: I) -> Self {
        let mut mask = Self::EMPTY;
        for resource in iter {
            mask.insert(resource);
        }
        mask
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// One append-only record of a reservation or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Tick during which the mutation happened (0 = before the first tick).
    pub tick: u64,
    /// Resource mutated.
    pub resource: ResourceKind,
    /// Direction.
    pub entry_type: LedgerEntryType,
    /// Units actually moved (after clamping, for releases).
    pub amount: u64,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Fixed-size payload of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// An entity entered the registry.
    EntityCreated {
        /// Subtype of the new entity.
        subtype: Subtype,
    },
    /// An entity changed lifecycle state.
    EntityStateChanged {
        /// Previous state.
        from: EntityState,
        /// New state.
        to: EntityState,
    },
    /// An entity left the registry.
    EntityDestroyed {
        /// Subtype of the destroyed entity.
        subtype: Subtype,
    },
    /// Full action with every reservation granted.
    ActionPerformed {
        /// Subtype of the acting entity.
        subtype: Subtype,
    },
    /// Reduced action because at least one reservation was denied.
    ActionDegraded {
        /// Subtype of the acting entity.
        subtype: Subtype,
        /// Resources that were denied.
        denied: ResourceMask,
    },
    /// One or more reservations for a resource were denied this tick.
    ResourceShortage {
        /// The scarce resource.
        resource: ResourceKind,
        /// Number of denied reservations.
        denied_requests: u32,
        /// Total units requested by the denied reservations.
        units_denied: u64,
    },
    /// A release exceeded the allocation and was clamped to zero.
    ReleaseUnderflow {
        /// Resource released.
        resource: ResourceKind,
        /// Units the caller asked to release.
        requested: u64,
        /// Units actually released.
        released: u64,
    },
    /// A tick committed.
    TickCompleted {
        /// Entities that acted at full strength.
        performed: u32,
        /// Entities that acted in degraded mode.
        degraded: u32,
    },
}

impl EventPayload {
    /// The subscription category of this payload.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::EntityCreated { .. } => EventKind::EntityCreated,
            Self::EntityStateChanged { .. } => EventKind::EntityStateChanged,
            Self::EntityDestroyed { .. } => EventKind::EntityDestroyed,
            Self::ActionPerformed { .. } => EventKind::ActionPerformed,
            Self::ActionDegraded { .. } => EventKind::ActionDegraded,
            Self::ResourceShortage { .. } => EventKind::ResourceShortage,
            Self::ReleaseUnderflow { .. } => EventKind::ReleaseUnderflow,
            Self::TickCompleted { .. } => EventKind::TickCompleted,
        }
    }
}

/// An event before the bus has assigned it a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NewEvent {
    /// Tick during which the event happened.
    pub tick: u64,
    /// Entity the event is about, if any.
    pub source: Option<EntityId>,
    /// What happened.
    pub payload: EventPayload,
}

/// A published, immutable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// Position in the run's event log. Strictly increasing, gap-free.
    pub sequence: u64,
    /// Tick during which the event happened.
    pub tick: u64,
    /// Entity the event is about, if any.
    pub source: Option<EntityId>,
    /// Subscription category (always `payload.kind()`).
    pub kind: EventKind,
    /// What happened.
    pub payload: EventPayload,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Versioned export of the simulation state for external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    /// Always [`SNAPSHOT_VERSION`] when produced by this crate.
    pub version: u32,
    /// The run this snapshot belongs to.
    pub run_id: RunId,
    /// Last committed tick.
    pub tick: u64,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Utc>,
    /// Live entities in ascending id order.
    pub entities: Vec<Entity>,
    /// Every resource pool in [`ResourceKind::ALL`] order.
    pub resource_pools: Vec<ResourcePool>,
}
