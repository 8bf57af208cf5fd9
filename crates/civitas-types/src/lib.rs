//! Shared type definitions for the Civitas simulation.
//!
//! This crate is the single source of truth for the types that cross crate
//! boundaries: the registry, ledger, event bus and engine all speak in
//! these records.
//!
//! # Modules
//!
//! - [`ids`] -- Opaque entity handles and run identifiers
//! - [`enums`] -- Entity taxonomy, resource kinds, event kinds
//! - [`structs`] -- Entity, pool, event, ledger and snapshot records

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{
    BuildingType, CitizenType, EntityKind, EntityState, EventKind, InfrastructureType,
    LedgerEntryType, ResourceKind, Subtype,
};
pub use ids::{EntityId, RunId};
pub use structs::{
    Entity, Event, EventPayload, LedgerEntry, NewEvent, ResourceMask, ResourcePool,
    SNAPSHOT_VERSION, SimulationSnapshot,
};
