//! Entity registry and per-subtype behaviour tables for the Civitas
//! simulation.
//!
//! This crate owns the entity taxonomy's logic layer: creating and
//! destroying entities, and the pure lookups that say what each subtype
//! needs from the city and what it does.
//!
//! # Modules
//!
//! - [`registry`] -- Creation, lookup, and destruction ([`EntityRegistry`])
//! - [`demand`] -- Per-tick resource demand by subtype and state
//! - [`catalog`] -- Human-readable action lines by subtype
//! - [`error`] -- Error types for registry operations ([`RegistryError`])

pub mod catalog;
pub mod demand;
pub mod error;
pub mod registry;

// Re-export primary types at crate root for convenience.
pub use catalog::{action_line, degraded_line};
pub use demand::{Demand, base_demand, demand_for};
pub use error::RegistryError;
pub use registry::EntityRegistry;
