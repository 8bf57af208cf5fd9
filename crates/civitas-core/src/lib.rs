//! Core simulation engine for the Civitas city simulation.
//!
//! This crate drives the tick loop. It owns the clock, schedules entity
//! actions against the shared resource ledger, publishes outcomes to the
//! event bus, and exposes the engine's command surface to collaborators.
//!
//! # Modules
//!
//! - [`clock`] -- Discrete tick counter with a terminal halted state
//! - [`config`] -- YAML configuration loading
//! - [`scheduler`] -- Deterministic ordering and resource contention
//! - [`hooks`] -- Sinks and observers called once per tick
//! - [`tick`] -- The 6-phase tick cycle with rollback
//! - [`engine`] -- Lifecycle state machine and command surface

pub mod clock;
pub mod config;
pub mod engine;
pub mod hooks;
pub mod scheduler;
pub mod tick;

pub use clock::{ClockError, SimulationClock};
pub use config::{ConfigError, SimulationConfig};
pub use engine::{EngineError, EngineStatus, RunReport, SimulationEngine};
pub use hooks::{HookControl, SinkError, TickObserver, TickSink};
pub use scheduler::{ActionOutcome, ActionScheduler, AllocationPolicy, EntityAction, Shortage};
pub use tick::TickSummary;
