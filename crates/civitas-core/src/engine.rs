//! The simulation engine: lifecycle, command surface, and tick guard.
//!
//! [`SimulationEngine`] composes the clock, registry, ledger, scheduler,
//! and event bus behind one mutex and exposes the commands collaborators
//! use to drive a run:
//!
//! ```text
//! Initialized --start--> Running --pause--> Paused
//!                          ^  |               |
//!                          |  +---resume------+
//!                          |
//!               any state --stop--> Stopped (terminal)
//! ```
//!
//! # Concurrency
//!
//! The engine is `Send + Sync`. Ticks never overlap: [`step`] claims an
//! atomic tick-in-progress flag before it takes the mutex, so a second
//! caller fails with [`EngineError::ConcurrentTick`] at once instead of
//! queueing behind the first. The overlap is recorded and the engine is
//! stopped as soon as the running tick has committed; the running tick
//! itself completes and reports normally.
//!
//! Hooks run with the engine locked. A hook must not call back into the
//! engine.
//!
//! [`step`]: SimulationEngine::step

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use civitas_entities::{EntityRegistry, RegistryError};
use civitas_events::{EventBus, Subscription};
use civitas_ledger::{LedgerError, ResourceLedger};
use civitas_types::{
    Entity, EntityId, EntityKind, EntityState, Event, EventKind, EventPayload, NewEvent,
    ResourceKind, ResourcePool, RunId, SNAPSHOT_VERSION, SimulationSnapshot, Subtype,
};

use crate::clock::{ClockError, SimulationClock};
use crate::config::{ConfigError, SimulationConfig};
use crate::hooks::{HookControl, TickHooks, TickObserver, TickSink};
use crate::scheduler::{ActionScheduler, SchedulerError};
use crate::tick::{SimulationState, TickError, TickSummary, run_tick};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`SimulationEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Built from configuration, no tick has run.
    Initialized,
    /// Accepting [`step`](SimulationEngine::step) calls.
    Running,
    /// Suspended with clock and ledger intact.
    Paused,
    /// Terminal.
    Stopped,
}

impl EngineStatus {
    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

impl core::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by [`SimulationEngine`] commands.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The command is not valid in the engine's current state.
    #[error("cannot {operation} while {status}")]
    InvalidState {
        /// The rejected command.
        operation: &'static str,
        /// Status at the time of the call.
        status: EngineStatus,
    },

    /// `step` was called while another tick was in progress. Fatal.
    #[error("a tick is already in progress")]
    ConcurrentTick,

    /// A tick failed and was undone; the engine is still running.
    #[error("tick {tick} rolled back: {reason}")]
    TickRolledBack {
        /// The tick that was undone.
        tick: u64,
        /// Why it was undone.
        reason: String,
    },

    /// An entity command failed.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: RegistryError,
    },

    /// The clock was halted.
    #[error("clock halted at tick {tick}")]
    ClockHalted {
        /// Last tick before the halt.
        tick: u64,
    },

    /// The tick counter is exhausted. Fatal.
    #[error("tick counter overflow")]
    TickOverflow,

    /// A ledger reconfiguration failed.
    #[error("ledger error: {source}")]
    Ledger {
        /// The underlying ledger error.
        #[from]
        source: LedgerError,
    },

    /// The scheduling pass failed. Fatal.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: SchedulerError,
    },

    /// An internal invariant was violated. Fatal.
    #[error("invariant violation at tick {tick}: {message}")]
    InvariantViolation {
        /// Tick during which the violation was found.
        tick: u64,
        /// Description of the violation.
        message: String,
    },

    /// Configuration could not be loaded.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// A hook panicked while the engine was locked. Fatal.
    #[error("engine state poisoned by a panicking hook")]
    Poisoned,
}

impl From<ClockError> for EngineError {
    fn from(err: ClockError) -> Self {
        match err {
            ClockError::Halted { tick } => Self::ClockHalted { tick },
            ClockError::TickOverflow => Self::TickOverflow,
        }
    }
}

impl From<TickError> for EngineError {
    fn from(err: TickError) -> Self {
        match err {
            TickError::Clock { source } => source.into(),
            TickError::Scheduler { source } => Self::Scheduler { source },
            TickError::Invariant { anomaly } => Self::InvariantViolation {
                tick: anomaly.tick,
                message: anomaly.message,
            },
            TickError::Sink { tick, sink, source } => Self::TickRolledBack {
                tick,
                reason: format!("sink '{sink}': {source}"),
            },
        }
    }
}

impl EngineError {
    /// Whether this error stops the engine.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentTick
                | Self::ClockHalted { .. }
                | Self::TickOverflow
                | Self::Scheduler { .. }
                | Self::InvariantViolation { .. }
                | Self::Poisoned
        )
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// What a call to [`SimulationEngine::run`] got through.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Summaries of every tick committed by the call, in tick order.
    pub completed: Vec<TickSummary>,
    /// The step failure that ended the run, if any.
    pub error: Option<EngineError>,
}

impl RunReport {
    /// Last tick committed by the call.
    pub fn last_tick(&self) -> Option<u64> {
        self.completed.last().map(|summary| summary.tick)
    }

    /// The completed summaries, or the error that ended the run.
    ///
    /// # Errors
    ///
    /// Returns the step failure if the run was cut short by one.
    pub fn into_result(self) -> Result<Vec<TickSummary>, EngineError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.completed),
        }
    }
}

// ---------------------------------------------------------------------------
// Tick guard
// ---------------------------------------------------------------------------

/// Holds the tick-in-progress flag for the duration of a step.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Everything behind the engine mutex.
#[derive(Debug)]
struct EngineInner {
    status: EngineStatus,
    state: SimulationState,
    hooks: TickHooks,
}

impl EngineInner {
    fn require(
        &self,
        operation: &'static str,
        allowed: &[EngineStatus],
    ) -> Result<(), EngineError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                operation,
                status: self.status,
            })
        }
    }

    fn halt(&mut self, reason: &str) {
        if self.status != EngineStatus::Stopped {
            info!(
                tick = self.state.clock.current_tick(),
                from = %self.status,
                reason,
                "Engine stopped"
            );
        }
        self.status = EngineStatus::Stopped;
        self.state.clock.halt();
    }

    /// Publish one event and deliver it at once.
    fn emit(&mut self, source: Option<EntityId>, payload: EventPayload) {
        let tick = self.state.clock.current_tick();
        let _ = self.state.bus.publish(NewEvent {
            tick,
            source,
            payload,
        });
        let _ = self.state.bus.flush();
    }
}

const LIVE: &[EngineStatus] = &[
    EngineStatus::Initialized,
    EngineStatus::Running,
    EngineStatus::Paused,
];

/// A tick-based city simulation.
#[derive(Debug)]
pub struct SimulationEngine {
    run_id: RunId,
    /// Stop after this tick commits (0 = unlimited).
    max_ticks: u64,
    tick_in_progress: AtomicBool,
    /// Set by a caller that hit [`EngineError::ConcurrentTick`].
    contract_violation: AtomicBool,
    inner: Mutex<EngineInner>,
}

impl SimulationEngine {
    /// Build an engine from configuration.
    ///
    /// Pools are sized from `resource_capacities` and the initial
    /// population is created in order, each publishing `EntityCreated` at
    /// tick 0. The engine starts [`EngineStatus::Initialized`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Registry`] if an initial entity names a
    /// subtype that does not belong to its kind.
    pub fn init(config: &SimulationConfig) -> Result<Self, EngineError> {
        let run_id = RunId::new();
        let mut registry = EntityRegistry::new();
        let mut bus = EventBus::new();

        for initial in &config.initial_entities {
            for _ in 0..initial.count {
                let id = registry.create_named(initial.kind, &initial.subtype)?;
                let entity = registry.get(id)?;
                let _ = bus.publish(NewEvent {
                    tick: 0,
                    source: Some(id),
                    payload: EventPayload::EntityCreated {
                        subtype: entity.subtype,
                    },
                });
            }
        }
        let _ = bus.flush();

        let state = SimulationState {
            clock: SimulationClock::new(),
            registry,
            ledger: ResourceLedger::with_capacities(
                config
                    .resource_capacities
                    .iter()
                    .map(|(&resource, &capacity)| (resource, capacity)),
            ),
            bus,
            scheduler: ActionScheduler::new(config.scheduler.policy),
            leases: Vec::new(),
        };

        info!(
            %run_id,
            entities = state.registry.len(),
            policy = ?config.scheduler.policy,
            max_ticks = config.simulation.max_ticks,
            "Simulation initialized"
        );

        Ok(Self {
            run_id,
            max_ticks: config.simulation.max_ticks,
            tick_in_progress: AtomicBool::new(false),
            contract_violation: AtomicBool::new(false),
            inner: Mutex::new(EngineInner {
                status: EngineStatus::Initialized,
                state,
                hooks: TickHooks::new(),
            }),
        })
    }

    /// Load configuration from a YAML file and build an engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the file cannot be loaded, or
    /// any error from [`init`](Self::init).
    pub fn from_config_file(path: &std::path::Path) -> Result<Self, EngineError> {
        let config = SimulationConfig::from_file(path)?;
        Self::init(&config)
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    /// Take the engine lock for a command.
    ///
    /// A poisoned lock stops the engine. A recorded concurrent-tick
    /// violation is applied here.
    fn lock(&self) -> Result<MutexGuard<'_, EngineInner>, EngineError> {
        match self.inner.lock() {
            Ok(mut inner) => {
                self.apply_violation(&mut inner);
                Ok(inner)
            }
            Err(poisoned) => {
                let mut inner = poisoned.into_inner();
                if inner.status != EngineStatus::Stopped {
                    error!("Engine lock poisoned");
                }
                inner.halt("poisoned");
                Err(EngineError::Poisoned)
            }
        }
    }

    /// Lock for read-only queries; a poisoned lock still yields the last
    /// consistent state.
    fn read(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_violation(&self, inner: &mut EngineInner) {
        if self.contract_violation.swap(false, Ordering::AcqRel) {
            error!(
                tick = inner.state.clock.current_tick(),
                "Concurrent tick detected"
            );
            inner.halt("concurrent tick");
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Move from Initialized to Running.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] from any other state.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        inner.require("start", &[EngineStatus::Initialized])?;
        inner.status = EngineStatus::Running;
        info!(run_id = %self.run_id, "Simulation started");
        Ok(())
    }

    /// Suspend a running engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] unless Running.
    pub fn pause(&self) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        inner.require("pause", &[EngineStatus::Running])?;
        inner.status = EngineStatus::Paused;
        info!(tick = inner.state.clock.current_tick(), "Simulation paused");
        Ok(())
    }

    /// Resume a paused engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] unless Paused.
    pub fn resume(&self) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        inner.require("resume", &[EngineStatus::Paused])?;
        inner.status = EngineStatus::Running;
        info!(tick = inner.state.clock.current_tick(), "Simulation resumed");
        Ok(())
    }

    /// Stop the engine for good. Stopping a stopped engine is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Poisoned`] if a hook panicked (the engine is
    /// stopped regardless).
    pub fn stop(&self) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        inner.halt("stop requested");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Ticking
    // -----------------------------------------------------------------------

    /// Run exactly one tick.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ConcurrentTick`] if another tick is in progress
    ///   (the engine stops once that tick commits).
    /// - [`EngineError::InvalidState`] unless Running.
    /// - [`EngineError::TickRolledBack`] if a sink refused the tick; state
    ///   is as before the call and the engine stays Running.
    /// - Any fatal error ([`EngineError::is_fatal`]) after moving to
    ///   Stopped.
    pub fn step(&self) -> Result<TickSummary, EngineError> {
        let Some(_guard) = TickGuard::acquire(&self.tick_in_progress) else {
            self.contract_violation.store(true, Ordering::Release);
            warn!("step called while a tick is in progress");
            return Err(EngineError::ConcurrentTick);
        };

        let mut inner = self.lock()?;
        inner.require("step", &[EngineStatus::Running])?;
        let result = self.step_locked(&mut inner);
        self.apply_violation(&mut inner);
        result
    }

    fn step_locked(&self, inner: &mut EngineInner) -> Result<TickSummary, EngineError> {
        match run_tick(&mut inner.state, &mut inner.hooks) {
            Ok(outcome) => {
                let tick = outcome.summary.tick;
                match outcome.control {
                    HookControl::Continue => {}
                    HookControl::Pause => {
                        inner.status = EngineStatus::Paused;
                        info!(tick, "Simulation paused by observer");
                    }
                    HookControl::Stop => inner.halt("observer requested stop"),
                }
                if self.max_ticks > 0 && tick >= self.max_ticks {
                    inner.halt("max ticks reached");
                }
                Ok(outcome.summary)
            }
            Err(err) => {
                let err = EngineError::from(err);
                if err.is_fatal() {
                    error!(error = %err, "Tick failed");
                    inner.halt("tick failure");
                } else {
                    warn!(error = %err, "Tick rolled back");
                }
                Err(err)
            }
        }
    }

    /// Run up to `ticks` ticks.
    ///
    /// Ends early if the engine leaves Running (observer pause or stop, or
    /// `max_ticks`) or a step fails. A failed step ends the run without a
    /// retry; the report carries the ticks committed before it and the
    /// error itself.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] unless Running when called.
    pub fn run(&self, ticks: u64) -> Result<RunReport, EngineError> {
        self.lock()?.require("run", &[EngineStatus::Running])?;

        let mut report = RunReport::default();
        for _ in 0..ticks {
            if self.status() != EngineStatus::Running {
                break;
            }
            match self.step() {
                Ok(summary) => report.completed.push(summary),
                Err(err) => {
                    warn!(
                        completed = report.completed.len(),
                        error = %err,
                        "Run ended by failed step"
                    );
                    report.error = Some(err);
                    break;
                }
            }
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Entity commands
    // -----------------------------------------------------------------------

    /// Create an active entity between ticks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] when Stopped, or
    /// [`EngineError::Registry`] for a subtype of another kind.
    pub fn spawn(&self, kind: EntityKind, subtype: Subtype) -> Result<EntityId, EngineError> {
        let mut inner = self.lock()?;
        inner.require("spawn", LIVE)?;
        let id = inner.state.registry.create(kind, subtype)?;
        inner.emit(Some(id), EventPayload::EntityCreated { subtype });
        Ok(id)
    }

    /// Create an active entity from a subtype name.
    ///
    /// # Errors
    ///
    /// As [`spawn`](Self::spawn); unknown names are
    /// [`RegistryError::InvalidSubtype`].
    pub fn spawn_named(&self, kind: EntityKind, subtype: &str) -> Result<EntityId, EngineError> {
        let mut inner = self.lock()?;
        inner.require("spawn", LIVE)?;
        let id = inner.state.registry.create_named(kind, subtype)?;
        let entity = inner.state.registry.get(id)?;
        inner.emit(
            Some(id),
            EventPayload::EntityCreated {
                subtype: entity.subtype,
            },
        );
        Ok(id)
    }

    /// Destroy an entity. Returns `false` if it was already destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] when Stopped, or
    /// [`EngineError::Registry`] for an id that was never issued.
    pub fn destroy(&self, id: EntityId) -> Result<bool, EngineError> {
        let mut inner = self.lock()?;
        inner.require("destroy", LIVE)?;
        let Some(entity) = inner.state.registry.destroy(id)? else {
            return Ok(false);
        };
        inner.emit(
            Some(id),
            EventPayload::EntityDestroyed {
                subtype: entity.subtype,
            },
        );
        Ok(true)
    }

    /// Toggle a live entity between Active and Inactive.
    ///
    /// Publishes `EntityStateChanged` only when the state actually changes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] when Stopped, or
    /// [`EngineError::Registry`] for unknown ids or a Destroyed target.
    pub fn set_entity_state(&self, id: EntityId, state: EntityState) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        inner.require("set entity state", LIVE)?;
        let from = inner.state.registry.set_state(id, state)?;
        if from != state {
            inner.emit(Some(id), EventPayload::EntityStateChanged { from, to: state });
        }
        Ok(())
    }

    /// Resize a resource pool between ticks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] when Stopped, or
    /// [`EngineError::Ledger`] if the new capacity is below the current
    /// allocation.
    pub fn set_capacity(&self, resource: ResourceKind, capacity: u64) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        inner.require("set capacity", LIVE)?;
        inner.state.ledger.set_capacity(resource, capacity)?;
        info!(%resource, capacity, "Capacity changed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Hooks and subscriptions
    // -----------------------------------------------------------------------

    /// Register a sink for the Commit phase.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Poisoned`] if a hook has panicked.
    pub fn add_sink(&self, sink: Box<dyn TickSink>) -> Result<(), EngineError> {
        self.lock()?.hooks.add_sink(sink);
        Ok(())
    }

    /// Register an observer for the Flush phase.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Poisoned`] if a hook has panicked.
    pub fn add_observer(&self, observer: Box<dyn TickObserver>) -> Result<(), EngineError> {
        self.lock()?.hooks.add_observer(observer);
        Ok(())
    }

    /// Subscribe to one event kind, starting with the committed history.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Poisoned`] if a hook has panicked.
    pub fn subscribe(&self, kind: EventKind) -> Result<Subscription, EngineError> {
        Ok(self.lock()?.state.bus.subscribe(kind))
    }

    /// Subscribe to every event, starting with the committed history.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Poisoned`] if a hook has panicked.
    pub fn subscribe_all(&self) -> Result<Subscription, EngineError> {
        Ok(self.lock()?.state.bus.subscribe_all())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Copy of a live entity.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Registry`] for unknown or destroyed ids.
    pub fn inspect(&self, id: EntityId) -> Result<Entity, EngineError> {
        Ok(self.read().state.registry.get(id)?)
    }

    /// Live ids of `kind`, ascending.
    pub fn list_by_kind(&self, kind: EntityKind) -> Vec<EntityId> {
        self.read().state.registry.list_by_kind(kind).collect()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> EngineStatus {
        let mut inner = self.read();
        self.apply_violation(&mut inner);
        inner.status
    }

    /// Last committed tick.
    pub fn current_tick(&self) -> u64 {
        self.read().state.clock.current_tick()
    }

    /// Copy of one resource pool.
    pub fn pool(&self, resource: ResourceKind) -> ResourcePool {
        self.read().state.ledger.pool(resource)
    }

    /// Committed events with a sequence number greater than `sequence`.
    pub fn events_since(&self, sequence: u64) -> Vec<Event> {
        self.read().state.bus.events_since(sequence).to_vec()
    }

    /// Identifier of this run.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Configured tick limit (0 = unlimited).
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Versioned export of the current state.
    pub fn snapshot(&self) -> SimulationSnapshot {
        let inner = self.read();
        SimulationSnapshot {
            version: SNAPSHOT_VERSION,
            run_id: self.run_id,
            tick: inner.state.clock.current_tick(),
            captured_at: Utc::now(),
            entities: inner.state.registry.entities().copied().collect(),
            resource_pools: inner.state.ledger.pools(),
        }
    }
}
