//! Tick cycle: the 6-phase loop that drives the Civitas simulation.
//!
//! Each tick runs through these phases:
//!
//! 1. **Advance** -- move the clock forward and tag the ledger with the new
//!    tick.
//!
//! 2. **Settle** -- release the previous tick's leases. A clamped release
//!    is reported as a `ReleaseUnderflow` event and the tick continues.
//!
//! 3. **Schedule** -- run the [`ActionScheduler`] pass and publish one
//!    action event per entity plus one shortage event per scarce resource.
//!
//! 4. **Verify** -- check that the ledger's pools agree with its log.
//!
//! 5. **Commit** -- hand the summary to every [`TickSink`].
//!
//! 6. **Flush** -- publish `TickCompleted`, flush the bus, and notify every
//!    [`TickObserver`].
//!
//! Nothing is visible outside until phase 6. A failure in phases 1-5
//! restores the clock, the ledger, and the leases to their pre-tick state
//! and discards the staged events, so a failed tick leaves no trace. The
//! registry is only read during a tick.
//!
//! [`ActionScheduler`]: crate::scheduler::ActionScheduler
//! [`TickSink`]: crate::hooks::TickSink
//! [`TickObserver`]: crate::hooks::TickObserver

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use civitas_entities::EntityRegistry;
use civitas_events::EventBus;
use civitas_ledger::{ConservationResult, LedgerAnomaly, LedgerCheckpoint, ResourceLedger};
use civitas_types::{EventPayload, NewEvent, ResourceKind};

use crate::clock::{ClockError, SimulationClock};
use crate::hooks::{HookControl, SinkError, TickHooks};
use crate::scheduler::{
    ActionOutcome, ActionScheduler, EntityAction, Lease, LeaseUnderflow, SchedulerError, Shortage,
    release_leases,
};

/// Errors that can occur during tick execution.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The clock refused to advance.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// The scheduling pass failed.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: SchedulerError,
    },

    /// The ledger failed its conservation check.
    #[error("internal invariant violated: {anomaly}")]
    Invariant {
        /// What the check found.
        anomaly: LedgerAnomaly,
    },

    /// A sink refused the tick.
    #[error("sink '{sink}' refused tick {tick}: {source}")]
    Sink {
        /// The tick that was refused.
        tick: u64,
        /// Name of the refusing sink.
        sink: String,
        /// The sink's error.
        source: SinkError,
    },
}

impl TickError {
    /// Whether the engine may keep running after this failure.
    ///
    /// Only a sink refusal is recoverable. Everything else means the
    /// engine's own state can no longer be trusted.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Sink { .. })
    }
}

/// Summary of a single committed tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// The tick number that was executed.
    pub tick: u64,
    /// One record per scheduled entity, in service order.
    pub actions: Vec<EntityAction>,
    /// Per-resource denials this tick.
    pub shortages: BTreeMap<ResourceKind, Shortage>,
    /// Entities that acted at full strength.
    pub performed: u32,
    /// Entities that acted in degraded mode.
    pub degraded: u32,
    /// Clamped lease releases from the Settle phase.
    pub underflows: Vec<LeaseUnderflow>,
    /// Events committed by this tick (0 until the Flush phase).
    pub events_committed: usize,
}

impl TickSummary {
    /// A summary of a tick in which nothing happened.
    pub const fn empty(tick: u64) -> Self {
        Self {
            tick,
            actions: Vec::new(),
            shortages: BTreeMap::new(),
            performed: 0,
            degraded: 0,
            underflows: Vec::new(),
            events_committed: 0,
        }
    }
}

/// The mutable simulation state passed through the tick cycle.
#[derive(Debug)]
pub struct SimulationState {
    /// The tick counter.
    pub clock: SimulationClock,
    /// Every live entity.
    pub registry: EntityRegistry,
    /// Resource pools and reservation log.
    pub ledger: ResourceLedger,
    /// Event log and subscriptions.
    pub bus: EventBus,
    /// Ordering and allocation policy.
    pub scheduler: ActionScheduler,
    /// Grants from the last committed tick.
    pub leases: Vec<Lease>,
}

/// A committed tick and what the observers asked for.
#[derive(Debug)]
pub struct TickOutcome {
    /// What happened.
    pub summary: TickSummary,
    /// Strongest observer request.
    pub control: HookControl,
}

/// Pre-tick state needed to undo a failed tick.
struct Rollback {
    clock: SimulationClock,
    ledger: LedgerCheckpoint,
    leases: Vec<Lease>,
}

impl Rollback {
    fn capture(state: &SimulationState) -> Self {
        Self {
            clock: state.clock.clone(),
            ledger: state.ledger.checkpoint(),
            leases: state.leases.clone(),
        }
    }

    fn apply(self, state: &mut SimulationState) {
        state.clock = self.clock;
        state.ledger.restore(self.ledger);
        state.leases = self.leases;
        let discarded = state.bus.discard_pending();
        debug!(tick = state.clock.current_tick(), discarded, "Tick rolled back");
    }
}

/// Execute one complete tick of the simulation.
///
/// On error the state is exactly as it was before the call.
///
/// # Errors
///
/// Returns [`TickError`]; see [`TickError::is_recoverable`] for which
/// failures the engine survives.
pub fn run_tick(
    state: &mut SimulationState,
    hooks: &mut TickHooks,
) -> Result<TickOutcome, TickError> {
    let rollback = Rollback::capture(state);
    match run_phases(state, hooks) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            rollback.apply(state);
            Err(err)
        }
    }
}

/// Phases 1-5, then the infallible Flush phase.
fn run_phases(
    state: &mut SimulationState,
    hooks: &mut TickHooks,
) -> Result<TickOutcome, TickError> {
    // --- Phase 1: Advance ---
    let tick = state.clock.advance()?;
    state.ledger.set_tick(tick);
    let first_sequence = state.bus.next_sequence();
    debug!(tick, entities = state.registry.len(), "Tick started");

    // --- Phase 2: Settle ---
    let underflows = phase_settle(state, tick);

    // --- Phase 3: Schedule ---
    let pass = state
        .scheduler
        .run_pass(tick, &state.registry, &mut state.ledger)?;
    publish_actions(&mut state.bus, tick, &pass.actions);
    publish_shortages(&mut state.bus, tick, &pass.shortages);

    let mut summary = TickSummary {
        tick,
        performed: pass.performed(),
        degraded: pass.degraded(),
        actions: pass.actions,
        shortages: pass.shortages,
        underflows,
        events_committed: 0,
    };
    let leases = pass.leases;

    // --- Phase 4: Verify ---
    if let ConservationResult::Anomaly(anomaly) = state.ledger.verify_conservation() {
        error!(tick, %anomaly, "Ledger conservation check failed");
        return Err(TickError::Invariant { anomaly });
    }

    // --- Phase 5: Commit ---
    if let Err((sink, source)) = hooks.commit(&summary) {
        warn!(tick, sink = %sink, error = %source, "Sink refused tick");
        return Err(TickError::Sink { tick, sink, source });
    }
    state.leases = leases;

    // --- Phase 6: Flush ---
    let _ = state.bus.publish(NewEvent {
        tick,
        source: None,
        payload: EventPayload::TickCompleted {
            performed: summary.performed,
            degraded: summary.degraded,
        },
    });
    summary.events_committed = state.bus.flush();

    let events = state.bus.events_since(first_sequence.saturating_sub(1));
    let control = hooks.notify(&summary, events);

    info!(
        tick,
        performed = summary.performed,
        degraded = summary.degraded,
        shortages = summary.shortages.len(),
        events = summary.events_committed,
        "Tick completed"
    );

    Ok(TickOutcome { summary, control })
}

/// Release last tick's leases, staging one event per clamp.
fn phase_settle(state: &mut SimulationState, tick: u64) -> Vec<LeaseUnderflow> {
    let leases = std::mem::take(&mut state.leases);
    let underflows = release_leases(&mut state.ledger, &leases);
    for underflow in &underflows {
        let _ = state.bus.publish(NewEvent {
            tick,
            source: None,
            payload: EventPayload::ReleaseUnderflow {
                resource: underflow.resource,
                requested: underflow.requested,
                released: underflow.released,
            },
        });
    }
    underflows
}

fn publish_actions(bus: &mut EventBus, tick: u64, actions: &[EntityAction]) {
    for action in actions {
        let payload = match action.outcome {
            ActionOutcome::Full => EventPayload::ActionPerformed {
                subtype: action.subtype,
            },
            ActionOutcome::Degraded => EventPayload::ActionDegraded {
                subtype: action.subtype,
                denied: action.denied,
            },
        };
        let _ = bus.publish(NewEvent {
            tick,
            source: Some(action.entity_id),
            payload,
        });
    }
}

fn publish_shortages(bus: &mut EventBus, tick: u64, shortages: &BTreeMap<ResourceKind, Shortage>) {
    for (&resource, shortage) in shortages {
        debug!(
            tick,
            %resource,
            denied_requests = shortage.denied_requests,
            units_denied = shortage.units_denied,
            "Resource shortage"
        );
        let _ = bus.publish(NewEvent {
            tick,
            source: None,
            payload: EventPayload::ResourceShortage {
                resource,
                denied_requests: shortage.denied_requests,
                units_denied: shortage.units_denied,
            },
        });
    }
}
