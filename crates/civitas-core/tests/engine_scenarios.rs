//! End-to-end scenarios for the simulation engine.
//!
//! Each test drives a [`SimulationEngine`] through its public command
//! surface only: configuration in, ticks, events and snapshots out.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

use chrono::{DateTime, Utc};
use civitas_core::{
    EngineError, EngineStatus, HookControl, SimulationConfig, SimulationEngine, SinkError,
    TickObserver, TickSink, TickSummary,
};
use civitas_entities::RegistryError;
use civitas_ledger::{Release, ResourceLedger};
use civitas_types::{
    CitizenType, EntityKind, EntityState, Event, EventKind, EventPayload, ResourceKind,
    SimulationSnapshot, Subtype,
};

const WORKER: Subtype = Subtype::Citizen(CitizenType::Worker);

fn workers(power: u64, count: u32) -> SimulationEngine {
    let config = SimulationConfig::default()
        .with_capacity(ResourceKind::Power, power)
        .with_entities(EntityKind::Citizen, "worker", count);
    let engine = SimulationEngine::init(&config).unwrap();
    engine.start().unwrap();
    engine
}

/// Snapshot with the capture time zeroed, for equality checks.
fn state_of(engine: &SimulationEngine) -> SimulationSnapshot {
    let mut snapshot = engine.snapshot();
    snapshot.captured_at = DateTime::<Utc>::UNIX_EPOCH;
    snapshot
}

// ---------------------------------------------------------------------------
// Contention
// ---------------------------------------------------------------------------

#[test]
fn twelve_workers_ten_power() {
    let engine = workers(10, 12);
    let ids = engine.list_by_kind(EntityKind::Citizen);
    assert_eq!(ids.len(), 12);
    let mut degraded = engine.subscribe(EventKind::ActionDegraded).unwrap();
    let mut shortages = engine.subscribe(EventKind::ResourceShortage).unwrap();

    let summary = engine.step().unwrap();

    assert_eq!(summary.performed, 10);
    assert_eq!(summary.degraded, 2);
    let granted: Vec<_> = summary
        .actions
        .iter()
        .filter(|a| a.denied.is_empty())
        .map(|a| a.entity_id)
        .collect();
    assert_eq!(granted, ids[..10].to_vec());

    let losers: Vec<_> = degraded.drain().iter().filter_map(|e| e.source).collect();
    assert_eq!(losers, ids[10..].to_vec());

    let shortage = shortages.try_next().unwrap();
    assert_eq!(
        shortage.payload,
        EventPayload::ResourceShortage {
            resource: ResourceKind::Power,
            denied_requests: 2,
            units_denied: 2,
        }
    );
    assert_eq!(engine.status(), EngineStatus::Running);
    assert_eq!(engine.pool(ResourceKind::Power).allocated, 10);
}

#[test]
fn capacity_is_recontested_each_tick() {
    let engine = workers(10, 12);
    for _ in 0..5 {
        let summary = engine.step().unwrap();
        assert_eq!(summary.performed, 10);
        assert!(summary.underflows.is_empty());
    }
    assert_eq!(engine.pool(ResourceKind::Power).allocated, 10);
}

#[test]
fn raising_capacity_ends_the_shortage() {
    let engine = workers(10, 12);
    let _ = engine.step().unwrap();
    engine.set_capacity(ResourceKind::Power, 12).unwrap();
    let summary = engine.step().unwrap();
    assert_eq!(summary.degraded, 0);
    assert!(summary.shortages.is_empty());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

/// Blocks inside the first tick until told to continue.
struct Gate {
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
    armed: bool,
}

impl TickObserver for Gate {
    fn on_tick(&mut self, _summary: &TickSummary, _events: &[Event]) -> HookControl {
        if self.armed {
            self.armed = false;
            self.entered.send(()).unwrap();
            self.release.recv().unwrap();
        }
        HookControl::Continue
    }
}

#[test]
fn concurrent_step_is_rejected_and_fatal() {
    let engine = Arc::new(workers(10, 3));
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    engine
        .add_observer(Box::new(Gate {
            entered: entered_tx,
            release: release_rx,
            armed: true,
        }))
        .unwrap();

    let first = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.step())
    };
    entered_rx.recv().unwrap();

    let second = engine.step();
    assert!(matches!(second, Err(EngineError::ConcurrentTick)));

    release_tx.send(()).unwrap();
    let summary = first.join().unwrap().unwrap();
    assert_eq!(summary.tick, 1);
    assert_eq!(summary.performed, 3);

    assert_eq!(engine.status(), EngineStatus::Stopped);
    assert_eq!(engine.current_tick(), 1);
    assert!(matches!(
        engine.step(),
        Err(EngineError::InvalidState {
            status: EngineStatus::Stopped,
            ..
        })
    ));
}

#[test]
fn sequential_steps_from_many_threads_are_fine() {
    let engine = Arc::new(workers(10, 3));
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.step().unwrap())
            .join()
            .unwrap();
    }
    assert_eq!(engine.current_tick(), 4);
    assert_eq!(engine.status(), EngineStatus::Running);
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

/// Refuses the first tick it sees after being armed.
struct FlakySink {
    armed: Arc<AtomicBool>,
}

impl TickSink for FlakySink {
    fn name(&self) -> &str {
        "flaky"
    }

    fn commit(&mut self, _summary: &TickSummary) -> Result<(), SinkError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            Err(SinkError::new("write failed"))
        } else {
            Ok(())
        }
    }
}

struct RefuseTick(u64);

impl TickSink for RefuseTick {
    fn commit(&mut self, summary: &TickSummary) -> Result<(), SinkError> {
        if summary.tick == self.0 {
            Err(SinkError::new("refused"))
        } else {
            Ok(())
        }
    }
}

#[test]
fn run_reports_ticks_committed_before_a_rollback() {
    let engine = workers(10, 4);
    engine.add_sink(Box::new(RefuseTick(3))).unwrap();

    let report = engine.run(5).unwrap();

    let ticks: Vec<u64> = report.completed.iter().map(|s| s.tick).collect();
    assert_eq!(ticks, vec![1, 2]);
    assert_eq!(report.last_tick(), Some(2));
    assert!(matches!(
        report.error,
        Some(EngineError::TickRolledBack { tick: 3, .. })
    ));
    assert_eq!(engine.current_tick(), 2);
    assert_eq!(engine.status(), EngineStatus::Running);
    assert!(engine.run(1).unwrap().into_result().is_err());
}

#[test]
fn failed_tick_leaves_state_untouched() {
    let engine = workers(10, 12);
    let armed = Arc::new(AtomicBool::new(false));
    engine
        .add_sink(Box::new(FlakySink {
            armed: Arc::clone(&armed),
        }))
        .unwrap();
    let _ = engine.step().unwrap();

    let before = state_of(&engine);
    let events_before = engine.events_since(0);

    armed.store(true, Ordering::SeqCst);
    let err = engine.step().unwrap_err();
    assert!(matches!(err, EngineError::TickRolledBack { tick: 2, .. }));
    assert!(!err.is_fatal());

    assert_eq!(state_of(&engine), before);
    assert_eq!(engine.events_since(0), events_before);
    assert_eq!(engine.status(), EngineStatus::Running);

    let retry = engine.step().unwrap();
    assert_eq!(retry.tick, 2);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[test]
fn sequence_numbers_are_gap_free_across_rollbacks() {
    let engine = workers(5, 8);
    let armed = Arc::new(AtomicBool::new(false));
    engine
        .add_sink(Box::new(FlakySink {
            armed: Arc::clone(&armed),
        }))
        .unwrap();

    for tick in 0..6 {
        armed.store(tick % 2 == 1, Ordering::SeqCst);
        let _ = engine.step();
        let id = engine.spawn(EntityKind::Citizen, WORKER).unwrap();
        if tick == 3 {
            let _ = engine.destroy(id).unwrap();
        }
    }

    let events = engine.events_since(0);
    assert!(!events.is_empty());
    for (expected, event) in (1_u64..).zip(&events) {
        assert_eq!(event.sequence, expected);
    }
}

#[test]
fn events_of_a_tick_are_delivered_before_the_next() {
    let engine = workers(10, 2);
    let mut completed = engine.subscribe(EventKind::TickCompleted).unwrap();

    let _ = engine.step().unwrap();
    let first = completed.drain();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].tick, 1);

    let _ = engine.step().unwrap();
    let second = completed.drain();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].tick, 2);
}

#[test]
fn late_subscriber_sees_history() {
    let engine = workers(10, 2);
    let _ = engine.run(3).unwrap();

    let mut all = engine.subscribe_all().unwrap();
    let history = all.drain();
    assert_eq!(history.len(), engine.events_since(0).len());
    assert_eq!(history.first().map(|e| e.kind), Some(EventKind::EntityCreated));
}

#[tokio::test]
async fn subscription_can_be_awaited() {
    let engine = workers(10, 1);
    let mut performed = engine.subscribe(EventKind::ActionPerformed).unwrap();

    let _ = engine.step().unwrap();
    let event = performed.recv().await.unwrap();
    assert_eq!(event.tick, 1);
    assert_eq!(event.payload, EventPayload::ActionPerformed { subtype: WORKER });
}

// ---------------------------------------------------------------------------
// Registry through the engine
// ---------------------------------------------------------------------------

#[test]
fn destroyed_ids_are_never_listed_or_reused() {
    let engine = workers(10, 3);
    let ids = engine.list_by_kind(EntityKind::Citizen);
    assert!(engine.destroy(ids[1]).unwrap());

    let fresh = engine.spawn(EntityKind::Citizen, WORKER).unwrap();
    assert!(!ids.contains(&fresh));

    let listed = engine.list_by_kind(EntityKind::Citizen);
    assert_eq!(listed, vec![ids[0], ids[2], fresh]);

    let summary = engine.step().unwrap();
    assert!(summary.actions.iter().all(|a| a.entity_id != ids[1]));
    assert!(matches!(
        engine.inspect(ids[1]),
        Err(EngineError::Registry {
            source: RegistryError::NotFound(_)
        })
    ));
}

#[test]
fn inactive_entities_sit_out() {
    let engine = workers(10, 3);
    let ids = engine.list_by_kind(EntityKind::Citizen);
    engine.set_entity_state(ids[0], EntityState::Inactive).unwrap();

    let summary = engine.step().unwrap();
    assert_eq!(summary.actions.len(), 2);
    assert_eq!(engine.pool(ResourceKind::Power).allocated, 2);
    assert_eq!(engine.inspect(ids[0]).unwrap().state, EntityState::Inactive);
}

#[test]
fn spawn_rejects_subtype_of_other_kind() {
    let engine = workers(10, 0);
    assert!(matches!(
        engine.spawn(EntityKind::Building, WORKER),
        Err(EngineError::Registry {
            source: RegistryError::InvalidSubtype { .. }
        })
    ));
    assert!(matches!(
        engine.spawn_named(EntityKind::Citizen, "astronaut"),
        Err(EngineError::Registry { .. })
    ));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

struct PauseAt(u64);

impl TickObserver for PauseAt {
    fn on_tick(&mut self, summary: &TickSummary, _events: &[Event]) -> HookControl {
        if summary.tick == self.0 {
            HookControl::Pause
        } else {
            HookControl::Continue
        }
    }
}

#[test]
fn observer_pause_ends_run_early() {
    let engine = workers(10, 2);
    engine.add_observer(Box::new(PauseAt(2))).unwrap();

    let report = engine.run(10).unwrap();
    assert_eq!(report.completed.len(), 2);
    assert!(report.error.is_none());
    assert_eq!(engine.status(), EngineStatus::Paused);

    engine.resume().unwrap();
    let rest = engine.run(3).unwrap().into_result().unwrap();
    assert_eq!(rest.first().map(|s| s.tick), Some(3));
}

#[test]
fn stopped_is_terminal() {
    let engine = workers(10, 2);
    let _ = engine.step().unwrap();
    engine.stop().unwrap();

    assert!(engine.resume().is_err());
    assert!(engine.run(1).is_err());
    assert!(engine.step().is_err());
    assert_eq!(engine.current_tick(), 1);
    assert!(engine.inspect(engine.list_by_kind(EntityKind::Citizen)[0]).is_ok());
}

#[test]
fn config_file_round_trip() {
    let path = std::env::temp_dir().join(format!("civitas-{}.yaml", std::process::id()));
    let yaml = r"
resource_capacities:
  water: 4
initial_entities:
  - kind: citizen
    subtype: student
    count: 5
";
    std::fs::write(&path, yaml).unwrap();

    let engine = SimulationEngine::from_config_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    engine.start().unwrap();

    let summary = engine.step().unwrap();
    assert_eq!(summary.performed, 4);
    assert_eq!(summary.degraded, 1);
}

// ---------------------------------------------------------------------------
// Ledger properties
// ---------------------------------------------------------------------------

#[test]
fn release_beyond_allocation_clamps() {
    let mut ledger = ResourceLedger::with_capacities([(ResourceKind::Power, 10)]);
    assert!(ledger.reserve(ResourceKind::Power, 3).is_granted());

    let release = ledger.release(ResourceKind::Power, 5);
    assert_eq!(
        release,
        Release::Clamped {
            requested: 5,
            released: 3,
        }
    );
    assert_eq!(ledger.allocated(ResourceKind::Power), 0);
    assert!(ledger.verify_conservation().is_balanced());
}

#[test]
fn allocation_stays_within_bounds_for_mixed_sequences() {
    let mut ledger = ResourceLedger::with_capacities([(ResourceKind::Water, 17)]);
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;

    for _ in 0..2_000 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let amount = seed % 9;
        if seed % 3 == 0 {
            let _ = ledger.release(ResourceKind::Water, amount);
        } else {
            let _ = ledger.reserve(ResourceKind::Water, amount);
        }
        assert!(ledger.allocated(ResourceKind::Water) <= 17);
    }
    assert!(ledger.verify_conservation().is_balanced());
}
