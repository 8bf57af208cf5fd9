//! Extension points called by the tick loop.
//!
//! Collaborators never get a reference into engine state. They register
//! hooks and are handed a [`TickSummary`] (and the tick's committed events)
//! once per tick:
//!
//! - A [`TickSink`] runs in the Commit phase, before anything is visible.
//!   Returning an error rolls the tick back.
//! - A [`TickObserver`] runs after the events are flushed and can only
//!   steer what the engine does next.

use civitas_types::Event;

use crate::tick::TickSummary;

/// Error returned by a [`TickSink`] that refused a tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct SinkError {
    /// Why the sink refused the tick.
    pub reason: String,
}

impl SinkError {
    /// Create a sink error with a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// What the engine should do after an observer has seen a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HookControl {
    /// Keep going.
    #[default]
    Continue,
    /// Move the engine to Paused.
    Pause,
    /// Move the engine to Stopped.
    Stop,
}

/// Receives every committed tick (persistence and export seam).
pub trait TickSink: Send {
    /// Name used in logs and rollback reasons.
    fn name(&self) -> &str {
        "sink"
    }

    /// Accept the tick, or refuse it and have it rolled back.
    ///
    /// # Errors
    ///
    /// Any error rolls the whole tick back; the engine stays Running.
    fn commit(&mut self, summary: &TickSummary) -> Result<(), SinkError>;
}

/// Notified after a tick's events have been delivered.
pub trait TickObserver: Send {
    /// Called once per committed tick with the events it published.
    fn on_tick(&mut self, summary: &TickSummary, events: &[Event]) -> HookControl;
}

/// Registered hooks, called in registration order.
#[derive(Default)]
pub struct TickHooks {
    pub(crate) sinks: Vec<Box<dyn TickSink>>,
    pub(crate) observers: Vec<Box<dyn TickObserver>>,
}

impl TickHooks {
    /// No hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink.
    pub fn add_sink(&mut self, sink: Box<dyn TickSink>) {
        self.sinks.push(sink);
    }

    /// Register an observer.
    pub fn add_observer(&mut self, observer: Box<dyn TickObserver>) {
        self.observers.push(observer);
    }

    /// Run every sink in order, stopping at the first refusal.
    pub(crate) fn commit(&mut self, summary: &TickSummary) -> Result<(), (String, SinkError)> {
        for sink in &mut self.sinks {
            sink.commit(summary)
                .map_err(|err| (sink.name().to_owned(), err))?;
        }
        Ok(())
    }

    /// Notify every observer; the strongest request wins (Stop over Pause).
    pub(crate) fn notify(&mut self, summary: &TickSummary, events: &[Event]) -> HookControl {
        let mut control = HookControl::Continue;
        for observer in &mut self.observers {
            match observer.on_tick(summary, events) {
                HookControl::Stop => control = HookControl::Stop,
                HookControl::Pause if control == HookControl::Continue => {
                    control = HookControl::Pause;
                }
                HookControl::Pause | HookControl::Continue => {}
            }
        }
        control
    }
}

impl core::fmt::Debug for TickHooks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickHooks")
            .field("sinks", &self.sinks.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}
