//! Simulation clock.
//!
//! The clock is the single source of truth for the current tick. It only
//! moves forward, one tick at a time, and stops for good once the engine
//! halts it.
//!
//! # Design Principles
//!
//! - Advancing uses checked arithmetic (no silent overflow).
//! - Halted is terminal and only reached through [`SimulationClock::halt`];
//!   the clock never halts on its own.

/// Errors that can occur during clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// The engine has halted the clock.
    #[error("clock halted at tick {tick}")]
    Halted {
        /// Tick at which the clock was halted.
        tick: u64,
    },

    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,
}

/// Discrete tick counter for one simulation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationClock {
    /// Last tick advanced to (0 = no tick has run).
    tick: u64,

    /// Set once by the engine on shutdown.
    halted: bool,
}

impl SimulationClock {
    /// Create a clock at tick 0.
    pub const fn new() -> Self {
        Self {
            tick: 0,
            halted: false,
        }
    }

    /// Create a running clock at an explicit tick (useful for testing and
    /// state restoration).
    pub const fn from_parts(tick: u64) -> Self {
        Self {
            tick,
            halted: false,
        }
    }

    /// Return the current tick number.
    pub const fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Advance by one tick and return the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Halted`] after [`halt`](Self::halt), or
    /// [`ClockError::TickOverflow`] if the counter is at `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        if self.halted {
            return Err(ClockError::Halted { tick: self.tick });
        }
        self.tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        Ok(self.tick)
    }

    /// Halt the clock permanently.
    pub const fn halt(&mut self) {
        self.halted = true;
    }

    /// Whether the clock has been halted.
    pub const fn is_halted(&self) -> bool {
        self.halted
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn clock_starts_at_tick_zero() {
        let clock = SimulationClock::new();
        assert_eq!(clock.current_tick(), 0);
        assert!(!clock.is_halted());
    }

    #[test]
    fn clock_advances() {
        let mut clock = SimulationClock::new();
        assert_eq!(clock.advance().unwrap(), 1);
        assert_eq!(clock.advance().unwrap(), 2);
        assert_eq!(clock.current_tick(), 2);
    }

    #[test]
    fn halted_clock_refuses_to_advance() {
        let mut clock = SimulationClock::new();
        let _ = clock.advance().unwrap();
        clock.halt();

        assert_eq!(clock.advance(), Err(ClockError::Halted { tick: 1 }));
        assert_eq!(clock.current_tick(), 1);
    }

    #[test]
    fn overflow_is_an_error() {
        let mut clock = SimulationClock::from_parts(u64::MAX);
        assert_eq!(clock.advance(), Err(ClockError::TickOverflow));
        assert_eq!(clock.current_tick(), u64::MAX);
    }

    #[test]
    fn from_parts_restores_tick() {
        let mut clock = SimulationClock::from_parts(500);
        assert_eq!(clock.advance().unwrap(), 501);
    }
}
