//! Headless runner for the Civitas simulation.
//!
//! Loads configuration, installs logging, builds a [`SimulationEngine`],
//! and ticks it until `simulation.max_ticks` is reached or Ctrl-C is
//! pressed. Every committed event is logged.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$CIVITAS_CONFIG` or `civitas-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build and start the engine
//! 4. Subscribe to every event and log it from a background task
//! 5. Run the tick loop
//! 6. Stop the engine and log the final snapshot

mod error;
mod report;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use civitas_core::config::{LOG_LEVEL_ENV, LogFormat, LoggingConfig};
use civitas_core::{EngineError, EngineStatus, SimulationConfig, SimulationEngine};

use crate::error::RunnerError;

/// Environment variable naming the configuration file.
const CONFIG_PATH_ENV: &str = "CIVITAS_CONFIG";

/// Configuration file used when `CIVITAS_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "civitas-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, logging, or a fatal tick fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration.
    let config = load_config().context("loading configuration")?;

    // 2. Initialize structured logging.
    init_logging(&config.logging).context("initializing logging")?;
    info!(
        max_ticks = config.simulation.max_ticks,
        tick_interval_ms = config.simulation.tick_interval_ms,
        policy = ?config.scheduler.policy,
        "civitas-runner starting"
    );

    // 3. Build and start the engine.
    let engine = Arc::new(SimulationEngine::init(&config).map_err(RunnerError::from)?);
    engine.start().map_err(RunnerError::from)?;

    // 4. Log every event from a background task.
    let mut events = engine.subscribe_all().map_err(RunnerError::from)?;
    let logger = tokio::spawn(async move {
        let mut logged: u64 = 0;
        while let Some(event) = events.recv().await {
            report::log_event(&event);
            logged = logged.saturating_add(1);
        }
        logged
    });

    // 5. Run the tick loop.
    let interval = Duration::from_millis(config.simulation.tick_interval_ms);
    let outcome = run_loop(&engine, interval).await;

    // 6. Stop and report.
    engine.stop().map_err(RunnerError::from)?;
    let snapshot = engine.snapshot();
    info!(
        run_id = %snapshot.run_id,
        tick = snapshot.tick,
        entities = snapshot.entities.len(),
        "Final state"
    );
    for pool in &snapshot.resource_pools {
        info!(
            resource = %pool.resource,
            capacity = pool.capacity,
            allocated = pool.allocated,
            "Pool"
        );
    }
    let json = serde_json::to_string(&snapshot).map_err(RunnerError::from)?;
    debug!(snapshot = %json, "Final snapshot");

    // Dropping the last engine handle closes the subscription.
    drop(engine);
    let logged = logger.await.context("event logger task")?;
    info!(events = logged, "civitas-runner shutdown complete");

    outcome.context("running simulation")?;
    Ok(())
}

/// Tick until the engine leaves Running or Ctrl-C arrives.
///
/// Rolled-back ticks are logged and retried on the next interval.
async fn run_loop(engine: &SimulationEngine, interval: Duration) -> Result<(), RunnerError> {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    while engine.status() == EngineStatus::Running {
        tokio::select! {
            _ = &mut shutdown => {
                info!(tick = engine.current_tick(), "Ctrl-C received, stopping");
                return Ok(());
            }
            () = tokio::time::sleep(interval) => {}
        }

        match engine.step() {
            Ok(summary) => debug!(
                tick = summary.tick,
                performed = summary.performed,
                degraded = summary.degraded,
                "Step complete"
            ),
            Err(EngineError::TickRolledBack { tick, reason }) => {
                warn!(tick, reason = %reason, "Tick rolled back, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!(
        tick = engine.current_tick(),
        status = %engine.status(),
        "Tick loop finished"
    );
    Ok(())
}

/// Load configuration from `$CIVITAS_CONFIG`, falling back to
/// `civitas-config.yaml` in the working directory, then to defaults.
fn load_config() -> Result<SimulationConfig, RunnerError> {
    let path = std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    if path.exists() {
        Ok(SimulationConfig::from_file(&path)?)
    } else {
        let mut config = SimulationConfig::default();
        config.logging.apply_env_overrides();
        Ok(config)
    }
}

/// Install the global tracing subscriber.
fn init_logging(config: &LoggingConfig) -> Result<(), RunnerError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| RunnerError::Logging {
        message: format!("invalid {LOG_LEVEL_ENV} / logging.level '{}': {e}", config.level),
    })?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| RunnerError::Logging {
        message: e.to_string(),
    })
}
