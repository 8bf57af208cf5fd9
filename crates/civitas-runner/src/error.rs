//! Error types for the runner binary.
//!
//! [`RunnerError`] wraps every failure mode during startup and the run
//! loop; `main` adds context with `anyhow` on top.

/// Top-level error for the runner binary.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: civitas_core::ConfigError,
    },

    /// The engine refused a command or failed a tick.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: civitas_core::EngineError,
    },

    /// The tracing subscriber could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },

    /// The final snapshot could not be serialized.
    #[error("snapshot error: {source}")]
    Snapshot {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}
