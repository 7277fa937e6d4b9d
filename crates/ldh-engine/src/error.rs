//! Error types for the demo binary.
//!
//! [`DemoError`] wraps every failure mode of startup and scenario replay
//! so `main` can propagate with `?`.

use std::path::PathBuf;

/// Top-level error for the demo binary.
#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ldh_core::config::ConfigError,
    },

    /// Engine registration or scheduler lifecycle failed.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: ldh_core::EngineError,
    },

    /// The scenario file could not be read.
    #[error("failed to read scenario {}: {source}", path.display())]
    ScenarioIo {
        /// Path that was read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The scenario file is not a valid scenario.
    #[error("failed to parse scenario: {source}")]
    ScenarioYaml {
        /// The underlying YAML error.
        #[from]
        source: serde_yml::Error,
    },
}
