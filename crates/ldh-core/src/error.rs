//! Error types for engine registration and scheduler lifecycle.

/// Errors raised by [`Scheduler`](crate::scheduler::Scheduler) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Engines dispatch on a tokio runtime and none was active.
    #[error("no tokio runtime is active; engines must be created inside one")]
    NoRuntime,

    /// Another engine already serves a consumer with this name.
    #[error("a consumer named {name} is already registered")]
    DuplicateConsumer {
        /// The conflicting consumer name.
        name: String,
    },

    /// [`start`](crate::scheduler::Scheduler::start) was called twice.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// [`stop`](crate::scheduler::Scheduler::stop) was called while stopped.
    #[error("scheduler is not running")]
    NotRunning,
}
