//! Event dependency-resolution scheduler.
//!
//! Change notifications for keyed resources arrive at an [`Engine`], which
//! delivers each one to its [`Consumer`]: immediately when nothing else is
//! outstanding for the key, otherwise in arrival order once the events
//! ahead of it are done. A consumer that needs other resources to exist
//! (or to be gone) first answers [`Disposition::Defer`]; the engine then
//! holds the event until those conditions hold, watching the store through
//! shared wildcard subscriptions or by polling, and gives up after a
//! bounded retry budget. Resolved events dwell in a settle buffer before
//! dispatch so the consumer sees a converged store.
//!
//! # Modules
//!
//! - [`clock`] -- Millisecond clocks (wall and manual).
//! - [`config`] -- Configuration loading from `ldh-config.yaml`.
//! - [`store`] -- [`DataStore`] trait and subscription listener.
//! - [`memory_store`] -- In-process [`DataStore`].
//! - [`locks`] -- Value-addressed striped lock table.
//! - [`intake`] -- Reordering guard decision matrix.
//! - [`event`] -- Deferred events and defer requests.
//! - [`waiting`] -- Intake queue and per-key lanes.
//! - [`registry`] -- Shared, reference-counted wildcard subscriptions.
//! - [`settle`] -- Dwell buffer between resolution and dispatch.
//! - [`dispatcher`] -- Bounded callback execution on the blocking pool.
//! - [`consumer`] -- [`Consumer`] callback trait.
//! - [`engine`] -- One consumer's engine and its poller tick.
//! - [`scheduler`] -- Engine registry and poller lifecycle.
//! - [`stats`] -- Counters, tick reports and debug dumps.
//! - [`error`] -- Engine and scheduler errors.

pub mod clock;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod intake;
pub mod locks;
pub mod memory_store;
pub mod registry;
pub mod scheduler;
pub mod settle;
pub mod stats;
pub mod store;
pub mod waiting;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LdhConfig;
pub use consumer::{Consumer, Disposition};
pub use engine::Engine;
pub use error::EngineError;
pub use event::DeferRequest;
pub use intake::IntakeOutcome;
pub use memory_store::InMemoryStore;
pub use scheduler::{Pollable, Scheduler};
pub use stats::{EngineDump, TickReport};
pub use store::{DataStore, Record, StoreError, WildcardListener};
