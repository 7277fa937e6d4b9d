//! Scheduler lifecycle: engine registry and poller tasks.
//!
//! A [`Scheduler`] owns one [`Engine`] per consumer. [`Scheduler::start`]
//! spawns a poller task per engine that ticks it on a fixed interval;
//! [`Scheduler::stop`] signals every poller over a watch channel and waits
//! for them to exit. Nothing is global: tests build their own scheduler
//! with a manual clock and drive ticks with [`Scheduler::tick_all`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::LdhConfig;
use crate::consumer::Consumer;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::stats::{EngineDump, TickReport};
use crate::store::DataStore;

/// An engine as seen by the scheduler.
pub trait Pollable: Send + Sync + 'static {
    /// Consumer name.
    fn name(&self) -> &str;

    /// Run one poller pass.
    fn tick(&self) -> TickReport;

    /// Debug snapshot.
    fn dump(&self) -> EngineDump;
}

impl<C: Consumer> Pollable for Engine<C> {
    fn name(&self) -> &str {
        Self::name(self)
    }

    fn tick(&self) -> TickReport {
        Self::tick(self)
    }

    fn dump(&self) -> EngineDump {
        Self::dump(self)
    }
}

/// Pollers of a started scheduler.
struct Running {
    /// Runtime the pollers run on.
    handle: Handle,
    /// Set to `true` to stop every poller.
    shutdown: watch::Sender<bool>,
    /// One task per engine.
    pollers: Vec<JoinHandle<()>>,
}

/// Owner of every engine and its poller.
pub struct Scheduler {
    config: LdhConfig,
    clock: Arc<dyn Clock>,
    engines: Mutex<Vec<Arc<dyn Pollable>>>,
    running: Mutex<Option<Running>>,
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("engines", &self.engine_names())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler with no engines.
    pub fn new(config: LdhConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            engines: Mutex::new(Vec::new()),
            running: Mutex::new(None),
        }
    }

    /// The configuration engines are built with.
    pub const fn config(&self) -> &LdhConfig {
        &self.config
    }

    fn engines(&self) -> MutexGuard<'_, Vec<Arc<dyn Pollable>>> {
        self.engines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and register an engine for `consumer` reading from `store`.
    ///
    /// If the scheduler is running the engine's poller starts immediately.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateConsumer`] if the name is taken, or
    /// [`EngineError::NoRuntime`] outside a tokio runtime.
    pub fn register<C: Consumer>(
        &self,
        consumer: C,
        store: Arc<dyn DataStore>,
    ) -> Result<Engine<C>, EngineError> {
        let mut engines = self.engines();
        if engines.iter().any(|e| e.name() == consumer.name()) {
            return Err(EngineError::DuplicateConsumer {
                name: consumer.name().to_owned(),
            });
        }
        let engine = Engine::new(consumer, store, Arc::clone(&self.clock), &self.config)?;
        let pollable: Arc<dyn Pollable> = Arc::new(engine.clone());
        engines.push(Arc::clone(&pollable));
        drop(engines);

        if let Some(running) = self.running().as_mut() {
            let poller = spawn_poller(
                &running.handle,
                pollable,
                self.config.scheduler.tick_interval_ms,
                running.shutdown.subscribe(),
            );
            running.pollers.push(poller);
        }
        Ok(engine)
    }

    /// Names of the registered consumers, in registration order.
    pub fn engine_names(&self) -> Vec<String> {
        self.engines().iter().map(|e| e.name().to_owned()).collect()
    }

    /// Whether pollers are running.
    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Spawn one poller per registered engine on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRunning`] if started twice, or
    /// [`EngineError::NoRuntime`] outside a tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        let handle = Handle::try_current().map_err(|e| {
            warn!(error = %e, "scheduler started outside a runtime");
            EngineError::NoRuntime
        })?;
        let mut running = self.running();
        if running.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        let (shutdown, _) = watch::channel(false);
        let tick_interval_ms = self.config.scheduler.tick_interval_ms;
        let pollers: Vec<JoinHandle<()>> = self
            .engines()
            .iter()
            .map(|engine| {
                spawn_poller(
                    &handle,
                    Arc::clone(engine),
                    tick_interval_ms,
                    shutdown.subscribe(),
                )
            })
            .collect();
        info!(engines = pollers.len(), tick_interval_ms, "scheduler started");
        *running = Some(Running {
            handle,
            shutdown,
            pollers,
        });
        Ok(())
    }

    /// Stop every poller and wait for it to exit.
    ///
    /// A tick in progress completes first. Dispatches already submitted
    /// keep running.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotRunning`] if the scheduler is stopped.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let Some(running) = self.running().take() else {
            return Err(EngineError::NotRunning);
        };
        let _ = running.shutdown.send(true);
        let results = futures::future::join_all(running.pollers).await;
        for result in results {
            if let Err(e) = result {
                error!(error = %e, "poller task failed");
            }
        }
        info!("scheduler stopped");
        Ok(())
    }

    /// Tick every engine once, in registration order.
    pub fn tick_all(&self) -> BTreeMap<String, TickReport> {
        let engines: Vec<Arc<dyn Pollable>> = self.engines().clone();
        engines
            .iter()
            .map(|e| (e.name().to_owned(), e.tick()))
            .collect()
    }

    /// Debug snapshot of every engine, keyed by consumer name.
    pub fn dump(&self) -> BTreeMap<String, EngineDump> {
        let engines: Vec<Arc<dyn Pollable>> = self.engines().clone();
        engines
            .iter()
            .map(|e| (e.name().to_owned(), e.dump()))
            .collect()
    }

    /// Text form of [`Self::dump`].
    pub fn dump_text(&self) -> String {
        self.dump()
            .values()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Tick `engine` every `tick_interval_ms` until `shutdown` turns true.
fn spawn_poller(
    handle: &Handle,
    engine: Arc<dyn Pollable>,
    tick_interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    handle.spawn(async move {
        let name = engine.name().to_owned();
        let mut ticker = tokio::time::interval(Duration::from_millis(tick_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(consumer = %name, tick_interval_ms, "poller started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let engine = Arc::clone(&engine);
                    if let Err(e) = tokio::task::spawn_blocking(move || engine.tick()).await {
                        error!(consumer = %name, error = %e, "tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(consumer = %name, "poller stopped");
    })
}
