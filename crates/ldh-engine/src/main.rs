//! Demo binary for the LDH scheduler.
//!
//! Wires one [`RouteProgrammer`] consumer to an in-memory store, replays a
//! YAML scenario of store writes and route changes against it while the
//! scheduler's poller runs, then prints the engine dump and the programmed
//! routes.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `ldh-config.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Load the scenario named on the command line
//!    (default `demos/route-scenario.yaml`)
//! 4. Register the consumer and start the scheduler
//! 5. Replay the scenario and wait for the queues to drain
//! 6. Print the dump and stop the scheduler

mod error;
mod route_consumer;
mod scenario;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use ldh_core::{DataStore, Engine, InMemoryStore, LdhConfig, Scheduler, SystemClock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::DemoError;
use crate::route_consumer::RouteProgrammer;
use crate::scenario::Scenario;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "ldh-config.yaml";

/// Scenario replayed when none is named.
const DEFAULT_SCENARIO: &str = "demos/route-scenario.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the scenario, or scheduler startup fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(Path::new(CONFIG_PATH)).context("loading ldh-config.yaml")?;
    init_logging(&config);
    info!(
        tick_interval_ms = config.scheduler.tick_interval_ms,
        settle_delay_ms = config.scheduler.settle_delay_ms,
        dispatch_workers = config.scheduler.dispatch_workers,
        "configuration loaded"
    );

    let scenario_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_SCENARIO), PathBuf::from);
    let scenario = Scenario::from_file(&scenario_path)
        .with_context(|| format!("loading scenario {}", scenario_path.display()))?;
    info!(
        path = %scenario_path.display(),
        steps = scenario.steps.len(),
        changes = scenario.change_count(),
        "scenario loaded"
    );

    let store = Arc::new(InMemoryStore::new());
    let scheduler = Scheduler::new(config, Arc::new(SystemClock));
    let engine = scheduler
        .register(
            RouteProgrammer::new(Arc::clone(&store) as Arc<dyn DataStore>),
            Arc::clone(&store) as Arc<dyn DataStore>,
        )
        .map_err(DemoError::from)?;
    scheduler.start().map_err(DemoError::from)?;

    scenario::replay(&scenario, &store, &engine).await;

    let tick_ms = scheduler.config().scheduler.tick_interval_ms;
    let drain = Duration::from_millis(scenario.drain_timeout_ms);
    if tokio::time::timeout(drain, wait_drained(&engine, tick_ms))
        .await
        .is_err()
    {
        warn!(
            drain_timeout_ms = scenario.drain_timeout_ms,
            "events still queued at drain timeout"
        );
    }

    println!("{}", scheduler.dump_text());
    for (key, route) in engine.consumer().programmed() {
        println!("route {key} {} via {} (vpn {})", route.prefix, route.next_hop, route.vpn);
    }

    scheduler.stop().await.map_err(DemoError::from)?;
    info!("ldh-engine shutdown complete");
    Ok(())
}

/// Poll the engine's dump until nothing is queued, settling or running.
async fn wait_drained(engine: &Engine<RouteProgrammer>, tick_ms: u64) {
    loop {
        let dump = engine.dump();
        if dump.intake_depth == 0
            && dump.lanes.is_empty()
            && dump.settle_depth == 0
            && dump.dispatching == 0
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(tick_ms.max(1))).await;
    }
}

/// Load configuration from `path`, falling back to defaults if it is absent.
fn load_config(path: &Path) -> Result<LdhConfig, DemoError> {
    if path.exists() {
        Ok(LdhConfig::from_file(path)?)
    } else {
        let mut config = LdhConfig::default();
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }
}

/// Initialize tracing: `RUST_LOG` wins, then the configured level.
fn init_logging(config: &LdhConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
