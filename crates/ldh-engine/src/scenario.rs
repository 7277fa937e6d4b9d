//! Change scenarios replayed by the demo.
//!
//! A scenario is a YAML list of steps. Store steps (`put`, `delete`) write
//! the in-memory store the way a data plane would; change steps (`add`,
//! `update`, `remove`) are the notifications the engine receives for
//! routes; `sleep_ms` lets the poller run in between.
//!
//! ```yaml
//! drain_timeout_ms: 10000
//! steps:
//!   - add: { key: /routes/blue/r1, route: { vpn: blue, prefix: 10.0.0.0/24, next_hop: 192.0.2.1 } }
//!   - put: { view: desired, key: /vpn-instances/blue }
//!   - sleep_ms: 500
//! ```

use std::path::Path;
use std::time::Duration;

use ldh_core::{Engine, InMemoryStore, IntakeOutcome};
use ldh_types::{Change, ResourceKey, View};
use serde::Deserialize;
use tracing::info;

use crate::error::DemoError;
use crate::route_consumer::{Route, RouteProgrammer};

/// A parsed scenario file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    /// How long to wait after the last step for queues to drain.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Steps in replay order.
    #[serde(with = "serde_yml::with::singleton_map_recursive")]
    pub steps: Vec<Step>,
}

/// Default: 10 seconds.
const fn default_drain_timeout_ms() -> u64 {
    10_000
}

/// One scenario step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Write a record to the store.
    Put {
        /// Store view written.
        view: View,
        /// Key written.
        key: ResourceKey,
        /// Record body.
        #[serde(default)]
        record: serde_json::Value,
    },
    /// Delete a record from the store.
    Delete {
        /// Store view written.
        view: View,
        /// Key deleted.
        key: ResourceKey,
    },
    /// A route was created.
    Add {
        /// Route key.
        key: ResourceKey,
        /// The new route.
        route: Route,
    },
    /// A route changed.
    Update {
        /// Route key.
        key: ResourceKey,
        /// The route before the change.
        old: Route,
        /// The route after the change.
        new: Route,
    },
    /// A route was deleted.
    Remove {
        /// Route key.
        key: ResourceKey,
        /// The deleted route.
        old: Route,
    },
    /// Pause the replay.
    SleepMs(u64),
}

impl Scenario {
    /// Load a scenario from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, DemoError> {
        let contents = std::fs::read_to_string(path).map_err(|source| DemoError::ScenarioIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse a scenario from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, DemoError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Number of route change steps.
    pub fn change_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::Add { .. } | Step::Update { .. } | Step::Remove { .. }))
            .count()
    }
}

/// Replay `scenario` against `store` and `engine`.
pub async fn replay(scenario: &Scenario, store: &InMemoryStore, engine: &Engine<RouteProgrammer>) {
    for step in &scenario.steps {
        match step {
            Step::Put { view, key, record } => {
                let _ = store.put(*view, key.clone(), record.clone());
                info!(%view, key = %key, "store put");
            }
            Step::Delete { view, key } => {
                let _ = store.delete(*view, key.clone());
                info!(%view, key = %key, "store delete");
            }
            Step::Add { key, route } => {
                let change = Change::Add { new: route.clone() };
                log_outcome(key, &engine.on_change(key.clone(), change));
            }
            Step::Update { key, old, new } => {
                let change = Change::Update {
                    old: old.clone(),
                    new: new.clone(),
                };
                log_outcome(key, &engine.on_change(key.clone(), change));
            }
            Step::Remove { key, old } => {
                let change = Change::Remove { old: old.clone() };
                log_outcome(key, &engine.on_change(key.clone(), change));
            }
            Step::SleepMs(ms) => tokio::time::sleep(Duration::from_millis(*ms)).await,
        }
    }
}

fn log_outcome(key: &ResourceKey, outcome: &IntakeOutcome) {
    info!(key = %key, ?outcome, "change submitted");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use ldh_core::{Clock, DataStore, LdhConfig, ManualClock};

    use super::*;

    const SAMPLE: &str = r"
steps:
  - add:
      key: /routes/blue/r1
      route: { vpn: blue, prefix: 10.0.0.0/24, next_hop: 192.0.2.1 }
  - put: { view: desired, key: /vpn-instances/blue, record: { rd: '65000:1' } }
  - sleep_ms: 250
  - remove:
      key: /routes/blue/r1
      old: { vpn: blue, prefix: 10.0.0.0/24, next_hop: 192.0.2.1 }
  - delete: { view: desired, key: /vpn-instances/blue }
";

    #[test]
    fn parses_every_step_kind() {
        let scenario = Scenario::parse(SAMPLE).unwrap();
        assert_eq!(scenario.drain_timeout_ms, 10_000);
        assert_eq!(scenario.steps.len(), 5);
        assert_eq!(scenario.change_count(), 2);
        assert_eq!(scenario.steps.get(2), Some(&Step::SleepMs(250)));
        assert!(matches!(
            scenario.steps.get(1),
            Some(Step::Put { view: View::Desired, .. })
        ));
    }

    #[test]
    fn put_record_defaults_to_null() {
        let scenario =
            Scenario::parse("steps:\n  - put: { view: observed, key: /vpn-instances/red }\n")
                .unwrap();
        assert_eq!(
            scenario.steps.first(),
            Some(&Step::Put {
                view: View::Observed,
                key: ResourceKey::new("/vpn-instances/red"),
                record: serde_json::Value::Null,
            })
        );
    }

    #[test]
    fn unknown_step_is_rejected() {
        let err = Scenario::parse("steps:\n  - explode: {}\n").unwrap_err();
        assert!(matches!(err, DemoError::ScenarioYaml { .. }));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Scenario::from_file(Path::new("/nonexistent/scenario.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/scenario.yaml"));
    }

    #[tokio::test]
    async fn replayed_routes_program_once_their_vpn_appears() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let mut config = LdhConfig::default();
        config.scheduler.settle_delay_ms = 0;
        let engine = Engine::new(
            RouteProgrammer::new(Arc::clone(&store) as Arc<dyn DataStore>),
            Arc::clone(&store) as Arc<dyn DataStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            &config,
        )
        .unwrap();

        let scenario = Scenario::parse(
            r"
steps:
  - add:
      key: /routes/blue/r1
      route: { vpn: blue, prefix: 10.0.0.0/24, next_hop: 192.0.2.1 }
  - add:
      key: /routes/blue/r2
      route: { vpn: blue, prefix: 10.0.1.0/24, next_hop: 192.0.2.1 }
",
        )
        .unwrap();
        replay(&scenario, &store, &engine).await;
        engine.quiesce().await;
        assert!(engine.consumer().programmed().is_empty());

        let _ = store.put(
            View::Desired,
            "/vpn-instances/blue",
            serde_json::json!({"rd": "65000:1"}),
        );

        for _ in 0..4 {
            let _ = clock.advance(1_000);
            let _ = engine.tick();
            engine.quiesce().await;
        }
        assert_eq!(engine.consumer().programmed().len(), 2);
        assert_eq!(engine.stats().deferred, 2);
        assert_eq!(store.subscription_count(), 0);
    }
}
