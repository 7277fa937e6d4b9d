//! Configuration loading and typed config structures for the scheduler.
//!
//! The canonical configuration lives in `ldh-config.yaml` at the project
//! root. Every key is optional; omitted keys take the defaults below, which
//! match the values the scheduler was tuned with in production:
//!
//! | Key | Default |
//! |-----|---------|
//! | `scheduler.tick_interval_ms` | 1000 |
//! | `scheduler.settle_delay_ms` | 2000 |
//! | `scheduler.dispatch_workers` | 4 |
//! | `scheduler.lock_stripes` | 64 |
//! | `retry.<add/update/remove>.retry_interval_ms` | 1000 |
//! | `retry.<add/update/remove>.expiry_retries` | 100 |
//! | `logging.level` | `info` |
//! | `logging.json` | `false` |

use std::path::Path;

use ldh_types::EventType;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LdhConfig {
    /// Poller, settle buffer and dispatcher settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Default retry and expiry budget per event type.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LdhConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `LDH_TICK_INTERVAL_MS` overrides `scheduler.tick_interval_ms`
    /// - `LDH_SETTLE_DELAY_MS` overrides `scheduler.settle_delay_ms`
    /// - `LDH_LOG_LEVEL` overrides `logging.level`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by variable name.
    ///
    /// Values that do not parse are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("LDH_TICK_INTERVAL_MS") {
            match val.trim().parse() {
                Ok(ms) => self.scheduler.tick_interval_ms = ms,
                Err(e) => tracing::warn!(value = %val, error = %e, "ignoring LDH_TICK_INTERVAL_MS"),
            }
        }
        if let Some(val) = lookup("LDH_SETTLE_DELAY_MS") {
            match val.trim().parse() {
                Ok(ms) => self.scheduler.settle_delay_ms = ms,
                Err(e) => tracing::warn!(value = %val, error = %e, "ignoring LDH_SETTLE_DELAY_MS"),
            }
        }
        if let Some(val) = lookup("LDH_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Reject values the scheduler cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_owned(),
            })
        };
        if self.scheduler.tick_interval_ms == 0 {
            return invalid("scheduler.tick_interval_ms must be at least 1");
        }
        if self.scheduler.dispatch_workers == 0 {
            return invalid("scheduler.dispatch_workers must be at least 1");
        }
        if self.scheduler.lock_stripes == 0 {
            return invalid("scheduler.lock_stripes must be at least 1");
        }
        for event_type in EventType::ALL {
            if self.retry.policy(event_type).retry_interval_ms == 0 {
                return Err(ConfigError::Invalid {
                    reason: format!("retry.{event_type}.retry_interval_ms must be at least 1"),
                });
            }
        }
        Ok(())
    }
}

/// Poller, settle buffer and dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Milliseconds between poller ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Minimum dwell of a resolved event before dispatch.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Maximum number of consumer callbacks running at once per engine.
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,

    /// Number of stripes in each per-key and per-pattern lock table.
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            dispatch_workers: default_dispatch_workers(),
            lock_stripes: default_lock_stripes(),
        }
    }
}

/// Default retry budgets, one per event type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Budget for ADD events.
    #[serde(default)]
    pub add: RetryPolicy,

    /// Budget for UPDATE events.
    #[serde(default)]
    pub update: RetryPolicy,

    /// Budget for REMOVE events.
    #[serde(default)]
    pub remove: RetryPolicy,
}

impl RetryConfig {
    /// The budget for events of the given type.
    pub const fn policy(&self, event_type: EventType) -> &RetryPolicy {
        match event_type {
            EventType::Add => &self.add,
            EventType::Update => &self.update,
            EventType::Remove => &self.remove,
        }
    }
}

/// How often a timer-based event is re-checked and how long it may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Milliseconds between dependency re-checks.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Number of retry intervals before the event expires.
    #[serde(default = "default_expiry_retries")]
    pub expiry_retries: u64,
}

impl RetryPolicy {
    /// Total wait budget: `retry_interval_ms * expiry_retries`, saturating.
    pub const fn expiry_ms(&self) -> u64 {
        self.retry_interval_ms.saturating_mul(self.expiry_retries)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            expiry_retries: default_expiry_retries(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

const fn default_tick_interval_ms() -> u64 {
    1000
}

const fn default_settle_delay_ms() -> u64 {
    2000
}

const fn default_dispatch_workers() -> usize {
    4
}

const fn default_lock_stripes() -> usize {
    64
}

const fn default_retry_interval_ms() -> u64 {
    1000
}

const fn default_expiry_retries() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = LdhConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.scheduler.settle_delay_ms, 2000);
        assert_eq!(config.retry.add.retry_interval_ms, 1000);
        assert_eq!(config.retry.remove.expiry_retries, 100);
        assert_eq!(config.retry.update.expiry_ms(), 100_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
scheduler:
  tick_interval_ms: 250
  settle_delay_ms: 500
  dispatch_workers: 2
  lock_stripes: 8

retry:
  add:
    retry_interval_ms: 100
    expiry_retries: 5
  remove:
    retry_interval_ms: 200

logging:
  level: debug
  json: true
";
        let config = LdhConfig::parse(yaml);
        assert!(config.is_ok(), "{config:?}");
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.scheduler.tick_interval_ms, 250);
        assert_eq!(config.scheduler.dispatch_workers, 2);
        assert_eq!(config.retry.policy(EventType::Add).expiry_ms(), 500);
        assert_eq!(config.retry.policy(EventType::Remove).retry_interval_ms, 200);
        assert_eq!(config.retry.policy(EventType::Remove).expiry_retries, 100);
        assert_eq!(config.retry.policy(EventType::Update), &RetryPolicy::default());
        assert!(config.logging.json);
    }

    #[test]
    fn parse_empty_yaml() {
        let config = LdhConfig::parse("");
        assert!(config.is_ok());
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let result = LdhConfig::parse("scheduler:\n  tick_interval_ms: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn zero_retry_interval_names_the_event_type() {
        let result = LdhConfig::parse("retry:\n  update:\n    retry_interval_ms: 0\n");
        assert!(
            matches!(&result, Err(ConfigError::Invalid { reason }) if reason.contains("update")),
            "expected an invalid-update rejection, got {result:?}"
        );
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LDH_TICK_INTERVAL_MS", "50"),
            ("LDH_SETTLE_DELAY_MS", "soon"),
            ("LDH_LOG_LEVEL", "trace"),
        ]);
        let mut config = LdhConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| (*v).to_owned()));
        assert_eq!(config.scheduler.tick_interval_ms, 50);
        assert_eq!(config.scheduler.settle_delay_ms, 2000);
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("ldh-config.yaml");
        if path.exists() {
            let config = LdhConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
