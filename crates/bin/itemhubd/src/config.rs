//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `itemhub.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::path::PathBuf;
use std::time::Duration;

use itemhub_adapter_virtual::{NotifyConfig, VirtualConfig};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub commands: CommandsConfig,
    pub events: EventsConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub definitions: DefinitionsConfig,
    pub integrations: IntegrationsConfig,
}

/// Rule scheduler and snapshot timing.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between two evaluations of time-based triggers.
    pub tick_interval_ms: u64,
    /// Interval between two item snapshots, `0` disables periodic snapshots.
    pub snapshot_interval_secs: u64,
}

/// Outbound command queue settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub queue_capacity: usize,
    /// Upper bound of a single actor command call.
    pub actor_timeout_secs: u64,
}

/// Item event bus settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Where item and rule definitions live.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DefinitionsConfig {
    pub dir: PathBuf,
}

/// Per-integration settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    #[serde(rename = "virtual")]
    pub virtual_devices: VirtualConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Load configuration from `itemhub.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if a
    /// value is out of range.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("itemhub.toml")?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("ITEMHUB_CONFIG_DIR") {
            self.definitions.dir = PathBuf::from(val);
        }
        if let Some(val) = var("ITEMHUB_DATABASE_URL") {
            self.database.url = val;
        }
        if let Some(val) = var("ITEMHUB_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(tick) = var("ITEMHUB_TICK_MS").and_then(|val| val.parse().ok()) {
            self.scheduler.tick_interval_ms = tick;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "tick_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.commands.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "queue_capacity must be non-zero".to_string(),
            ));
        }
        if self.commands.actor_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "actor_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::Validation(
                "event capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_interval_ms)
    }

    /// `None` when periodic snapshots are disabled.
    #[must_use]
    pub fn snapshot_interval(&self) -> Option<Duration> {
        (self.scheduler.snapshot_interval_secs > 0)
            .then(|| Duration::from_secs(self.scheduler.snapshot_interval_secs))
    }

    #[must_use]
    pub fn actor_timeout(&self) -> Duration {
        Duration::from_secs(self.commands.actor_timeout_secs)
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            snapshot_interval_secs: 60,
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            actor_timeout_secs: 5,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:itemhub.db?mode=rwc".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "itemhubd=info,itemhub=info".to_string(),
        }
    }
}

impl Default for DefinitionsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("config"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.tick_interval_ms, 500);
        assert_eq!(config.scheduler.snapshot_interval_secs, 60);
        assert_eq!(config.commands.queue_capacity, 256);
        assert_eq!(config.commands.actor_timeout_secs, 5);
        assert_eq!(config.events.capacity, 1024);
        assert_eq!(config.database.url, "sqlite:itemhub.db?mode=rwc");
        assert_eq!(config.definitions.dir, PathBuf::from("config"));
        assert!(config.integrations.virtual_devices.enabled);
        assert!(config.integrations.notify.enabled);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [scheduler]
            tick_interval_ms = 250
            snapshot_interval_secs = 0

            [commands]
            queue_capacity = 16
            actor_timeout_secs = 2

            [events]
            capacity = 64

            [database]
            url = 'sqlite:test.db'

            [logging]
            filter = 'debug'

            [definitions]
            dir = '/etc/itemhub'

            [integrations.virtual]
            enabled = false
            poll_interval_secs = 1

            [integrations.virtual.devices]
            lamp-1 = 'OFF'

            [integrations.notify]
            channel = 'telegram'
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.snapshot_interval(), None);
        assert_eq!(config.commands.queue_capacity, 16);
        assert_eq!(config.actor_timeout(), Duration::from_secs(2));
        assert_eq!(config.events.capacity, 64);
        assert_eq!(config.database_url(), "sqlite:test.db");
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.definitions.dir, PathBuf::from("/etc/itemhub"));
        assert!(!config.integrations.virtual_devices.enabled);
        assert_eq!(config.integrations.virtual_devices.devices.len(), 1);
        assert_eq!(config.integrations.notify.channel, "telegram");
    }

    #[test]
    fn should_parse_partial_toml_with_defaults() {
        let config: Config = toml::from_str("[commands]\nqueue_capacity = 8").unwrap();
        assert_eq!(config.commands.queue_capacity, 8);
        assert_eq!(config.commands.actor_timeout_secs, 5);
        assert_eq!(config.scheduler.tick_interval_ms, 500);
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.scheduler.tick_interval_ms, 500);
    }

    #[test]
    fn should_apply_env_overrides() {
        let env = HashMap::from([
            ("ITEMHUB_CONFIG_DIR", "/srv/defs"),
            ("ITEMHUB_DATABASE_URL", "sqlite::memory:"),
            ("ITEMHUB_LOG", "warn"),
            ("ITEMHUB_TICK_MS", "100"),
        ]);
        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.definitions.dir, PathBuf::from("/srv/defs"));
        assert_eq!(config.database_url(), "sqlite::memory:");
        assert_eq!(config.logging.filter, "warn");
        assert_eq!(config.scheduler.tick_interval_ms, 100);
    }

    #[test]
    fn should_prefer_rust_log_over_itemhub_log() {
        let env = HashMap::from([("ITEMHUB_LOG", "warn"), ("RUST_LOG", "trace")]);
        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(ToString::to_string));
        assert_eq!(config.logging.filter, "trace");
    }

    #[test]
    fn should_ignore_unparsable_tick_override() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| (key == "ITEMHUB_TICK_MS").then(|| "soon".to_string()));
        assert_eq!(config.scheduler.tick_interval_ms, 500);
    }

    #[test]
    fn should_reject_zero_tick_interval() {
        let mut config = Config::default();
        config.scheduler.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_zero_queue_capacity() {
        let mut config = Config::default();
        config.commands.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_zero_actor_timeout() {
        let mut config = Config::default();
        config.commands.actor_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_accept_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }
}
