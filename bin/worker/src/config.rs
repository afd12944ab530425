//! Centralized worker configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys (`NATS__URL`, `SWEEPER__BATCH_SIZE`, ...).

use flowline_engine::{EngineConfig, NatsConfig};
use serde::Deserialize;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Maximum pooled database connections.
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// NATS connection and stream names.
    pub nats: NatsSettings,

    /// Periodic worker cadence.
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Engine tunables.
    #[serde(default)]
    pub engine: EngineSettings,

    /// Notification delivery.
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// NATS settings; names fall back to the bus defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsSettings {
    pub url: String,
    #[serde(default)]
    pub work_stream_name: Option<String>,
    #[serde(default)]
    pub notification_stream_name: Option<String>,
    #[serde(default)]
    pub consumer_name: Option<String>,
}

impl NatsSettings {
    #[must_use]
    pub fn to_nats_config(&self) -> NatsConfig {
        NatsConfig {
            url: self.url.clone(),
            work_stream_name: self.work_stream_name.clone(),
            notification_stream_name: self.notification_stream_name.clone(),
            consumer_name: self.consumer_name.clone(),
        }
    }
}

/// Intervals of the periodic workers, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_execution_interval_seconds")]
    pub execution_interval_seconds: u64,

    #[serde(default = "default_ramp_up_interval_seconds")]
    pub ramp_up_interval_seconds: u64,

    #[serde(default = "default_statistics_interval_seconds")]
    pub statistics_interval_seconds: u64,

    #[serde(default = "default_reschedule_interval_seconds")]
    pub reschedule_interval_seconds: u64,

    /// Executions processed per tenant per sweep.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_operation_timeout_minutes")]
    pub operation_timeout_minutes: u64,

    /// Seed for send-time jitter. Entropy when absent.
    #[serde(default)]
    pub rng_seed: Option<u64>,

    #[serde(default = "default_app_source")]
    pub app_source: String,
}

/// Notification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Endpoint of the notification service. Notifications are only logged
    /// when absent.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_goal_achieved_workflow_id")]
    pub goal_achieved_workflow_id: String,

    #[serde(default = "default_notifier_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_database_max_connections() -> u32 {
    5
}

fn default_execution_interval_seconds() -> u64 {
    60
}

fn default_ramp_up_interval_seconds() -> u64 {
    3600
}

fn default_statistics_interval_seconds() -> u64 {
    300
}

fn default_reschedule_interval_seconds() -> u64 {
    900
}

fn default_batch_size() -> usize {
    100
}

fn default_operation_timeout_minutes() -> u64 {
    30
}

fn default_app_source() -> String {
    "flowline-worker".to_string()
}

fn default_goal_achieved_workflow_id() -> String {
    "flow-goal-achieved".to_string()
}

fn default_notifier_timeout_seconds() -> u64 {
    10
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            execution_interval_seconds: default_execution_interval_seconds(),
            ramp_up_interval_seconds: default_ramp_up_interval_seconds(),
            statistics_interval_seconds: default_statistics_interval_seconds(),
            reschedule_interval_seconds: default_reschedule_interval_seconds(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            operation_timeout_minutes: default_operation_timeout_minutes(),
            rng_seed: None,
            app_source: default_app_source(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            url: None,
            goal_achieved_workflow_id: default_goal_achieved_workflow_id(),
            timeout_seconds: default_notifier_timeout_seconds(),
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// The engine configuration derived from these settings.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            operation_timeout: Duration::from_secs(self.engine.operation_timeout_minutes * 60),
            app_source: self.engine.app_source.clone(),
            sweep_batch_size: self.sweeper.batch_size,
            goal_notification_workflow: self.notifier.goal_achieved_workflow_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweeper_config_has_correct_defaults() {
        let config = SweeperConfig::default();
        assert_eq!(config.execution_interval_seconds, 60);
        assert_eq!(config.ramp_up_interval_seconds, 3600);
        assert_eq!(config.statistics_interval_seconds, 300);
        assert_eq!(config.reschedule_interval_seconds, 900);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn engine_config_follows_settings() {
        let config = WorkerConfig {
            database_url: "postgres://localhost/flowline".to_string(),
            database_max_connections: default_database_max_connections(),
            nats: NatsSettings {
                url: "nats://localhost:4222".to_string(),
                work_stream_name: None,
                notification_stream_name: None,
                consumer_name: Some("worker-2".to_string()),
            },
            sweeper: SweeperConfig {
                batch_size: 25,
                ..SweeperConfig::default()
            },
            engine: EngineSettings {
                operation_timeout_minutes: 5,
                ..EngineSettings::default()
            },
            notifier: NotifierConfig::default(),
        };

        let engine = config.engine_config();
        assert_eq!(engine.operation_timeout, Duration::from_secs(300));
        assert_eq!(engine.sweep_batch_size, 25);
        assert_eq!(engine.app_source, "flowline-worker");
        assert_eq!(engine.goal_notification_workflow, "flow-goal-achieved");
        assert_eq!(config.nats.to_nats_config().consumer_name.as_deref(), Some("worker-2"));
    }
}
