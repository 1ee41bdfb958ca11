//! Engine configuration for a Flowline worker node.
//!
//! `EngineConfig` represents `flowline.toml`. Every field has a default, so an
//! empty file (or no file) yields a working single-node setup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite connection URL. `None` resolves to the default data directory.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub claim: ClaimConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            executor: ExecutorConfig::default(),
            dispatcher: DispatcherConfig::default(),
            claim: ClaimConfig::default(),
            processor: ProcessorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.group.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "executor.group",
                reason: "must not be empty".into(),
            });
        }
        if self.executor.thread_count == 0 {
            return Err(ConfigError::Invalid {
                field: "executor.thread_count",
                reason: "must be at least 1".into(),
            });
        }
        if self.executor.keepalive_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "executor.keepalive_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.executor.keepalive_interval_secs >= self.executor.dead_node_timeout_secs {
            return Err(ConfigError::Invalid {
                field: "executor.dead_node_timeout_secs",
                reason: format!(
                    "must exceed keepalive_interval_secs ({})",
                    self.executor.keepalive_interval_secs
                ),
            });
        }
        if self.dispatcher.sleep_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatcher.sleep_ms",
                reason: "must be at least 1".into(),
            });
        }
        let threshold = self.claim.race_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "claim.race_threshold",
                reason: format!("must be in (0, 1], got {threshold}"),
            });
        }
        if self.processor.max_subsequent_executions == 0 {
            return Err(ConfigError::Invalid {
                field: "processor.max_subsequent_executions",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Worker node identity and pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Partition key; the node only claims instances of this group.
    #[serde(default = "default_group")]
    pub group: String,

    /// Maximum concurrently running state processors.
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,

    /// Accepted-but-not-running tasks on top of `thread_count`.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Tasks running longer than this are reported as stuck.
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,

    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Executors without a heartbeat for this long are considered dead.
    #[serde(default = "default_dead_node_timeout_secs")]
    pub dead_node_timeout_secs: u64,
}

fn default_group() -> String {
    "default".to_string()
}

fn default_thread_count() -> usize {
    8
}

fn default_queue_size() -> usize {
    16
}

fn default_stuck_threshold_secs() -> u64 {
    60
}

fn default_keepalive_interval_secs() -> u64 {
    30
}

fn default_dead_node_timeout_secs() -> u64 {
    900
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            thread_count: default_thread_count(),
            queue_size: default_queue_size(),
            stuck_threshold_secs: default_stuck_threshold_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            dead_node_timeout_secs: default_dead_node_timeout_secs(),
        }
    }
}

impl ExecutorConfig {
    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn dead_node_timeout(&self) -> Duration {
        Duration::from_secs(self.dead_node_timeout_secs)
    }
}

/// Dispatcher loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Idle sleep between polls that claimed nothing.
    #[serde(default = "default_sleep_ms")]
    pub sleep_ms: u64,

    /// Upper bound for draining running tasks at shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Store definition summaries when the dispatcher starts.
    #[serde(default = "default_true")]
    pub persist_definitions: bool,

    /// Minimum time between two stuck-processor warnings.
    #[serde(default = "default_stuck_warning_period_secs")]
    pub stuck_warning_period_secs: u64,
}

fn default_sleep_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_stuck_warning_period_secs() -> u64 {
    60
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            sleep_ms: default_sleep_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            persist_definitions: default_true(),
            stuck_warning_period_secs: default_stuck_warning_period_secs(),
        }
    }
}

impl DispatcherConfig {
    pub fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn stuck_warning_period(&self) -> Duration {
        Duration::from_secs(self.stuck_warning_period_secs)
    }
}

/// How the store claims a batch of instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStrategy {
    /// One conditional `UPDATE ... RETURNING` statement.
    #[default]
    UpdateReturning,
    /// Select candidates, then claim each with a guarded update.
    SelectThenUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimConfig {
    #[serde(default)]
    pub strategy: ClaimStrategy,

    /// Fraction of lost candidates at which a select-then-update claim is
    /// abandoned as a race condition.
    #[serde(default = "default_race_threshold")]
    pub race_threshold: f64,
}

fn default_race_threshold() -> f64 {
    1.0
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            strategy: ClaimStrategy::default(),
            race_threshold: default_race_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Cap on chained automatic transitions within one claim.
    #[serde(default = "default_max_subsequent_executions")]
    pub max_subsequent_executions: u32,
}

fn default_max_subsequent_executions() -> u32 {
    100
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_subsequent_executions: default_max_subsequent_executions(),
        }
    }
}
