//! Worker node identity and heartbeat record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered executor node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Executor {
    pub id: i64,
    pub host: String,
    pub pid: u32,
    pub executor_group: String,
    pub started: DateTime<Utc>,
    /// Last heartbeat.
    pub active: DateTime<Utc>,
    /// After this instant other nodes treat the executor as dead.
    pub expires: DateTime<Utc>,
    /// Set when the node shut down cleanly.
    pub stopped: Option<DateTime<Utc>>,
}

impl Executor {
    pub fn is_alive(&self, now: DateTime<Utc>) -> bool {
        self.stopped.is_none() && self.expires >= now
    }
}

/// Data recorded when a node starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorRegistration {
    pub host: String,
    pub pid: u32,
    pub executor_group: String,
    pub started: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}
