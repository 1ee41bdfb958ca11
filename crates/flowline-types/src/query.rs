//! Read-side filters and aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instance::WorkflowInstanceStatus;

/// What to load alongside the instance row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIncludes {
    pub current_state_variables: bool,
    pub actions: bool,
    /// Per-action variable versions; implies `actions`.
    pub action_state_variables: bool,
}

impl InstanceIncludes {
    pub fn all() -> Self {
        Self {
            current_state_variables: true,
            actions: true,
            action_state_variables: true,
        }
    }

    pub fn variables() -> Self {
        Self {
            current_state_variables: true,
            ..Self::default()
        }
    }
}

/// Instance search criteria. Empty vectors and `None` do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceQuery {
    #[serde(default)]
    pub ids: Vec<i64>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default)]
    pub statuses: Vec<WorkflowInstanceStatus>,
    pub business_key: Option<String>,
    pub external_id: Option<String>,
    pub executor_group: Option<String>,
    #[serde(default)]
    pub includes: InstanceIncludes,
    pub max_results: Option<u32>,
}

/// Default cap on query results when the caller does not set one.
pub const DEFAULT_MAX_RESULTS: u32 = 100;

/// Time windows for [`StateExecutionStatistics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsFilter {
    pub workflow_type: String,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
}

/// Instance counts for one state, bucketed by scheduling situation.
///
/// - executing: claimed by an executor
/// - queued: unclaimed and due
/// - sleeping: unclaimed, activation in the future
/// - non_scheduled: unclaimed, no activation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateExecutionStatistics {
    pub executing: u64,
    pub queued: u64,
    pub sleeping: u64,
    pub non_scheduled: u64,
}

impl StateExecutionStatistics {
    pub fn total(&self) -> u64 {
        self.executing + self.queued + self.sleeping + self.non_scheduled
    }
}
