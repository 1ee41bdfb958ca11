//! Workflow instance domain types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::WorkflowInstanceAction;

/// A single unit of durable work moving through the states of its workflow type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Store-assigned identity.
    pub id: i64,
    /// Name of the workflow definition driving this instance.
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub business_key: Option<String>,
    pub external_id: String,
    /// Only executors of this group may claim the instance.
    pub executor_group: String,
    pub status: WorkflowInstanceStatus,
    pub state: String,
    /// Free-form diagnostic text set by the last transition.
    pub state_text: Option<String>,
    /// `None` means the instance is sleeping and will not be polled.
    pub next_activation: Option<DateTime<Utc>>,
    /// Consecutive failures in the current state.
    pub retries: u32,
    /// Owning executor; set exactly while the instance is claimed.
    pub executor_id: Option<i64>,
    /// Current value of every state variable.
    #[serde(default)]
    pub state_variables: BTreeMap<String, String>,
    /// Execution history, oldest first. Only loaded on request.
    #[serde(default)]
    pub actions: Vec<WorkflowInstanceAction>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// First time a state handler ran for this instance.
    pub started: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Whether the instance is currently owned by `executor_id`.
    pub fn is_owned_by(&self, executor_id: i64) -> bool {
        self.executor_id == Some(executor_id) && self.status == WorkflowInstanceStatus::Executing
    }
}

/// Lifecycle status of a workflow instance.
///
/// - Created: submitted, never executed
/// - InProgress: between executions, pollable once due
/// - Executing: claimed by an executor
/// - Manual: waiting for operator action
/// - Finished: reached a final state
/// - Stopped: halted by an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowInstanceStatus {
    Created,
    InProgress,
    Executing,
    Manual,
    Finished,
    Stopped,
}

impl WorkflowInstanceStatus {
    /// Statuses the claim predicate accepts.
    pub const POLLABLE: [WorkflowInstanceStatus; 2] = [
        WorkflowInstanceStatus::Created,
        WorkflowInstanceStatus::InProgress,
    ];

    pub fn is_pollable(self) -> bool {
        Self::POLLABLE.contains(&self)
    }

    /// Statuses that never carry a next activation.
    pub fn is_halted(self) -> bool {
        matches!(
            self,
            WorkflowInstanceStatus::Manual | WorkflowInstanceStatus::Finished | WorkflowInstanceStatus::Stopped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowInstanceStatus::Created => "created",
            WorkflowInstanceStatus::InProgress => "inProgress",
            WorkflowInstanceStatus::Executing => "executing",
            WorkflowInstanceStatus::Manual => "manual",
            WorkflowInstanceStatus::Finished => "finished",
            WorkflowInstanceStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkflowInstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowInstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(WorkflowInstanceStatus::Created),
            "inProgress" | "in_progress" => Ok(WorkflowInstanceStatus::InProgress),
            "executing" => Ok(WorkflowInstanceStatus::Executing),
            "manual" => Ok(WorkflowInstanceStatus::Manual),
            "finished" => Ok(WorkflowInstanceStatus::Finished),
            "stopped" => Ok(WorkflowInstanceStatus::Stopped),
            other => Err(format!("invalid instance status: '{other}'")),
        }
    }
}

impl Default for WorkflowInstanceStatus {
    fn default() -> Self {
        WorkflowInstanceStatus::Created
    }
}

/// A fully resolved instance ready to be inserted into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkflowInstance {
    pub workflow_type: String,
    pub business_key: Option<String>,
    pub external_id: String,
    pub executor_group: String,
    pub status: WorkflowInstanceStatus,
    pub state: String,
    pub state_text: Option<String>,
    pub next_activation: Option<DateTime<Utc>>,
    pub state_variables: BTreeMap<String, String>,
    pub created: DateTime<Utc>,
}

/// The row written back after a state handler ran.
///
/// `executor_id` is `Some` only when the instance stays claimed (status
/// `executing`), otherwise the write releases ownership.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceUpdate {
    pub id: i64,
    pub status: WorkflowInstanceStatus,
    pub state: String,
    pub state_text: Option<String>,
    pub next_activation: Option<DateTime<Utc>>,
    pub retries: u32,
    pub executor_id: Option<i64>,
    pub modified: DateTime<Utc>,
}

/// Administrative change to an unclaimed instance. `None` fields are left as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceChange {
    pub id: i64,
    pub state: Option<String>,
    pub status: Option<WorkflowInstanceStatus>,
    /// `Some(None)` puts the instance to sleep.
    pub next_activation: Option<Option<DateTime<Utc>>>,
    pub state_text: Option<String>,
    pub modified: DateTime<Utc>,
}

impl InstanceChange {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.status.is_none() && self.next_activation.is_none()
    }
}
