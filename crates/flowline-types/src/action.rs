//! Append-only execution history of a workflow instance.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an action row was appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    /// A state handler ran and returned an outcome.
    StateExecution,
    /// A state handler failed or the instance could not be processed.
    StateExecutionFailed,
    /// An operator changed the instance while it was not claimed.
    ExternalChange,
    /// Ownership was reclaimed from a dead executor.
    Recovery,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::StateExecution => "stateExecution",
            ActionType::StateExecutionFailed => "stateExecutionFailed",
            ActionType::ExternalChange => "externalChange",
            ActionType::Recovery => "recovery",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stateExecution" => Ok(ActionType::StateExecution),
            "stateExecutionFailed" => Ok(ActionType::StateExecutionFailed),
            "externalChange" => Ok(ActionType::ExternalChange),
            "recovery" => Ok(ActionType::Recovery),
            other => Err(format!("invalid action type: '{other}'")),
        }
    }
}

/// One immutable history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstanceAction {
    pub id: i64,
    pub instance_id: i64,
    /// `None` for changes made outside any executor.
    pub executor_id: Option<i64>,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// State the instance was in when the action started.
    pub state: String,
    pub state_text: Option<String>,
    pub retry_no: u32,
    pub execution_start: DateTime<Utc>,
    pub execution_end: DateTime<Utc>,
    /// Variables written by this action; only loaded on request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub updated_state_variables: BTreeMap<String, String>,
}

/// An action about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub instance_id: i64,
    pub executor_id: Option<i64>,
    pub action_type: ActionType,
    pub state: String,
    pub state_text: Option<String>,
    pub retry_no: u32,
    pub execution_start: DateTime<Utc>,
    pub execution_end: DateTime<Utc>,
}
