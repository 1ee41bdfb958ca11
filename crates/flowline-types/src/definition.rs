//! Serializable shape of a workflow definition.
//!
//! The executable definition lives in `flowline-core`; this is the part that
//! gets persisted for dashboards and returned by queries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Processing kind of a declared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    /// Entry point, processed automatically.
    Start,
    /// Processed automatically.
    Normal,
    /// Waits for an operator; never processed by the engine.
    Manual,
    /// Terminal.
    End,
}

impl StateKind {
    /// Whether the engine runs a handler for states of this kind.
    pub fn is_processable(self) -> bool {
        matches!(self, StateKind::Start | StateKind::Normal)
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Start => write!(f, "start"),
            StateKind::Normal => write!(f, "normal"),
            StateKind::Manual => write!(f, "manual"),
            StateKind::End => write!(f, "end"),
        }
    }
}

impl FromStr for StateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "start" => Ok(StateKind::Start),
            "normal" => Ok(StateKind::Normal),
            "manual" => Ok(StateKind::Manual),
            "end" => Ok(StateKind::End),
            other => Err(format!("invalid state kind: '{other}'")),
        }
    }
}

/// A declared state as stored in the definitions table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSummary {
    pub name: String,
    pub kind: StateKind,
    #[serde(default)]
    pub description: String,
}

/// Persisted summary of a registered workflow type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSummary {
    #[serde(rename = "type")]
    pub workflow_type: String,
    #[serde(default)]
    pub description: String,
    pub initial_state: String,
    pub states: Vec<StateSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_kind_processable() {
        assert!(StateKind::Start.is_processable());
        assert!(StateKind::Normal.is_processable());
        assert!(!StateKind::Manual.is_processable());
        assert!(!StateKind::End.is_processable());
    }

    #[test]
    fn test_summary_json_uses_type_key() {
        let summary = DefinitionSummary {
            workflow_type: "creditApplication".into(),
            description: String::new(),
            initial_state: "createCreditApplication".into(),
            states: vec![StateSummary {
                name: "createCreditApplication".into(),
                kind: StateKind::Start,
                description: String::new(),
            }],
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["type"], "creditApplication");
        assert_eq!(value["states"][0]["kind"], "start");
    }
}
