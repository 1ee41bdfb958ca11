//! Workflow definition contract.
//!
//! A definition declares the states of one workflow type and supplies the
//! handler the engine calls for every processable state. The engine treats
//! definitions polymorphically through [`registry::DefinitionRegistry`] and
//! never branches on a concrete workflow type.

pub mod box_definition;
pub mod registry;

use std::collections::BTreeMap;

use chrono::Duration;
use flowline_types::definition::{DefinitionSummary, StateKind, StateSummary};
use thiserror::Error;

/// A state declared by a workflow definition.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSpec {
    pub name: String,
    pub kind: StateKind,
    pub description: String,
}

impl StateSpec {
    pub fn new(name: impl Into<String>, kind: StateKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
        }
    }

    pub fn start(name: impl Into<String>) -> Self {
        Self::new(name, StateKind::Start)
    }

    pub fn normal(name: impl Into<String>) -> Self {
        Self::new(name, StateKind::Normal)
    }

    pub fn manual(name: impl Into<String>) -> Self {
        Self::new(name, StateKind::Manual)
    }

    pub fn end(name: impl Into<String>) -> Self {
        Self::new(name, StateKind::End)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Retry policy of one workflow type.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    /// Delay after the first failure.
    pub min_error_delay: Duration,
    /// Upper bound for the exponential back-off.
    pub max_error_delay: Duration,
    /// Failures tolerated in one state before the instance goes to manual.
    pub max_retries: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            min_error_delay: Duration::minutes(1),
            max_error_delay: Duration::days(1),
            max_retries: 17,
        }
    }
}

/// What a state handler wants to happen next.
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    /// Move to `state`, after `delay` if given.
    Advance {
        state: String,
        delay: Option<Duration>,
        text: Option<String>,
    },
    /// Stay in the current state and run the handler again later. Without an
    /// explicit delay the type's back-off applies.
    Retry {
        delay: Option<Duration>,
        text: Option<String>,
    },
    /// Give up; the instance goes to `manual` in its current state.
    FailPermanently { text: Option<String> },
    /// Hand the instance to an operator, optionally moving it to `state` first.
    GoToManual {
        state: Option<String>,
        text: Option<String>,
    },
    /// Done. Moves to `state` if given, otherwise stays put.
    Finish {
        state: Option<String>,
        text: Option<String>,
    },
}

impl NextAction {
    pub fn advance(state: impl Into<String>) -> Self {
        NextAction::Advance {
            state: state.into(),
            delay: None,
            text: None,
        }
    }

    pub fn advance_after(state: impl Into<String>, delay: Duration) -> Self {
        NextAction::Advance {
            state: state.into(),
            delay: Some(delay),
            text: None,
        }
    }

    pub fn retry(text: impl Into<String>) -> Self {
        NextAction::Retry {
            delay: None,
            text: Some(text.into()),
        }
    }

    pub fn retry_after(delay: Duration, text: impl Into<String>) -> Self {
        NextAction::Retry {
            delay: Some(delay),
            text: Some(text.into()),
        }
    }

    pub fn fail(text: impl Into<String>) -> Self {
        NextAction::FailPermanently {
            text: Some(text.into()),
        }
    }

    pub fn manual(state: impl Into<String>) -> Self {
        NextAction::GoToManual {
            state: Some(state.into()),
            text: None,
        }
    }

    pub fn finish(state: impl Into<String>) -> Self {
        NextAction::Finish {
            state: Some(state.into()),
            text: None,
        }
    }

    /// Attach diagnostic text stored as the instance's `state_text`.
    pub fn with_text(mut self, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match &mut self {
            NextAction::Advance { text, .. }
            | NextAction::Retry { text, .. }
            | NextAction::FailPermanently { text }
            | NextAction::GoToManual { text, .. }
            | NextAction::Finish { text, .. } => *text = value,
        }
        self
    }
}

/// A failed handler invocation. Handled by the retry policy.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("state handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        HandlerError::Failed(reason.into())
    }
}

/// Errors raised while registering definitions.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("workflow type '{0}' is already registered")]
    Duplicate(String),

    #[error("invalid definition for '{workflow_type}': {reason}")]
    Invalid {
        workflow_type: String,
        reason: String,
    },
}

/// The view of an instance a state handler works with.
///
/// Variables written through [`StateExecution::set_variable`] are persisted
/// together with the outcome of the handler.
#[derive(Debug, Clone)]
pub struct StateExecution {
    instance_id: i64,
    workflow_type: String,
    business_key: Option<String>,
    external_id: String,
    state: String,
    retries: u32,
    variables: BTreeMap<String, String>,
    changed: BTreeMap<String, String>,
}

impl StateExecution {
    pub fn new(
        instance_id: i64,
        workflow_type: impl Into<String>,
        state: impl Into<String>,
        variables: BTreeMap<String, String>,
    ) -> Self {
        Self {
            instance_id,
            workflow_type: workflow_type.into(),
            business_key: None,
            external_id: String::new(),
            state: state.into(),
            retries: 0,
            variables,
            changed: BTreeMap::new(),
        }
    }

    pub fn with_keys(mut self, business_key: Option<String>, external_id: impl Into<String>) -> Self {
        self.business_key = business_key;
        self.external_id = external_id.into();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn instance_id(&self) -> i64 {
        self.instance_id
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub fn business_key(&self) -> Option<&str> {
        self.business_key.as_deref()
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    /// State whose handler is running.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Failures so far in the current state.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn variable(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }

    /// Parse a variable, `None` if missing or unparseable.
    pub fn variable_as<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.variable(key).and_then(|v| v.parse().ok())
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Set a variable. Writing an unchanged value is not recorded.
    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if self.variables.get(&key) == Some(&value) {
            return;
        }
        self.variables.insert(key.clone(), value.clone());
        self.changed.insert(key, value);
    }

    pub fn changed_variables(&self) -> &BTreeMap<String, String> {
        &self.changed
    }

    /// Move on to the next state of a chained execution. Returns the variables
    /// changed during the previous step.
    pub(crate) fn advance_to(&mut self, state: &str, retries: u32) -> BTreeMap<String, String> {
        self.state = state.to_string();
        self.retries = retries;
        std::mem::take(&mut self.changed)
    }
}

/// A workflow type: its states and the handler for each processable one.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
/// Use [`box_definition::BoxWorkflowDefinition`] for dynamic dispatch.
pub trait WorkflowDefinition: Send + Sync {
    /// Unique type name instances refer to.
    fn workflow_type(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// State new instances start in unless the submitter picks one.
    fn initial_state(&self) -> &str;

    fn states(&self) -> &[StateSpec];

    fn settings(&self) -> WorkflowSettings {
        WorkflowSettings::default()
    }

    /// Run the handler of `execution.state()`.
    fn handle(
        &self,
        execution: &mut StateExecution,
    ) -> impl std::future::Future<Output = Result<NextAction, HandlerError>> + Send;
}

/// Persistable shape of a definition.
pub fn summarize(
    workflow_type: &str,
    description: &str,
    initial_state: &str,
    states: &[StateSpec],
) -> DefinitionSummary {
    DefinitionSummary {
        workflow_type: workflow_type.to_string(),
        description: description.to_string(),
        initial_state: initial_state.to_string(),
        states: states
            .iter()
            .map(|s| StateSummary {
                name: s.name.clone(),
                kind: s.kind,
                description: s.description.clone(),
            })
            .collect(),
    }
}
