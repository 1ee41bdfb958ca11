//! BoxWorkflowDefinition -- object-safe dynamic dispatch wrapper for WorkflowDefinition.
//!
//! 1. `WorkflowDefinitionDyn` is an object-safe mirror with boxed futures
//! 2. Blanket-impl `WorkflowDefinitionDyn` for all `T: WorkflowDefinition`
//! 3. `BoxWorkflowDefinition` wraps `Box<dyn WorkflowDefinitionDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use flowline_types::definition::DefinitionSummary;

use super::{HandlerError, NextAction, StateExecution, StateSpec, WorkflowDefinition, WorkflowSettings};

/// Object-safe version of [`WorkflowDefinition`] with boxed futures.
pub trait WorkflowDefinitionDyn: Send + Sync {
    fn workflow_type_dyn(&self) -> &str;

    fn description_dyn(&self) -> &str;

    fn initial_state_dyn(&self) -> &str;

    fn states_dyn(&self) -> &[StateSpec];

    fn settings_dyn(&self) -> WorkflowSettings;

    fn handle_boxed<'a>(
        &'a self,
        execution: &'a mut StateExecution,
    ) -> Pin<Box<dyn Future<Output = Result<NextAction, HandlerError>> + Send + 'a>>;
}

impl<T: WorkflowDefinition> WorkflowDefinitionDyn for T {
    fn workflow_type_dyn(&self) -> &str {
        self.workflow_type()
    }

    fn description_dyn(&self) -> &str {
        self.description()
    }

    fn initial_state_dyn(&self) -> &str {
        self.initial_state()
    }

    fn states_dyn(&self) -> &[StateSpec] {
        self.states()
    }

    fn settings_dyn(&self) -> WorkflowSettings {
        self.settings()
    }

    fn handle_boxed<'a>(
        &'a self,
        execution: &'a mut StateExecution,
    ) -> Pin<Box<dyn Future<Output = Result<NextAction, HandlerError>> + Send + 'a>> {
        Box::pin(self.handle(execution))
    }
}

/// Type-erased workflow definition held by the registry.
pub struct BoxWorkflowDefinition {
    inner: Box<dyn WorkflowDefinitionDyn + Send + Sync>,
}

impl BoxWorkflowDefinition {
    pub fn new<T: WorkflowDefinition + 'static>(definition: T) -> Self {
        Self {
            inner: Box::new(definition),
        }
    }

    pub fn workflow_type(&self) -> &str {
        self.inner.workflow_type_dyn()
    }

    pub fn description(&self) -> &str {
        self.inner.description_dyn()
    }

    pub fn initial_state(&self) -> &str {
        self.inner.initial_state_dyn()
    }

    pub fn states(&self) -> &[StateSpec] {
        self.inner.states_dyn()
    }

    pub fn settings(&self) -> WorkflowSettings {
        self.inner.settings_dyn()
    }

    /// Look up a declared state by name.
    pub fn state(&self, name: &str) -> Option<&StateSpec> {
        self.states().iter().find(|s| s.name == name)
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.state(name).is_some()
    }

    pub async fn handle(&self, execution: &mut StateExecution) -> Result<NextAction, HandlerError> {
        self.inner.handle_boxed(execution).await
    }

    pub fn summary(&self) -> DefinitionSummary {
        super::summarize(
            self.workflow_type(),
            self.description(),
            self.initial_state(),
            self.states(),
        )
    }
}

impl std::fmt::Debug for BoxWorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxWorkflowDefinition")
            .field("workflow_type", &self.workflow_type())
            .finish()
    }
}
