//! Definition registry for runtime workflow-type lookup.
//!
//! Populated once at startup from an explicit list. Registering the same type
//! twice is a configuration error reported immediately.

use std::collections::HashMap;
use std::sync::Arc;

use flowline_types::definition::DefinitionSummary;

use super::box_definition::BoxWorkflowDefinition;
use super::{DefinitionError, WorkflowDefinition};

/// Registry of workflow definitions, indexed by workflow type.
#[derive(Debug)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, Arc<BoxWorkflowDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// Validate and register a definition under its workflow type.
    pub fn register<T: WorkflowDefinition + 'static>(&mut self, definition: T) -> Result<(), DefinitionError> {
        self.register_boxed(BoxWorkflowDefinition::new(definition))
    }

    pub fn register_boxed(&mut self, definition: BoxWorkflowDefinition) -> Result<(), DefinitionError> {
        let workflow_type = definition.workflow_type().to_string();
        validate(&definition)?;
        if self.definitions.contains_key(&workflow_type) {
            return Err(DefinitionError::Duplicate(workflow_type));
        }
        tracing::debug!(workflow_type = %workflow_type, "registered workflow definition");
        self.definitions.insert(workflow_type, Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, workflow_type: &str) -> Option<Arc<BoxWorkflowDefinition>> {
        self.definitions.get(workflow_type).cloned()
    }

    /// Registered workflow types, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.definitions.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    pub fn summaries(&self) -> Vec<DefinitionSummary> {
        let mut summaries: Vec<DefinitionSummary> =
            self.definitions.values().map(|d| d.summary()).collect();
        summaries.sort_by(|a, b| a.workflow_type.cmp(&b.workflow_type));
        summaries
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(definition: &BoxWorkflowDefinition) -> Result<(), DefinitionError> {
    let invalid = |reason: String| DefinitionError::Invalid {
        workflow_type: definition.workflow_type().to_string(),
        reason,
    };

    if definition.workflow_type().trim().is_empty() {
        return Err(invalid("workflow type must not be empty".into()));
    }

    let mut seen = std::collections::HashSet::new();
    for state in definition.states() {
        if !seen.insert(state.name.as_str()) {
            return Err(invalid(format!("state '{}' declared twice", state.name)));
        }
    }

    match definition.state(definition.initial_state()) {
        None => Err(invalid(format!(
            "initial state '{}' is not declared",
            definition.initial_state()
        ))),
        Some(state) if !state.kind.is_processable() => Err(invalid(format!(
            "initial state '{}' is a {} state",
            state.name, state.kind
        ))),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{HandlerError, NextAction, StateExecution, StateSpec};

    struct Dummy {
        workflow_type: &'static str,
        initial: &'static str,
        states: Vec<StateSpec>,
    }

    impl Dummy {
        fn new(workflow_type: &'static str) -> Self {
            Self {
                workflow_type,
                initial: "begin",
                states: vec![StateSpec::start("begin"), StateSpec::end("done")],
            }
        }
    }

    impl WorkflowDefinition for Dummy {
        fn workflow_type(&self) -> &str {
            self.workflow_type
        }

        fn initial_state(&self) -> &str {
            self.initial
        }

        fn states(&self) -> &[StateSpec] {
            &self.states
        }

        async fn handle(&self, _execution: &mut StateExecution) -> Result<NextAction, HandlerError> {
            Ok(NextAction::finish("done"))
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = DefinitionRegistry::new();
        registry.register(Dummy::new("dummy")).unwrap();

        let def = registry.get("dummy").unwrap();
        assert_eq!(def.initial_state(), "begin");
        assert!(def.has_state("done"));
        assert!(registry.get("other").is_none());
        assert_eq!(registry.types(), vec!["dummy"]);
    }

    #[test]
    fn test_duplicate_type_is_rejected() {
        let mut registry = DefinitionRegistry::new();
        registry.register(Dummy::new("dummy")).unwrap();

        let err = registry.register(Dummy::new("dummy")).unwrap_err();
        assert!(matches!(err, DefinitionError::Duplicate(ref t) if t == "dummy"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_undeclared_initial_state_is_rejected() {
        let mut dummy = Dummy::new("dummy");
        dummy.initial = "missing";
        let err = DefinitionRegistry::new().register(dummy).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_final_initial_state_is_rejected() {
        let mut dummy = Dummy::new("dummy");
        dummy.initial = "done";
        assert!(DefinitionRegistry::new().register(dummy).is_err());
    }

    #[test]
    fn test_duplicate_state_is_rejected() {
        let mut dummy = Dummy::new("dummy");
        dummy.states.push(StateSpec::normal("begin"));
        assert!(DefinitionRegistry::new().register(dummy).is_err());
    }

    #[tokio::test]
    async fn test_boxed_handle_delegates() {
        let mut registry = DefinitionRegistry::new();
        registry.register(Dummy::new("dummy")).unwrap();
        let def = registry.get("dummy").unwrap();

        let mut execution = StateExecution::new(1, "dummy", "begin", Default::default());
        let next = def.handle(&mut execution).await.unwrap();
        assert_eq!(next, NextAction::finish("done"));

        let summary = def.summary();
        assert_eq!(summary.states.len(), 2);
        assert_eq!(summary.initial_state, "begin");
    }
}
