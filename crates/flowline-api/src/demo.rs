//! Workflow definitions registered by the `flowline` binary.
//!
//! A node only executes types it has definitions for, so these double as the
//! reference shapes for application-defined workflows.

use flowline_core::definition::registry::DefinitionRegistry;
use flowline_core::definition::{
    HandlerError, NextAction, StateExecution, StateSpec, WorkflowDefinition, WorkflowSettings,
};

/// Largest amount previewed without going to a credit officer.
const AUTO_APPROVE_LIMIT: u64 = 50_000;

/// Build the registry of definitions this binary runs.
pub fn registry() -> anyhow::Result<DefinitionRegistry> {
    let mut registry = DefinitionRegistry::new();
    registry.register(CreditApplicationWorkflow::new())?;
    registry.register(ReminderWorkflow::new())?;
    Ok(registry)
}

/// Credit application: preview, wait for acceptance, grant, finish.
///
/// `acceptCreditApplication` is a manual state; an operator moves the
/// instance on with `flowline update <id> --state grantLoan --activate`.
pub struct CreditApplicationWorkflow {
    states: Vec<StateSpec>,
}

impl CreditApplicationWorkflow {
    pub fn new() -> Self {
        Self {
            states: vec![
                StateSpec::start("previewCreditApplication")
                    .with_description("Validate the requested amount"),
                StateSpec::manual("acceptCreditApplication")
                    .with_description("Waiting for a credit officer"),
                StateSpec::normal("grantLoan").with_description("Open the loan account"),
                StateSpec::normal("finishCreditApplication")
                    .with_description("Notify the customer"),
                StateSpec::end("done").with_description("Loan granted"),
                StateSpec::manual("error").with_description("Application needs attention"),
            ],
        }
    }
}

impl WorkflowDefinition for CreditApplicationWorkflow {
    fn workflow_type(&self) -> &str {
        "creditApplication"
    }

    fn description(&self) -> &str {
        "Credit application with a manual acceptance step"
    }

    fn initial_state(&self) -> &str {
        "previewCreditApplication"
    }

    fn states(&self) -> &[StateSpec] {
        &self.states
    }

    async fn handle(&self, execution: &mut StateExecution) -> Result<NextAction, HandlerError> {
        match execution.state() {
            "previewCreditApplication" => {
                let Some(amount) = execution.variable_as::<u64>("amount") else {
                    return Ok(NextAction::manual("error").with_text("missing or invalid 'amount' variable"));
                };
                if amount <= AUTO_APPROVE_LIMIT {
                    execution.set_variable("preview", "approved");
                    Ok(NextAction::advance("grantLoan").with_text("approved automatically"))
                } else {
                    execution.set_variable("preview", "review");
                    Ok(NextAction::manual("acceptCreditApplication")
                        .with_text(format!("amount {amount} above automatic limit")))
                }
            }
            "grantLoan" => {
                let loan_id = format!("loan-{}", execution.instance_id());
                execution.set_variable("loanId", loan_id.clone());
                Ok(NextAction::advance("finishCreditApplication").with_text(format!("granted {loan_id}")))
            }
            "finishCreditApplication" => Ok(NextAction::finish("done")),
            other => Err(HandlerError::failed(format!("no handler for state '{other}'"))),
        }
    }
}

/// Sends `count` reminders (default 3), one every `intervalSecs` (default 60).
pub struct ReminderWorkflow {
    states: Vec<StateSpec>,
}

impl ReminderWorkflow {
    pub fn new() -> Self {
        Self {
            states: vec![
                StateSpec::start("schedule"),
                StateSpec::normal("remind"),
                StateSpec::end("done"),
            ],
        }
    }
}

impl WorkflowDefinition for ReminderWorkflow {
    fn workflow_type(&self) -> &str {
        "reminder"
    }

    fn description(&self) -> &str {
        "Periodic reminder with a fixed number of rounds"
    }

    fn initial_state(&self) -> &str {
        "schedule"
    }

    fn states(&self) -> &[StateSpec] {
        &self.states
    }

    fn settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            max_retries: 3,
            ..WorkflowSettings::default()
        }
    }

    async fn handle(&self, execution: &mut StateExecution) -> Result<NextAction, HandlerError> {
        let interval = chrono::Duration::seconds(execution.variable_as::<i64>("intervalSecs").unwrap_or(60));
        match execution.state() {
            "schedule" => {
                execution.set_variable("sent", "0");
                Ok(NextAction::advance_after("remind", interval))
            }
            "remind" => {
                let sent = execution.variable_as::<u32>("sent").unwrap_or(0) + 1;
                let count = execution.variable_as::<u32>("count").unwrap_or(3);
                tracing::info!(instance_id = execution.instance_id(), sent, count, "reminder sent");
                execution.set_variable("sent", sent.to_string());
                if sent >= count {
                    Ok(NextAction::finish("done"))
                } else {
                    Ok(NextAction::advance_after("remind", interval))
                }
            }
            other => Err(HandlerError::failed(format!("no handler for state '{other}'"))),
        }
    }
}
