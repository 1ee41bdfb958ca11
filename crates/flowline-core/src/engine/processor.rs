//! Executes one claimed workflow instance.
//!
//! The processor loads the instance, runs the handler of its current state,
//! turns the returned [`NextAction`] into a new status/state/activation, and
//! writes instance row, action and changed variables in one ownership-guarded
//! transaction. While the next state is immediately processable it keeps the
//! claim and runs again, up to `max_subsequent_executions` times.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use flowline_types::action::{ActionType, NewAction};
use flowline_types::definition::StateKind;
use flowline_types::error::RepositoryError;
use flowline_types::instance::{InstanceUpdate, WorkflowInstance, WorkflowInstanceStatus};
use flowline_types::query::InstanceIncludes;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::definition::box_definition::BoxWorkflowDefinition;
use crate::definition::registry::DefinitionRegistry;
use crate::definition::{HandlerError, NextAction, StateExecution, WorkflowSettings};
use crate::engine::retry::{error_delay, retries_exhausted};
use crate::repository::instance::InstanceRepository;

/// How a processing attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Handlers ran and every outcome was persisted.
    Executed { executions: u32 },
    /// Another executor took the instance before the last write.
    OwnershipLost { executions: u32 },
    /// Unknown type or state; the instance stays claimed for inspection.
    Parked,
    /// The instance was not claimed by this executor when loaded.
    Skipped,
    NotFound,
}

/// Status, state and schedule decided from one handler outcome.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Transition {
    pub status: WorkflowInstanceStatus,
    pub state: String,
    pub text: Option<String>,
    pub next_activation: Option<DateTime<Utc>>,
    pub retries: u32,
    /// Recorded as a `stateExecutionFailed` action.
    pub failed: bool,
    /// Next state is processable right away.
    pub chainable: bool,
}

pub struct StateProcessor<I> {
    instances: Arc<I>,
    registry: Arc<DefinitionRegistry>,
    clock: Arc<dyn Clock>,
    executor_id: i64,
    max_subsequent_executions: u32,
    shutdown: CancellationToken,
}

impl<I: InstanceRepository> StateProcessor<I> {
    pub fn new(
        instances: Arc<I>,
        registry: Arc<DefinitionRegistry>,
        clock: Arc<dyn Clock>,
        executor_id: i64,
        max_subsequent_executions: u32,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            instances,
            registry,
            clock,
            executor_id,
            max_subsequent_executions: max_subsequent_executions.max(1),
            shutdown,
        }
    }

    /// Process an instance, logging instead of returning store failures.
    /// This is the worker pool task body.
    pub async fn run(&self, instance_id: i64) {
        match self.process(instance_id).await {
            Ok(outcome) => {
                tracing::debug!(instance_id, ?outcome, "workflow instance processed");
            }
            Err(e) => {
                tracing::error!(
                    instance_id,
                    error = %e,
                    "failed to persist workflow instance execution"
                );
            }
        }
    }

    pub async fn process(&self, instance_id: i64) -> Result<ProcessOutcome, RepositoryError> {
        let Some(instance) = self
            .instances
            .get_instance(instance_id, InstanceIncludes::variables())
            .await?
        else {
            tracing::warn!(instance_id, "claimed workflow instance not found");
            return Ok(ProcessOutcome::NotFound);
        };

        if !instance.is_owned_by(self.executor_id) {
            tracing::warn!(
                instance_id,
                owner = ?instance.executor_id,
                status = %instance.status,
                "workflow instance not owned by this executor, skipping"
            );
            return Ok(ProcessOutcome::Skipped);
        }

        let Some(definition) = self.registry.get(&instance.workflow_type) else {
            let reason = format!("unknown workflow type '{}'", instance.workflow_type);
            return self.park(&instance, reason).await;
        };
        let settings = definition.settings();

        let mut execution = StateExecution::new(
            instance.id,
            &instance.workflow_type,
            &instance.state,
            instance.state_variables.clone(),
        )
        .with_keys(instance.business_key.clone(), instance.external_id.clone())
        .with_retries(instance.retries);

        let Some(spec) = definition.state(&instance.state) else {
            let reason = format!(
                "state '{}' is not declared by workflow type '{}'",
                instance.state, instance.workflow_type
            );
            return self.park(&instance, reason).await;
        };

        if !spec.kind.is_processable() {
            let now = self.clock.now();
            let transition = Transition {
                status: if spec.kind == StateKind::End {
                    WorkflowInstanceStatus::Finished
                } else {
                    WorkflowInstanceStatus::Manual
                },
                state: instance.state.clone(),
                text: Some(format!("state '{}' is a {} state", instance.state, spec.kind)),
                next_activation: None,
                retries: instance.retries,
                failed: false,
                chainable: false,
            };
            let owned = self
                .persist(instance.id, &instance.state, instance.retries, &transition, false, &BTreeMap::new(), now, now)
                .await?;
            return Ok(if owned {
                ProcessOutcome::Executed { executions: 0 }
            } else {
                ProcessOutcome::OwnershipLost { executions: 0 }
            });
        }

        let mut executions = 0u32;
        loop {
            let current = execution.state().to_string();
            let retries = execution.retries();

            let started = self.clock.now();
            let result = AssertUnwindSafe(definition.handle(&mut execution))
                .catch_unwind()
                .await;
            let finished = self.clock.now();
            executions += 1;

            let (next, failed) = match result {
                Ok(Ok(next)) => (next, false),
                Ok(Err(e)) => {
                    tracing::warn!(instance_id, state = %current, retries, error = %e, "state handler failed");
                    (failure_retry(&e), true)
                }
                Err(panic) => {
                    let e = HandlerError::Panicked(panic_message(panic.as_ref()));
                    tracing::error!(instance_id, state = %current, retries, error = %e, "state handler panicked");
                    (failure_retry(&e), true)
                }
            };

            let transition = resolve(&definition, &settings, &current, retries, next, failed, finished);
            let keep_claim = transition.chainable
                && executions < self.max_subsequent_executions
                && !self.shutdown.is_cancelled();
            let changed = execution.advance_to(&transition.state, transition.retries);

            let owned = self
                .persist(instance_id, &current, retries, &transition, keep_claim, &changed, started, finished)
                .await?;
            if !owned {
                tracing::warn!(
                    instance_id,
                    executor_id = self.executor_id,
                    "workflow instance claimed by another executor, execution result discarded"
                );
                return Ok(ProcessOutcome::OwnershipLost { executions });
            }

            if !keep_claim {
                tracing::debug!(
                    instance_id,
                    status = %transition.status,
                    state = %transition.state,
                    executions,
                    "released workflow instance"
                );
                return Ok(ProcessOutcome::Executed { executions });
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        instance_id: i64,
        state_before: &str,
        retries_before: u32,
        transition: &Transition,
        keep_claim: bool,
        changed: &BTreeMap<String, String>,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let update = InstanceUpdate {
            id: instance_id,
            status: if keep_claim {
                WorkflowInstanceStatus::Executing
            } else {
                transition.status
            },
            state: transition.state.clone(),
            state_text: transition.text.clone(),
            next_activation: transition.next_activation,
            retries: transition.retries,
            executor_id: keep_claim.then_some(self.executor_id),
            modified: finished,
        };
        let action = NewAction {
            instance_id,
            executor_id: Some(self.executor_id),
            action_type: if transition.failed {
                ActionType::StateExecutionFailed
            } else {
                ActionType::StateExecution
            },
            state: state_before.to_string(),
            state_text: transition.text.clone(),
            retry_no: retries_before,
            execution_start: started,
            execution_end: finished,
        };
        let action_id = self
            .instances
            .update_after_execution(self.executor_id, &update, &action, changed)
            .await?;
        Ok(action_id.is_some())
    }

    /// Leave an unprocessable instance claimed by this executor, unscheduled,
    /// with the reason in its state text.
    async fn park(&self, instance: &WorkflowInstance, reason: String) -> Result<ProcessOutcome, RepositoryError> {
        tracing::error!(
            instance_id = instance.id,
            workflow_type = %instance.workflow_type,
            state = %instance.state,
            "{reason}, leaving instance claimed for inspection"
        );
        let now = self.clock.now();
        let update = InstanceUpdate {
            id: instance.id,
            status: WorkflowInstanceStatus::Executing,
            state: instance.state.clone(),
            state_text: Some(reason.clone()),
            next_activation: None,
            retries: instance.retries,
            executor_id: Some(self.executor_id),
            modified: now,
        };
        let action = NewAction {
            instance_id: instance.id,
            executor_id: Some(self.executor_id),
            action_type: ActionType::StateExecutionFailed,
            state: instance.state.clone(),
            state_text: Some(reason),
            retry_no: instance.retries,
            execution_start: now,
            execution_end: now,
        };
        let parked = self
            .instances
            .update_after_execution(self.executor_id, &update, &action, &BTreeMap::new())
            .await?;
        if parked.is_none() {
            tracing::warn!(
                instance_id = instance.id,
                executor_id = self.executor_id,
                "workflow instance claimed by another executor before it could be parked"
            );
            return Ok(ProcessOutcome::OwnershipLost { executions: 0 });
        }
        Ok(ProcessOutcome::Parked)
    }
}

fn failure_retry(error: &HandlerError) -> NextAction {
    NextAction::Retry {
        delay: None,
        text: Some(error.to_string()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Decide the next status, state and activation for a handler outcome.
pub(crate) fn resolve(
    definition: &BoxWorkflowDefinition,
    settings: &WorkflowSettings,
    current: &str,
    retries: u32,
    next: NextAction,
    failed: bool,
    now: DateTime<Utc>,
) -> Transition {
    let stop = |status: WorkflowInstanceStatus, state: String, text: Option<String>, retries: u32| Transition {
        status,
        state,
        text,
        next_activation: None,
        retries,
        failed,
        chainable: false,
    };

    match next {
        NextAction::Advance { state, delay, text } => {
            let Some(target) = definition.state(&state) else {
                return undeclared(definition, settings, current, retries, &state, now);
            };
            match target.kind {
                StateKind::End => stop(WorkflowInstanceStatus::Finished, state, text, 0),
                StateKind::Manual => stop(WorkflowInstanceStatus::Manual, state, text, 0),
                StateKind::Start | StateKind::Normal => {
                    let delay = delay.filter(|d| *d > Duration::zero());
                    Transition {
                        status: WorkflowInstanceStatus::InProgress,
                        state,
                        text,
                        next_activation: Some(now + delay.unwrap_or_else(Duration::zero)),
                        retries: 0,
                        failed,
                        chainable: delay.is_none(),
                    }
                }
            }
        }
        NextAction::Retry { delay, text } => {
            if retries_exhausted(settings, retries) {
                let text = Some(match text {
                    Some(t) => format!("retries exhausted: {t}"),
                    None => "retries exhausted".to_string(),
                });
                return stop(WorkflowInstanceStatus::Manual, current.to_string(), text, retries);
            }
            Transition {
                status: WorkflowInstanceStatus::InProgress,
                state: current.to_string(),
                text,
                next_activation: Some(now + delay.unwrap_or_else(|| error_delay(settings, retries))),
                retries: retries + 1,
                failed,
                chainable: false,
            }
        }
        NextAction::FailPermanently { text } => {
            stop(WorkflowInstanceStatus::Manual, current.to_string(), text, retries)
        }
        NextAction::GoToManual { state, text } => match state {
            Some(state) if !definition.has_state(&state) => {
                undeclared(definition, settings, current, retries, &state, now)
            }
            Some(state) => stop(WorkflowInstanceStatus::Manual, state, text, 0),
            None => stop(WorkflowInstanceStatus::Manual, current.to_string(), text, retries),
        },
        NextAction::Finish { state, text } => match state {
            Some(state) if !definition.has_state(&state) => {
                undeclared(definition, settings, current, retries, &state, now)
            }
            Some(state) => stop(WorkflowInstanceStatus::Finished, state, text, 0),
            None => stop(WorkflowInstanceStatus::Finished, current.to_string(), text, retries),
        },
    }
}

/// A handler naming an undeclared state counts as a failed execution.
fn undeclared(
    definition: &BoxWorkflowDefinition,
    settings: &WorkflowSettings,
    current: &str,
    retries: u32,
    target: &str,
    now: DateTime<Utc>,
) -> Transition {
    tracing::error!(
        workflow_type = %definition.workflow_type(),
        state = %current,
        target,
        "state handler returned an undeclared state"
    );
    let retry = NextAction::Retry {
        delay: None,
        text: Some(format!("undeclared next state '{target}'")),
    };
    resolve(definition, settings, current, retries, retry, true, now)
}
