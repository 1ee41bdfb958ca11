//! Workflow instance service.
//!
//! Submission, administrative update, wake-up, queries and execution
//! statistics. Everything an operator changes goes through the store's
//! "only if not claimed" primitives; a claimed instance is reported back,
//! never modified.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowline_types::action::{ActionType, NewAction};
use flowline_types::definition::DefinitionSummary;
use flowline_types::error::InstanceError;
use flowline_types::executor::Executor;
use flowline_types::instance::{InstanceChange, NewWorkflowInstance, WorkflowInstance, WorkflowInstanceStatus};
use flowline_types::query::{InstanceIncludes, InstanceQuery, StateExecutionStatistics, StatisticsFilter};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::definition::registry::DefinitionRegistry;
use crate::repository::executor::ExecutorRepository;
use crate::repository::instance::InstanceRepository;

/// Request to submit a new workflow instance.
#[derive(Debug, Clone, Default)]
pub struct NewInstanceRequest {
    pub workflow_type: String,
    pub business_key: Option<String>,
    /// Defaults to a fresh UUIDv7.
    pub external_id: Option<String>,
    /// Defaults to the definition's initial state.
    pub start_state: Option<String>,
    /// Defaults to the service's executor group.
    pub executor_group: Option<String>,
    /// Defaults to now. Ignored when `sleep` is set.
    pub next_activation: Option<DateTime<Utc>>,
    /// Create without an activation; the instance waits for a wake-up.
    pub sleep: bool,
    pub state_variables: BTreeMap<String, String>,
}

impl NewInstanceRequest {
    pub fn new(workflow_type: impl Into<String>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            ..Self::default()
        }
    }

    pub fn with_business_key(mut self, key: impl Into<String>) -> Self {
        self.business_key = Some(key.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.state_variables.insert(key.into(), value.into());
        self
    }
}

/// Operator request to change an unclaimed instance. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct UpdateInstanceRequest {
    pub state: Option<String>,
    pub status: Option<WorkflowInstanceStatus>,
    /// `Some(None)` puts the instance to sleep.
    pub next_activation: Option<Option<DateTime<Utc>>>,
    /// Stored on the instance and on the `externalChange` action.
    pub state_text: Option<String>,
}

pub struct WorkflowInstanceService<I, E> {
    instances: Arc<I>,
    executors: Arc<E>,
    registry: Arc<DefinitionRegistry>,
    clock: Arc<dyn Clock>,
    default_group: String,
}

impl<I: InstanceRepository, E: ExecutorRepository> WorkflowInstanceService<I, E> {
    pub fn new(
        instances: Arc<I>,
        executors: Arc<E>,
        registry: Arc<DefinitionRegistry>,
        default_group: impl Into<String>,
    ) -> Self {
        Self {
            instances,
            executors,
            registry,
            clock: Arc::new(SystemClock),
            default_group: default_group.into(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Submit a new instance. Returns its id.
    pub async fn create(&self, request: NewInstanceRequest) -> Result<i64, InstanceError> {
        let definition = self
            .registry
            .get(&request.workflow_type)
            .ok_or_else(|| InstanceError::UnknownType(request.workflow_type.clone()))?;

        let state = match request.start_state {
            Some(state) if !definition.has_state(&state) => {
                return Err(InstanceError::UnknownState {
                    workflow_type: request.workflow_type,
                    state,
                });
            }
            Some(state) => state,
            None => definition.initial_state().to_string(),
        };

        let now = self.clock.now();
        let next_activation = if request.sleep {
            None
        } else {
            Some(request.next_activation.unwrap_or(now))
        };

        let instance = NewWorkflowInstance {
            workflow_type: request.workflow_type,
            business_key: request.business_key,
            external_id: request
                .external_id
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            executor_group: request
                .executor_group
                .unwrap_or_else(|| self.default_group.clone()),
            status: WorkflowInstanceStatus::Created,
            state,
            state_text: None,
            next_activation,
            state_variables: request.state_variables,
            created: now,
        };

        let id = self.instances.insert_instance(&instance).await?;
        tracing::info!(
            instance_id = id,
            workflow_type = %instance.workflow_type,
            state = %instance.state,
            "created workflow instance"
        );
        Ok(id)
    }

    /// Change an instance that is not claimed. Returns `false` when it is
    /// currently claimed and nothing was applied.
    pub async fn update(&self, id: i64, request: UpdateInstanceRequest) -> Result<bool, InstanceError> {
        let instance = self
            .instances
            .get_instance(id, InstanceIncludes::default())
            .await?
            .ok_or(InstanceError::NotFound(id))?;

        if let Some(state) = &request.state {
            let definition = self
                .registry
                .get(&instance.workflow_type)
                .ok_or_else(|| InstanceError::UnknownType(instance.workflow_type.clone()))?;
            if !definition.has_state(state) {
                return Err(InstanceError::UnknownState {
                    workflow_type: instance.workflow_type.clone(),
                    state: state.clone(),
                });
            }
        }
        if request.status == Some(WorkflowInstanceStatus::Executing) {
            return Err(InstanceError::InvalidChange(
                "status 'executing' is reserved for claimed instances".into(),
            ));
        }

        let mut next_activation = request.next_activation;
        let target_status = request.status.unwrap_or(instance.status);
        if target_status.is_halted() {
            if let Some(Some(at)) = next_activation {
                return Err(InstanceError::InvalidChange(format!(
                    "a {target_status} instance cannot be scheduled (next activation {})",
                    at.to_rfc3339()
                )));
            }
            if request.status.is_some() {
                next_activation = Some(None);
            }
        }

        let now = self.clock.now();
        let change = InstanceChange {
            id,
            state: request.state.clone(),
            status: request.status,
            next_activation,
            state_text: request.state_text.clone(),
            modified: now,
        };
        if change.is_empty() {
            return Err(InstanceError::EmptyUpdate(id));
        }

        let action = NewAction {
            instance_id: id,
            executor_id: None,
            action_type: ActionType::ExternalChange,
            state: instance.state.clone(),
            state_text: Some(request.state_text.unwrap_or_else(|| describe_change(&change))),
            retry_no: instance.retries,
            execution_start: now,
            execution_end: now,
        };

        let applied = self.instances.update_not_running(&change, &action).await?;
        if applied {
            tracing::info!(instance_id = id, "updated workflow instance");
        } else {
            tracing::info!(instance_id = id, "workflow instance is being executed, update not applied");
        }
        Ok(applied)
    }

    /// Make a sleeping or scheduled instance due now, unless it is claimed.
    pub async fn wakeup(&self, id: i64, expected_states: &[String]) -> Result<bool, InstanceError> {
        Ok(self
            .instances
            .wakeup_if_not_executing(id, expected_states, self.clock.now())
            .await?)
    }

    pub async fn get(&self, id: i64, includes: InstanceIncludes) -> Result<WorkflowInstance, InstanceError> {
        self.instances
            .get_instance(id, includes)
            .await?
            .ok_or(InstanceError::NotFound(id))
    }

    pub async fn query(&self, query: &InstanceQuery) -> Result<Vec<WorkflowInstance>, InstanceError> {
        Ok(self.instances.query_instances(query).await?)
    }

    pub async fn state(&self, id: i64) -> Result<String, InstanceError> {
        self.instances
            .get_instance_state(id)
            .await?
            .ok_or(InstanceError::NotFound(id))
    }

    /// Per-state counts of executing, queued, sleeping and unscheduled instances.
    pub async fn statistics(
        &self,
        filter: &StatisticsFilter,
    ) -> Result<BTreeMap<String, StateExecutionStatistics>, InstanceError> {
        if self.registry.get(&filter.workflow_type).is_none() {
            return Err(InstanceError::UnknownType(filter.workflow_type.clone()));
        }
        Ok(self
            .instances
            .state_statistics(filter, self.clock.now())
            .await?)
    }

    pub async fn executors(&self, group: Option<&str>) -> Result<Vec<Executor>, InstanceError> {
        Ok(self.executors.list_executors(group).await?)
    }

    pub fn definitions(&self) -> Vec<DefinitionSummary> {
        self.registry.summaries()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn describe_change(change: &InstanceChange) -> String {
    let mut parts = Vec::new();
    if let Some(state) = &change.state {
        parts.push(format!("state={state}"));
    }
    if let Some(status) = change.status {
        parts.push(format!("status={status}"));
    }
    match change.next_activation {
        Some(Some(at)) => parts.push(format!("next activation={}", at.to_rfc3339())),
        Some(None) => parts.push("next activation=none".to_string()),
        None => {}
    }
    format!("Externally changed {}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_change() {
        let change = InstanceChange {
            id: 1,
            state: Some("review".into()),
            status: Some(WorkflowInstanceStatus::InProgress),
            next_activation: Some(None),
            ..Default::default()
        };
        assert_eq!(
            describe_change(&change),
            "Externally changed state=review, status=inProgress, next activation=none"
        );
    }

    #[test]
    fn test_request_builder() {
        let request = NewInstanceRequest::new("loan")
            .with_business_key("customer-1")
            .with_variable("amount", "100");
        assert_eq!(request.workflow_type, "loan");
        assert_eq!(request.business_key.as_deref(), Some("customer-1"));
        assert_eq!(request.state_variables.get("amount").map(String::as_str), Some("100"));
        assert!(!request.sleep);
    }
}
