//! In-memory repository doubles for engine unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use flowline_types::action::{NewAction, WorkflowInstanceAction};
use flowline_types::error::{PollingError, RepositoryError};
use flowline_types::executor::{Executor, ExecutorRegistration};
use flowline_types::instance::{
    InstanceChange, InstanceUpdate, NewWorkflowInstance, WorkflowInstance, WorkflowInstanceStatus,
};
use flowline_types::query::{InstanceIncludes, InstanceQuery, StateExecutionStatistics, StatisticsFilter};

use crate::repository::executor::ExecutorRepository;
use crate::repository::instance::InstanceRepository;

/// Scripted instance store. Claims are answered from `claims` in order, then
/// with empty batches.
#[derive(Default)]
pub struct MockInstances {
    pub claims: Mutex<VecDeque<Result<Vec<i64>, PollingError>>>,
    pub claim_calls: AtomicUsize,
    pub instance: Mutex<Option<WorkflowInstance>>,
    /// Whether the ownership guard of `update_after_execution` matches.
    pub owned: AtomicBool,
    pub updates: Mutex<Vec<InstanceUpdate>>,
    pub released: Mutex<Vec<i64>>,
}

impl MockInstances {
    pub fn with_claims(claims: Vec<Result<Vec<i64>, PollingError>>) -> Self {
        Self {
            claims: Mutex::new(claims.into()),
            ..Self::default()
        }
    }

    pub fn with_instance(instance: WorkflowInstance, owned: bool) -> Self {
        Self {
            instance: Mutex::new(Some(instance)),
            owned: AtomicBool::new(owned),
            ..Self::default()
        }
    }

    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<i64> {
        self.released.lock().unwrap().clone()
    }
}

/// An instance claimed by `executor_id`.
pub fn claimed_instance(id: i64, executor_id: i64, workflow_type: &str, state: &str) -> WorkflowInstance {
    let now = Utc::now();
    WorkflowInstance {
        id,
        workflow_type: workflow_type.to_string(),
        business_key: None,
        external_id: format!("ext-{id}"),
        executor_group: "default".to_string(),
        status: WorkflowInstanceStatus::Executing,
        state: state.to_string(),
        state_text: None,
        next_activation: Some(now),
        retries: 0,
        executor_id: Some(executor_id),
        state_variables: BTreeMap::new(),
        actions: Vec::new(),
        created: now,
        modified: now,
        started: None,
    }
}

impl InstanceRepository for MockInstances {
    async fn insert_instance(&self, _instance: &NewWorkflowInstance) -> Result<i64, RepositoryError> {
        Ok(1)
    }

    async fn get_instance(
        &self,
        _id: i64,
        _includes: InstanceIncludes,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self.instance.lock().unwrap().clone())
    }

    async fn get_instance_state(&self, _id: i64) -> Result<Option<String>, RepositoryError> {
        Ok(self.instance.lock().unwrap().as_ref().map(|i| i.state.clone()))
    }

    async fn query_instances(&self, _query: &InstanceQuery) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn claim_next(
        &self,
        _executor_id: i64,
        _executor_group: &str,
        _limit: usize,
        _now: DateTime<Utc>,
    ) -> Result<Vec<i64>, PollingError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        self.claims.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn update_after_execution(
        &self,
        _owner: i64,
        update: &InstanceUpdate,
        _action: &NewAction,
        _changed_variables: &BTreeMap<String, String>,
    ) -> Result<Option<i64>, RepositoryError> {
        if !self.owned.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.updates.lock().unwrap().push(update.clone());
        Ok(Some(1))
    }

    async fn release_claim(&self, _owner: i64, id: i64, _now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        self.released.lock().unwrap().push(id);
        Ok(true)
    }

    async fn update_not_running(&self, _change: &InstanceChange, _action: &NewAction) -> Result<bool, RepositoryError> {
        Ok(false)
    }

    async fn wakeup_if_not_executing(
        &self,
        _id: i64,
        _expected_states: &[String],
        _now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(false)
    }

    async fn recover_dead_nodes(
        &self,
        _executor_id: i64,
        _executor_group: &str,
        _now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        Ok(0)
    }

    async fn list_actions(
        &self,
        _instance_id: i64,
        _include_variables: bool,
    ) -> Result<Vec<WorkflowInstanceAction>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn state_statistics(
        &self,
        _filter: &StatisticsFilter,
        _now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, StateExecutionStatistics>, RepositoryError> {
        Ok(BTreeMap::new())
    }
}

/// Executor table that counts heartbeats and remembers a clean shutdown.
#[derive(Default)]
pub struct MockExecutors {
    pub heartbeats: AtomicUsize,
    pub stopped: AtomicBool,
}

impl ExecutorRepository for MockExecutors {
    async fn register(&self, _registration: &ExecutorRegistration) -> Result<i64, RepositoryError> {
        Ok(1)
    }

    async fn heartbeat(&self, _id: i64, _active: DateTime<Utc>, _expires: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_shutdown(&self, _id: i64, _now: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_executors(&self, _executor_group: Option<&str>) -> Result<Vec<Executor>, RepositoryError> {
        Ok(Vec::new())
    }
}
