//! End-to-end engine behavior against a real SQLite file.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, SubsecRound, Utc};
use flowline_core::clock::{Clock, ManualClock};
use flowline_core::definition::registry::DefinitionRegistry;
use flowline_core::definition::{
    HandlerError, NextAction, StateExecution, StateSpec, WorkflowDefinition, WorkflowSettings,
};
use flowline_core::engine::dispatcher::DispatcherState;
use flowline_core::engine::node::Engine;
use flowline_core::engine::processor::{ProcessOutcome, StateProcessor};
use flowline_core::engine::recovery::RecoveryManager;
use flowline_core::repository::executor::ExecutorRepository;
use flowline_core::repository::instance::InstanceRepository;
use flowline_core::service::instance::{NewInstanceRequest, UpdateInstanceRequest, WorkflowInstanceService};
use flowline_infra::sqlite::definition::SqliteDefinitionRepository;
use flowline_infra::sqlite::executor::SqliteExecutorRepository;
use flowline_infra::sqlite::instance::SqliteInstanceRepository;
use flowline_infra::sqlite::pool::DatabasePool;
use flowline_types::action::ActionType;
use flowline_types::config::{ClaimConfig, ClaimStrategy, EngineConfig};
use flowline_types::error::{InstanceError, PollingError};
use flowline_types::executor::ExecutorRegistration;
use flowline_types::instance::{NewWorkflowInstance, WorkflowInstanceStatus};
use flowline_types::query::{InstanceIncludes, StatisticsFilter};
use tokio_util::sync::CancellationToken;

/// begin -> process -> done, counting visits in a variable.
struct OrderWorkflow {
    states: Vec<StateSpec>,
}

impl OrderWorkflow {
    fn new() -> Self {
        Self {
            states: vec![
                StateSpec::start("begin"),
                StateSpec::normal("process"),
                StateSpec::manual("review"),
                StateSpec::end("done"),
            ],
        }
    }
}

impl WorkflowDefinition for OrderWorkflow {
    fn workflow_type(&self) -> &str {
        "order"
    }

    fn initial_state(&self) -> &str {
        "begin"
    }

    fn states(&self) -> &[StateSpec] {
        &self.states
    }

    async fn handle(&self, execution: &mut StateExecution) -> Result<NextAction, HandlerError> {
        match execution.state() {
            "begin" => {
                execution.set_variable("visited", "begin");
                Ok(NextAction::advance("process"))
            }
            "process" => {
                execution.set_variable("visited", "process");
                Ok(NextAction::finish("done"))
            }
            other => Err(HandlerError::failed(format!("no handler for {other}"))),
        }
    }
}

/// Always fails; gives up after two retries.
struct FlakyWorkflow {
    states: Vec<StateSpec>,
}

impl FlakyWorkflow {
    fn new() -> Self {
        Self {
            states: vec![StateSpec::start("call"), StateSpec::end("done")],
        }
    }
}

impl WorkflowDefinition for FlakyWorkflow {
    fn workflow_type(&self) -> &str {
        "flaky"
    }

    fn initial_state(&self) -> &str {
        "call"
    }

    fn states(&self) -> &[StateSpec] {
        &self.states
    }

    fn settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            max_retries: 2,
            ..WorkflowSettings::default()
        }
    }

    async fn handle(&self, _execution: &mut StateExecution) -> Result<NextAction, HandlerError> {
        Err(HandlerError::failed("remote service unavailable"))
    }
}

async fn open_pool(dir: &tempfile::TempDir) -> DatabasePool {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("flowline.db").display());
    DatabasePool::new(&url).await.unwrap()
}

fn registry() -> Arc<DefinitionRegistry> {
    let mut registry = DefinitionRegistry::new();
    registry.register(OrderWorkflow::new()).unwrap();
    registry.register(FlakyWorkflow::new()).unwrap();
    Arc::new(registry)
}

fn new_instance(workflow_type: &str, state: &str, external_id: &str, now: chrono::DateTime<Utc>) -> NewWorkflowInstance {
    NewWorkflowInstance {
        workflow_type: workflow_type.to_string(),
        business_key: None,
        external_id: external_id.to_string(),
        executor_group: "default".to_string(),
        status: WorkflowInstanceStatus::Created,
        state: state.to_string(),
        state_text: None,
        next_activation: Some(now),
        state_variables: Default::default(),
        created: now,
    }
}

fn processor(
    repo: &Arc<SqliteInstanceRepository>,
    clock: Arc<dyn Clock>,
    executor_id: i64,
) -> StateProcessor<SqliteInstanceRepository> {
    StateProcessor::new(
        Arc::clone(repo),
        registry(),
        clock,
        executor_id,
        100,
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn chained_execution_finishes_and_records_actions() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(SqliteInstanceRepository::new(open_pool(&dir).await));
    let now = Utc::now();
    let id = repo.insert_instance(&new_instance("order", "begin", "o-1", now)).await.unwrap();

    assert_eq!(repo.claim_next(1, "default", 10, now).await.unwrap(), vec![id]);
    let outcome = processor(&repo, Arc::new(ManualClock::new(now)), 1)
        .process(id)
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::Executed { executions: 2 });

    let instance = repo.get_instance(id, InstanceIncludes::all()).await.unwrap().unwrap();
    assert_eq!(instance.state, "done");
    assert_eq!(instance.status, WorkflowInstanceStatus::Finished);
    assert_eq!(instance.executor_id, None);
    assert_eq!(instance.next_activation, None);
    assert_eq!(instance.retries, 0);
    assert!(instance.started.is_some());
    assert_eq!(instance.state_variables.get("visited").map(String::as_str), Some("process"));

    let states: Vec<&str> = instance.actions.iter().map(|a| a.state.as_str()).collect();
    assert_eq!(states, vec!["begin", "process"]);
    for action in &instance.actions {
        assert_eq!(action.action_type, ActionType::StateExecution);
        assert_eq!(action.executor_id, Some(1));
        assert!(action.execution_end >= action.execution_start);
    }
    assert_eq!(
        instance.actions[0].updated_state_variables.get("visited").map(String::as_str),
        Some("begin")
    );
}

#[tokio::test]
async fn failures_back_off_then_go_to_manual() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(SqliteInstanceRepository::new(open_pool(&dir).await));
    let start = Utc::now().trunc_subsecs(6);
    let clock = Arc::new(ManualClock::new(start));
    let processor = processor(&repo, clock.clone(), 1);
    let id = repo.insert_instance(&new_instance("flaky", "call", "f-1", start)).await.unwrap();

    for expected_retries in 1..=2u32 {
        assert_eq!(repo.claim_next(1, "default", 10, clock.now()).await.unwrap(), vec![id]);
        processor.process(id).await.unwrap();

        let instance = repo.get_instance(id, InstanceIncludes::default()).await.unwrap().unwrap();
        assert_eq!(instance.retries, expected_retries);
        assert_eq!(instance.status, WorkflowInstanceStatus::InProgress);
        assert_eq!(instance.executor_id, None);
        let delay = Duration::minutes(1 << (expected_retries - 1));
        assert_eq!(instance.next_activation, Some(clock.now() + delay));

        assert!(repo.claim_next(1, "default", 10, clock.now()).await.unwrap().is_empty());
        clock.advance(Duration::minutes(10));
    }

    assert_eq!(repo.claim_next(1, "default", 10, clock.now()).await.unwrap(), vec![id]);
    processor.process(id).await.unwrap();

    let instance = repo.get_instance(id, InstanceIncludes::all()).await.unwrap().unwrap();
    assert_eq!(instance.status, WorkflowInstanceStatus::Manual);
    assert_eq!(instance.state, "call");
    assert_eq!(instance.executor_id, None);
    assert_eq!(instance.next_activation, None);
    assert_eq!(instance.actions.len(), 3);
    assert!(instance
        .actions
        .iter()
        .all(|a| a.action_type == ActionType::StateExecutionFailed));
    let retry_numbers: Vec<u32> = instance.actions.iter().map(|a| a.retry_no).collect();
    assert_eq!(retry_numbers, vec![0, 1, 2]);
}

#[tokio::test]
async fn unknown_type_is_parked_and_stays_claimed() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(SqliteInstanceRepository::new(open_pool(&dir).await));
    let now = Utc::now();
    let id = repo.insert_instance(&new_instance("ghost", "haunt", "g-1", now)).await.unwrap();

    repo.claim_next(1, "default", 10, now).await.unwrap();
    let outcome = processor(&repo, Arc::new(ManualClock::new(now)), 1)
        .process(id)
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::Parked);

    let instance = repo.get_instance(id, InstanceIncludes::default()).await.unwrap().unwrap();
    assert_eq!(instance.status, WorkflowInstanceStatus::Executing);
    assert_eq!(instance.executor_id, Some(1));
    assert_eq!(instance.next_activation, None);
    assert!(instance.state_text.unwrap().contains("ghost"));
}

#[tokio::test]
async fn instance_taken_by_another_executor_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(SqliteInstanceRepository::new(open_pool(&dir).await));
    let now = Utc::now();
    let id = repo.insert_instance(&new_instance("order", "begin", "o-1", now)).await.unwrap();

    repo.claim_next(2, "default", 10, now).await.unwrap();
    let outcome = processor(&repo, Arc::new(ManualClock::new(now)), 1)
        .process(id)
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::Skipped);
    assert_eq!(repo.get_instance_state(id).await.unwrap().as_deref(), Some("begin"));
}

async fn concurrent_claims(strategy: ClaimStrategy) {
    let dir = tempfile::tempdir().unwrap();
    let claim = ClaimConfig {
        strategy,
        race_threshold: 1.0,
    };
    let node_a = Arc::new(SqliteInstanceRepository::new(open_pool(&dir).await).with_claim_config(claim.clone()));
    let node_b = Arc::new(SqliteInstanceRepository::new(open_pool(&dir).await).with_claim_config(claim));

    let now = Utc::now();
    for i in 0..100 {
        node_a
            .insert_instance(&new_instance("order", "begin", &format!("o-{i}"), now))
            .await
            .unwrap();
    }

    let a = {
        let repo = Arc::clone(&node_a);
        tokio::spawn(async move { repo.claim_next(1, "default", 100, now).await })
    };
    let b = {
        let repo = Arc::clone(&node_b);
        tokio::spawn(async move { repo.claim_next(2, "default", 100, now).await })
    };
    let claimed = |result: Result<Vec<i64>, PollingError>| match result {
        Ok(ids) => ids,
        Err(PollingError::RaceCondition { .. }) => Vec::new(),
        Err(e) => panic!("claim failed: {e}"),
    };
    let claimed_a = claimed(a.await.unwrap());
    let claimed_b = claimed(b.await.unwrap());

    let set_a: HashSet<i64> = claimed_a.iter().copied().collect();
    let set_b: HashSet<i64> = claimed_b.iter().copied().collect();
    assert!(set_a.is_disjoint(&set_b));
    assert!(claimed_a.len() + claimed_b.len() <= 100);

    for id in &claimed_a {
        let instance = node_a.get_instance(*id, InstanceIncludes::default()).await.unwrap().unwrap();
        assert_eq!(instance.executor_id, Some(1));
    }
    for id in &claimed_b {
        let instance = node_a.get_instance(*id, InstanceIncludes::default()).await.unwrap().unwrap();
        assert_eq!(instance.executor_id, Some(2));
    }

    let rest = claimed(node_a.claim_next(1, "default", 100, now).await);
    assert_eq!(claimed_a.len() + claimed_b.len() + rest.len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_nodes_partition_claims_with_update_returning() {
    concurrent_claims(ClaimStrategy::UpdateReturning).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_nodes_partition_claims_with_select_then_update() {
    concurrent_claims(ClaimStrategy::SelectThenUpdate).await;
}

#[tokio::test]
async fn expired_executor_instances_are_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(&dir).await;
    let instances = Arc::new(SqliteInstanceRepository::new(pool.clone()));
    let executors = Arc::new(SqliteExecutorRepository::new(pool));
    let start = Utc::now();
    let clock = Arc::new(ManualClock::new(start));

    let registration = |host: &str| ExecutorRegistration {
        host: host.to_string(),
        pid: 1,
        executor_group: "default".to_string(),
        started: start,
        expires: start + Duration::minutes(15),
    };
    let crashed = executors.register(&registration("node-a")).await.unwrap();
    let survivor = executors.register(&registration("node-b")).await.unwrap();

    let id = instances.insert_instance(&new_instance("order", "begin", "o-1", start)).await.unwrap();
    assert_eq!(instances.claim_next(crashed, "default", 10, start).await.unwrap(), vec![id]);

    let mut recovery = RecoveryManager::new(
        Arc::clone(&instances),
        Arc::clone(&executors),
        clock.clone(),
        survivor,
        "default",
        StdDuration::from_secs(60),
        StdDuration::from_secs(15 * 60),
    );

    assert!(recovery.tick().await.unwrap());
    assert_eq!(recovery.recover_dead_nodes().await.unwrap(), 0);

    clock.advance(Duration::minutes(16));
    assert!(recovery.tick().await.unwrap());
    assert_eq!(recovery.recover_dead_nodes().await.unwrap(), 1);

    let instance = instances.get_instance(id, InstanceIncludes::all()).await.unwrap().unwrap();
    assert_eq!(instance.executor_id, None);
    assert_eq!(instance.status, WorkflowInstanceStatus::InProgress);
    let recovery_action = instance.actions.last().unwrap();
    assert_eq!(recovery_action.action_type, ActionType::Recovery);
    assert_eq!(recovery_action.executor_id, Some(survivor));

    let listed = executors.list_executors(Some("default")).await.unwrap();
    let survivor_row = listed.iter().find(|e| e.id == survivor).unwrap();
    assert!(survivor_row.is_alive(clock.now()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_runs_instances_to_completion_and_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(&dir).await;
    let instances = Arc::new(SqliteInstanceRepository::new(pool.clone()));
    let executors = Arc::new(SqliteExecutorRepository::new(pool.clone()));
    let definitions = Arc::new(SqliteDefinitionRepository::new(pool));
    let registry = registry();

    let service = WorkflowInstanceService::new(
        Arc::clone(&instances),
        Arc::clone(&executors),
        Arc::clone(&registry),
        "default",
    );
    let mut ids = Vec::new();
    for i in 0..5 {
        let request = NewInstanceRequest::new("order").with_business_key(format!("customer-{i}"));
        ids.push(service.create(request).await.unwrap());
    }

    let mut config = EngineConfig::default();
    config.dispatcher.sleep_ms = 20;
    config.executor.thread_count = 2;

    let mut handle = Engine::new(
        Arc::clone(&instances),
        Arc::clone(&executors),
        definitions,
        registry,
        config,
    )
    .start()
    .await
    .unwrap();
    handle.wait_for(DispatcherState::Running).await;

    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(10);
    loop {
        let mut finished = 0;
        for id in &ids {
            if service.state(*id).await.unwrap() == "done" {
                finished += 1;
            }
        }
        if finished == ids.len() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "instances did not finish in time");
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }

    let executor_id = handle.executor_id();
    let mut state = handle.subscribe();
    handle.shutdown().await;
    assert_eq!(*state.borrow_and_update(), DispatcherState::Stopped);

    let executor = executors
        .list_executors(None)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.id == executor_id)
        .unwrap();
    assert!(executor.stopped.is_some());

    let filter = StatisticsFilter {
        workflow_type: "order".to_string(),
        ..Default::default()
    };
    let stats = service.statistics(&filter).await.unwrap();
    assert_eq!(stats.get("done").map(|s| s.total()), Some(5));
}

type Service = WorkflowInstanceService<SqliteInstanceRepository, SqliteExecutorRepository>;

async fn service(dir: &tempfile::TempDir, clock: Arc<dyn Clock>) -> (Service, Arc<SqliteInstanceRepository>) {
    let pool = open_pool(dir).await;
    let instances = Arc::new(SqliteInstanceRepository::new(pool.clone()));
    let executors = Arc::new(SqliteExecutorRepository::new(pool));
    let service = WorkflowInstanceService::new(Arc::clone(&instances), executors, registry(), "default")
        .with_clock(clock);
    (service, instances)
}

#[tokio::test]
async fn created_instance_reads_back_initial_state_and_variables() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now().trunc_subsecs(6);
    let (service, _) = service(&dir, Arc::new(ManualClock::new(now))).await;

    let request = NewInstanceRequest::new("order")
        .with_business_key("customer-7")
        .with_variable("amount", "1200")
        .with_variable("currency", "EUR");
    let id = service.create(request).await.unwrap();

    let instance = service.get(id, InstanceIncludes::variables()).await.unwrap();
    assert_eq!(instance.workflow_type, "order");
    assert_eq!(instance.state, "begin");
    assert_eq!(instance.status, WorkflowInstanceStatus::Created);
    assert_eq!(instance.business_key.as_deref(), Some("customer-7"));
    assert!(!instance.external_id.is_empty());
    assert_eq!(instance.next_activation, Some(now));
    assert_eq!(instance.executor_group, "default");
    assert_eq!(instance.state_variables.get("amount").map(String::as_str), Some("1200"));
    assert_eq!(instance.state_variables.get("currency").map(String::as_str), Some("EUR"));
    assert_eq!(service.state(id).await.unwrap(), "begin");

    let mut explicit = NewInstanceRequest::new("order");
    explicit.start_state = Some("process".to_string());
    explicit.external_id = Some("order-42".to_string());
    explicit.sleep = true;
    let id = service.create(explicit).await.unwrap();
    let instance = service.get(id, InstanceIncludes::default()).await.unwrap();
    assert_eq!(instance.state, "process");
    assert_eq!(instance.external_id, "order-42");
    assert_eq!(instance.next_activation, None);
}

#[tokio::test]
async fn create_rejects_unknown_type_and_undeclared_state() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = service(&dir, Arc::new(ManualClock::default())).await;

    let result = service.create(NewInstanceRequest::new("ghost")).await;
    assert!(matches!(result, Err(InstanceError::UnknownType(ref t)) if t == "ghost"));

    let mut request = NewInstanceRequest::new("order");
    request.start_state = Some("nowhere".to_string());
    let result = service.create(request).await;
    assert!(matches!(
        result,
        Err(InstanceError::UnknownState { ref state, .. }) if state == "nowhere"
    ));
}

#[tokio::test]
async fn update_is_not_applied_while_claimed() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    let (service, repo) = service(&dir, Arc::new(ManualClock::new(now))).await;
    let id = service.create(NewInstanceRequest::new("order")).await.unwrap();
    assert_eq!(repo.claim_next(3, "default", 1, now).await.unwrap(), vec![id]);

    let request = UpdateInstanceRequest {
        state: Some("review".to_string()),
        ..Default::default()
    };
    assert!(!service.update(id, request).await.unwrap());

    let instance = service.get(id, InstanceIncludes::all()).await.unwrap();
    assert_eq!(instance.state, "begin");
    assert_eq!(instance.executor_id, Some(3));
    assert!(instance.actions.is_empty());
}

#[tokio::test]
async fn update_rejects_executing_status_and_empty_change() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = service(&dir, Arc::new(ManualClock::default())).await;
    let id = service.create(NewInstanceRequest::new("order")).await.unwrap();

    let executing = UpdateInstanceRequest {
        status: Some(WorkflowInstanceStatus::Executing),
        ..Default::default()
    };
    assert!(matches!(
        service.update(id, executing).await,
        Err(InstanceError::InvalidChange(_))
    ));

    let result = service.update(id, UpdateInstanceRequest::default()).await;
    assert!(matches!(result, Err(InstanceError::EmptyUpdate(i)) if i == id));

    let undeclared = UpdateInstanceRequest {
        state: Some("nowhere".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        service.update(id, undeclared).await,
        Err(InstanceError::UnknownState { .. })
    ));
}

#[tokio::test]
async fn finishing_a_scheduled_instance_clears_its_activation() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now().trunc_subsecs(6);
    let (service, _) = service(&dir, Arc::new(ManualClock::new(now))).await;

    let mut request = NewInstanceRequest::new("order");
    request.next_activation = Some(now + Duration::hours(1));
    let id = service.create(request).await.unwrap();

    let finish = UpdateInstanceRequest {
        status: Some(WorkflowInstanceStatus::Finished),
        ..Default::default()
    };
    assert!(service.update(id, finish).await.unwrap());

    let instance = service.get(id, InstanceIncludes::all()).await.unwrap();
    assert_eq!(instance.status, WorkflowInstanceStatus::Finished);
    assert_eq!(instance.next_activation, None);
    assert_eq!(instance.actions.len(), 1);
    assert_eq!(instance.actions[0].action_type, ActionType::ExternalChange);

    let filter = StatisticsFilter {
        workflow_type: "order".to_string(),
        ..Default::default()
    };
    let stats = service.statistics(&filter).await.unwrap();
    assert_eq!(stats.get("begin").map(|s| s.sleeping).unwrap_or(0), 0);

    // A halted instance cannot be given a future activation.
    let reschedule = UpdateInstanceRequest {
        next_activation: Some(Some(now + Duration::hours(2))),
        ..Default::default()
    };
    assert!(matches!(
        service.update(id, reschedule).await,
        Err(InstanceError::InvalidChange(_))
    ));
    let stop_and_schedule = UpdateInstanceRequest {
        status: Some(WorkflowInstanceStatus::Stopped),
        next_activation: Some(Some(now)),
        ..Default::default()
    };
    assert!(matches!(
        service.update(id, stop_and_schedule).await,
        Err(InstanceError::InvalidChange(_))
    ));
}
