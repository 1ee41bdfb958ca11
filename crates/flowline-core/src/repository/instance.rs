//! Workflow instance repository trait definition.
//!
//! Besides plain CRUD this is where the concurrency primitives of the engine
//! live: the atomic batch claim, the ownership-guarded write after execution,
//! the unclaimed-only administrative update, and dead-node recovery. Every one
//! of them is a conditional write; "zero rows matched" is a normal outcome.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use flowline_types::action::{NewAction, WorkflowInstanceAction};
use flowline_types::error::{PollingError, RepositoryError};
use flowline_types::instance::{InstanceChange, InstanceUpdate, NewWorkflowInstance, WorkflowInstance};
use flowline_types::query::{InstanceIncludes, InstanceQuery, StateExecutionStatistics, StatisticsFilter};

/// Repository trait for workflow instance persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait InstanceRepository: Send + Sync {
    /// Insert a new instance together with its initial state variables.
    /// Returns the store-assigned id.
    fn insert_instance(
        &self,
        instance: &NewWorkflowInstance,
    ) -> impl std::future::Future<Output = Result<i64, RepositoryError>> + Send;

    /// Load one instance, optionally with variables and history.
    fn get_instance(
        &self,
        id: i64,
        includes: InstanceIncludes,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// Current state name of an instance.
    fn get_instance_state(
        &self,
        id: i64,
    ) -> impl std::future::Future<Output = Result<Option<String>, RepositoryError>> + Send;

    /// Search instances, newest first.
    fn query_instances(
        &self,
        query: &InstanceQuery,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// Atomically claim up to `limit` due instances of `executor_group` for
    /// `executor_id`, oldest `next_activation` first.
    ///
    /// Returns exactly the ids whose status moved to `executing` under this
    /// executor. Never returns an id that another concurrent caller received.
    fn claim_next(
        &self,
        executor_id: i64,
        executor_group: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<i64>, PollingError>> + Send;

    /// Write the outcome of a state execution in one transaction: the
    /// instance row, the action, and the variables the action changed.
    ///
    /// The row update is conditioned on `executor_id = owner`. Returns the new
    /// action id, or `None` when ownership was lost and nothing was written.
    fn update_after_execution(
        &self,
        owner: i64,
        update: &InstanceUpdate,
        action: &NewAction,
        changed_variables: &BTreeMap<String, String>,
    ) -> impl std::future::Future<Output = Result<Option<i64>, RepositoryError>> + Send;

    /// Hand a claimed instance back without running it: clear the owner and
    /// make it pollable again, keeping state and activation. Returns `false`
    /// when `owner` no longer holds the claim.
    fn release_claim(
        &self,
        owner: i64,
        id: i64,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Apply an administrative change if the instance is not claimed,
    /// appending `action`. Returns `false` when the instance is claimed (or
    /// does not exist) and nothing was written.
    fn update_not_running(
        &self,
        change: &InstanceChange,
        action: &NewAction,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Make an unclaimed, unfinished instance due now. When `expected_states`
    /// is non-empty the instance must currently be in one of them.
    fn wakeup_if_not_executing(
        &self,
        id: i64,
        expected_states: &[String],
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Release every instance owned by an expired executor of `executor_group`
    /// (other than `executor_id`), appending a `recovery` action for each.
    /// Returns the number of instances recovered.
    fn recover_dead_nodes(
        &self,
        executor_id: i64,
        executor_group: &str,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Full history of an instance, oldest first.
    fn list_actions(
        &self,
        instance_id: i64,
        include_variables: bool,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstanceAction>, RepositoryError>> + Send;

    /// Per-state instance counts for one workflow type.
    fn state_statistics(
        &self,
        filter: &StatisticsFilter,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<BTreeMap<String, StateExecutionStatistics>, RepositoryError>> + Send;
}
