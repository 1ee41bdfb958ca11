//! SQLite workflow instance repository implementation.
//!
//! Implements `InstanceRepository` from `flowline-core`. Every write that
//! races with other executors is a conditional UPDATE: claims require
//! `executor_id IS NULL`, post-execution writes require `executor_id = owner`,
//! and recovery requires the dead owner's id. A write that matches no rows is
//! reported to the caller, never treated as a failure of the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use flowline_core::repository::instance::InstanceRepository;
use flowline_types::action::{ActionType, NewAction, WorkflowInstanceAction};
use flowline_types::config::{ClaimConfig, ClaimStrategy};
use flowline_types::error::{PollingError, RepositoryError};
use flowline_types::instance::{
    InstanceChange, InstanceUpdate, NewWorkflowInstance, WorkflowInstance, WorkflowInstanceStatus,
};
use flowline_types::query::{
    DEFAULT_MAX_RESULTS, InstanceIncludes, InstanceQuery, StateExecutionStatistics, StatisticsFilter,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_optional_datetime, query_error, to_u32};

const INSTANCE_COLUMNS: &str = "id, type, business_key, external_id, executor_group, status, state, \
     state_text, next_activation, retries, executor_id, created, modified, started";

const ACTION_COLUMNS: &str =
    "id, instance_id, executor_id, type, state, state_text, retry_no, execution_start, execution_end";

/// Rows eligible for claiming by one group at a given instant.
const POLLABLE: &str = "executor_id IS NULL AND status IN ('created', 'inProgress') \
     AND next_activation IS NOT NULL AND next_activation <= ? AND executor_group = ?";

/// SQLite-backed implementation of `InstanceRepository`.
pub struct SqliteInstanceRepository {
    pool: DatabasePool,
    claim: ClaimConfig,
}

impl SqliteInstanceRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            claim: ClaimConfig::default(),
        }
    }

    /// Choose the claim strategy and race threshold.
    pub fn with_claim_config(mut self, claim: ClaimConfig) -> Self {
        self.claim = claim;
        self
    }

    async fn claim_update_returning(
        &self,
        executor_id: i64,
        executor_group: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, PollingError> {
        let now = format_datetime(&now);
        let sql = format!(
            "UPDATE workflow_instances SET executor_id = ?, status = 'executing', modified = ?
             WHERE id IN (
                 SELECT id FROM workflow_instances WHERE {POLLABLE}
                 ORDER BY next_activation ASC, id ASC LIMIT ?
             ) AND executor_id IS NULL
             RETURNING id, next_activation"
        );
        let rows = sqlx::query(&sql)
            .bind(executor_id)
            .bind(&now)
            .bind(&now)
            .bind(executor_group)
            .bind(limit as i64)
            .fetch_all(&self.pool.writer)
            .await
            .map_err(query_error)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id").map_err(query_error)?;
            let next_activation: String = row.try_get("next_activation").map_err(query_error)?;
            claimed.push((next_activation, id));
        }
        claimed.sort();
        Ok(claimed.into_iter().map(|(_, id)| id).collect())
    }

    async fn claim_select_then_update(
        &self,
        executor_id: i64,
        executor_group: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, PollingError> {
        let candidates = self.select_candidates(executor_group, limit, now).await?;
        if candidates.is_empty() {
            return Ok(candidates);
        }
        self.claim_candidates(executor_id, &candidates, now).await
    }

    /// Due instances of the group, oldest activation first. Read-only.
    async fn select_candidates(
        &self,
        executor_group: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, RepositoryError> {
        let sql = format!(
            "SELECT id FROM workflow_instances WHERE {POLLABLE}
             ORDER BY next_activation ASC, id ASC LIMIT ?"
        );
        sqlx::query_scalar(&sql)
            .bind(format_datetime(&now))
            .bind(executor_group)
            .bind(limit as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)
    }

    /// Claim each candidate with a guarded update in one transaction. When
    /// the share of candidates taken by someone else since the select reaches
    /// the race threshold, nothing is committed.
    async fn claim_candidates(
        &self,
        executor_id: i64,
        candidates: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, PollingError> {
        let now = format_datetime(&now);
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            let result = sqlx::query(
                "UPDATE workflow_instances SET executor_id = ?, status = 'executing', modified = ?
                 WHERE id = ? AND executor_id IS NULL AND status IN ('created', 'inProgress')",
            )
            .bind(executor_id)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
            if result.rows_affected() == 1 {
                claimed.push(*id);
            }
        }

        let lost = candidates.len() - claimed.len();
        if lost > 0 && lost as f64 / candidates.len() as f64 >= self.claim.race_threshold {
            tx.rollback().await.map_err(query_error)?;
            return Err(PollingError::RaceCondition {
                lost,
                candidates: candidates.len(),
            });
        }

        tx.commit().await.map_err(query_error)?;
        Ok(claimed)
    }

    /// Current value of every variable: the row with the highest action id per key.
    async fn current_variables(&self, instance_id: i64) -> Result<BTreeMap<String, String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT v.state_key, v.state_value FROM workflow_state_variables v
             WHERE v.instance_id = ? AND v.action_id = (
                 SELECT MAX(m.action_id) FROM workflow_state_variables m
                 WHERE m.instance_id = v.instance_id AND m.state_key = v.state_key
             )",
        )
        .bind(instance_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("state_key").map_err(query_error)?,
                    row.try_get("state_value").map_err(query_error)?,
                ))
            })
            .collect()
    }

    async fn fill_includes(
        &self,
        instance: &mut WorkflowInstance,
        includes: InstanceIncludes,
    ) -> Result<(), RepositoryError> {
        if includes.current_state_variables {
            instance.state_variables = self.current_variables(instance.id).await?;
        }
        if includes.actions || includes.action_state_variables {
            instance.actions = self
                .list_actions(instance.id, includes.action_state_variables)
                .await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct InstanceRow {
    id: i64,
    workflow_type: String,
    business_key: Option<String>,
    external_id: String,
    executor_group: String,
    status: String,
    state: String,
    state_text: Option<String>,
    next_activation: Option<String>,
    retries: i64,
    executor_id: Option<i64>,
    created: String,
    modified: String,
    started: Option<String>,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_type: row.try_get("type")?,
            business_key: row.try_get("business_key")?,
            external_id: row.try_get("external_id")?,
            executor_group: row.try_get("executor_group")?,
            status: row.try_get("status")?,
            state: row.try_get("state")?,
            state_text: row.try_get("state_text")?,
            next_activation: row.try_get("next_activation")?,
            retries: row.try_get("retries")?,
            executor_id: row.try_get("executor_id")?,
            created: row.try_get("created")?,
            modified: row.try_get("modified")?,
            started: row.try_get("started")?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, RepositoryError> {
        let status: WorkflowInstanceStatus = self.status.parse().map_err(RepositoryError::Query)?;
        Ok(WorkflowInstance {
            id: self.id,
            workflow_type: self.workflow_type,
            business_key: self.business_key,
            external_id: self.external_id,
            executor_group: self.executor_group,
            status,
            state: self.state,
            state_text: self.state_text,
            next_activation: parse_optional_datetime(self.next_activation)?,
            retries: to_u32(self.retries, "retries")?,
            executor_id: self.executor_id,
            state_variables: BTreeMap::new(),
            actions: Vec::new(),
            created: parse_datetime(&self.created)?,
            modified: parse_datetime(&self.modified)?,
            started: parse_optional_datetime(self.started)?,
        })
    }
}

struct ActionRow {
    id: i64,
    instance_id: i64,
    executor_id: Option<i64>,
    action_type: String,
    state: String,
    state_text: Option<String>,
    retry_no: i64,
    execution_start: String,
    execution_end: String,
}

impl ActionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            executor_id: row.try_get("executor_id")?,
            action_type: row.try_get("type")?,
            state: row.try_get("state")?,
            state_text: row.try_get("state_text")?,
            retry_no: row.try_get("retry_no")?,
            execution_start: row.try_get("execution_start")?,
            execution_end: row.try_get("execution_end")?,
        })
    }

    fn into_action(self) -> Result<WorkflowInstanceAction, RepositoryError> {
        let action_type: ActionType = self.action_type.parse().map_err(RepositoryError::Query)?;
        Ok(WorkflowInstanceAction {
            id: self.id,
            instance_id: self.instance_id,
            executor_id: self.executor_id,
            action_type,
            state: self.state,
            state_text: self.state_text,
            retry_no: to_u32(self.retry_no, "retry_no")?,
            execution_start: parse_datetime(&self.execution_start)?,
            execution_end: parse_datetime(&self.execution_end)?,
            updated_state_variables: BTreeMap::new(),
        })
    }
}

async fn insert_action(conn: &mut SqliteConnection, action: &NewAction) -> Result<i64, RepositoryError> {
    sqlx::query_scalar(
        "INSERT INTO workflow_actions
             (instance_id, executor_id, type, state, state_text, retry_no, execution_start, execution_end)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(action.instance_id)
    .bind(action.executor_id)
    .bind(action.action_type.as_str())
    .bind(&action.state)
    .bind(&action.state_text)
    .bind(i64::from(action.retry_no))
    .bind(format_datetime(&action.execution_start))
    .bind(format_datetime(&action.execution_end))
    .fetch_one(&mut *conn)
    .await
    .map_err(query_error)
}

async fn insert_variables(
    conn: &mut SqliteConnection,
    instance_id: i64,
    action_id: i64,
    variables: &BTreeMap<String, String>,
) -> Result<(), RepositoryError> {
    for (key, value) in variables {
        sqlx::query(
            "INSERT INTO workflow_state_variables (instance_id, action_id, state_key, state_value)
             VALUES (?, ?, ?, ?)",
        )
        .bind(instance_id)
        .bind(action_id)
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }
    Ok(())
}

fn push_in_strings(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    qb.push(format!(" AND {column} IN ("));
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    separated.push_unseparated(")");
}

impl InstanceRepository for SqliteInstanceRepository {
    async fn insert_instance(&self, instance: &NewWorkflowInstance) -> Result<i64, RepositoryError> {
        let created = format_datetime(&instance.created);
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO workflow_instances
                 (type, business_key, external_id, executor_group, status, state, state_text,
                  next_activation, retries, created, modified)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
             RETURNING id",
        )
        .bind(&instance.workflow_type)
        .bind(&instance.business_key)
        .bind(&instance.external_id)
        .bind(&instance.executor_group)
        .bind(instance.status.as_str())
        .bind(&instance.state)
        .bind(&instance.state_text)
        .bind(instance.next_activation.as_ref().map(format_datetime))
        .bind(&created)
        .bind(&created)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!(
                        "external id '{}' already exists for type '{}'",
                        instance.external_id, instance.workflow_type
                    ));
                }
            }
            query_error(e)
        })?;

        insert_variables(&mut tx, id, 0, &instance.state_variables).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(id)
    }

    async fn get_instance(
        &self,
        id: i64,
        includes: InstanceIncludes,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut instance = InstanceRow::from_row(&row)
            .map_err(query_error)?
            .into_instance()?;
        self.fill_includes(&mut instance, includes).await?;
        Ok(Some(instance))
    }

    async fn get_instance_state(&self, id: i64) -> Result<Option<String>, RepositoryError> {
        sqlx::query_scalar("SELECT state FROM workflow_instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)
    }

    async fn query_instances(&self, query: &InstanceQuery) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE 1 = 1"
        ));
        if !query.ids.is_empty() {
            qb.push(" AND id IN (");
            let mut separated = qb.separated(", ");
            for id in &query.ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
        }
        push_in_strings(&mut qb, "type", &query.types);
        push_in_strings(&mut qb, "state", &query.states);
        let statuses: Vec<String> = query.statuses.iter().map(|s| s.as_str().to_string()).collect();
        push_in_strings(&mut qb, "status", &statuses);
        if let Some(key) = &query.business_key {
            qb.push(" AND business_key = ").push_bind(key.clone());
        }
        if let Some(external_id) = &query.external_id {
            qb.push(" AND external_id = ").push_bind(external_id.clone());
        }
        if let Some(group) = &query.executor_group {
            qb.push(" AND executor_group = ").push_bind(group.clone());
        }
        qb.push(" ORDER BY id DESC LIMIT ")
            .push_bind(i64::from(query.max_results.unwrap_or(DEFAULT_MAX_RESULTS)));

        let rows = qb
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut instance = InstanceRow::from_row(row)
                .map_err(query_error)?
                .into_instance()?;
            self.fill_includes(&mut instance, query.includes).await?;
            instances.push(instance);
        }
        Ok(instances)
    }

    async fn claim_next(
        &self,
        executor_id: i64,
        executor_group: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, PollingError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        match self.claim.strategy {
            ClaimStrategy::UpdateReturning => {
                self.claim_update_returning(executor_id, executor_group, limit, now)
                    .await
            }
            ClaimStrategy::SelectThenUpdate => {
                self.claim_select_then_update(executor_id, executor_group, limit, now)
                    .await
            }
        }
    }

    async fn update_after_execution(
        &self,
        owner: i64,
        update: &InstanceUpdate,
        action: &NewAction,
        changed_variables: &BTreeMap<String, String>,
    ) -> Result<Option<i64>, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let result = sqlx::query(
            "UPDATE workflow_instances
             SET status = ?, state = ?, state_text = ?, next_activation = ?, retries = ?,
                 executor_id = ?, modified = ?, started = COALESCE(started, ?)
             WHERE id = ? AND executor_id = ?",
        )
        .bind(update.status.as_str())
        .bind(&update.state)
        .bind(&update.state_text)
        .bind(update.next_activation.as_ref().map(format_datetime))
        .bind(i64::from(update.retries))
        .bind(update.executor_id)
        .bind(format_datetime(&update.modified))
        .bind(format_datetime(&action.execution_start))
        .bind(update.id)
        .bind(owner)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(query_error)?;
            return Ok(None);
        }

        let action_id = insert_action(&mut tx, action).await?;
        insert_variables(&mut tx, update.id, action_id, changed_variables).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(Some(action_id))
    }

    async fn release_claim(&self, owner: i64, id: i64, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflow_instances SET executor_id = NULL, status = 'inProgress', modified = ?
             WHERE id = ? AND executor_id = ? AND status = 'executing'",
        )
        .bind(format_datetime(&now))
        .bind(id)
        .bind(owner)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_not_running(&self, change: &InstanceChange, action: &NewAction) -> Result<bool, RepositoryError> {
        let (set_activation, activation) = match &change.next_activation {
            Some(at) => (true, at.as_ref().map(format_datetime)),
            None => (false, None),
        };
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let result = sqlx::query(
            "UPDATE workflow_instances
             SET state = COALESCE(?, state),
                 retries = CASE WHEN ? IS NULL THEN retries ELSE 0 END,
                 status = COALESCE(?, status),
                 next_activation = CASE
                     WHEN COALESCE(?, status) IN ('manual', 'finished', 'stopped') THEN NULL
                     WHEN ? THEN ?
                     ELSE next_activation END,
                 state_text = COALESCE(?, state_text),
                 modified = ?
             WHERE id = ? AND executor_id IS NULL",
        )
        .bind(&change.state)
        .bind(&change.state)
        .bind(change.status.map(|s| s.as_str()))
        .bind(change.status.map(|s| s.as_str()))
        .bind(set_activation)
        .bind(activation)
        .bind(&change.state_text)
        .bind(format_datetime(&change.modified))
        .bind(change.id)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(query_error)?;
            return Ok(false);
        }

        insert_action(&mut tx, action).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(true)
    }

    async fn wakeup_if_not_executing(
        &self,
        id: i64,
        expected_states: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let now = format_datetime(&now);
        let mut qb = QueryBuilder::<Sqlite>::new(
            "UPDATE workflow_instances SET next_activation = CASE \
             WHEN next_activation IS NOT NULL AND next_activation < ",
        );
        qb.push_bind(now.clone())
            .push(" THEN next_activation ELSE ")
            .push_bind(now.clone())
            .push(" END, modified = ")
            .push_bind(now)
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND executor_id IS NULL AND status IN ('created', 'inProgress')");
        push_in_strings(&mut qb, "state", expected_states);

        let result = qb
            .build()
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn recover_dead_nodes(
        &self,
        executor_id: i64,
        executor_group: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let now_s = format_datetime(&now);
        let dead: Vec<i64> = sqlx::query_scalar(
            "SELECT e.id FROM executors e
             WHERE e.executor_group = ? AND e.id != ? AND e.expires < ?
               AND EXISTS (SELECT 1 FROM workflow_instances i WHERE i.executor_id = e.id)",
        )
        .bind(executor_group)
        .bind(executor_id)
        .bind(&now_s)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut recovered = 0u64;
        for dead_executor in dead {
            let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
            let owned = sqlx::query("SELECT id, state, retries FROM workflow_instances WHERE executor_id = ?")
                .bind(dead_executor)
                .fetch_all(&mut *tx)
                .await
                .map_err(query_error)?;

            for row in &owned {
                let id: i64 = row.try_get("id").map_err(query_error)?;
                let state: String = row.try_get("state").map_err(query_error)?;
                let retries: i64 = row.try_get("retries").map_err(query_error)?;

                let result = sqlx::query(
                    "UPDATE workflow_instances
                     SET executor_id = NULL,
                         status = CASE status WHEN 'executing' THEN 'inProgress' ELSE status END,
                         modified = ?
                     WHERE id = ? AND executor_id = ?",
                )
                .bind(&now_s)
                .bind(id)
                .bind(dead_executor)
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;
                if result.rows_affected() == 0 {
                    continue;
                }

                let action = NewAction {
                    instance_id: id,
                    executor_id: Some(executor_id),
                    action_type: ActionType::Recovery,
                    state,
                    state_text: Some(format!("Recovered from dead executor {dead_executor}")),
                    retry_no: to_u32(retries, "retries")?,
                    execution_start: now,
                    execution_end: now,
                };
                insert_action(&mut tx, &action).await?;
                recovered += 1;
            }
            tx.commit().await.map_err(query_error)?;
        }
        Ok(recovered)
    }

    async fn list_actions(
        &self,
        instance_id: i64,
        include_variables: bool,
    ) -> Result<Vec<WorkflowInstanceAction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS} FROM workflow_actions WHERE instance_id = ? ORDER BY id ASC"
        ))
        .bind(instance_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut actions = rows
            .iter()
            .map(|row| ActionRow::from_row(row).map_err(query_error)?.into_action())
            .collect::<Result<Vec<_>, _>>()?;

        if include_variables && !actions.is_empty() {
            let rows = sqlx::query(
                "SELECT action_id, state_key, state_value FROM workflow_state_variables
                 WHERE instance_id = ? AND action_id > 0",
            )
            .bind(instance_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

            let mut by_action: BTreeMap<i64, BTreeMap<String, String>> = BTreeMap::new();
            for row in &rows {
                let action_id: i64 = row.try_get("action_id").map_err(query_error)?;
                by_action.entry(action_id).or_default().insert(
                    row.try_get("state_key").map_err(query_error)?,
                    row.try_get("state_value").map_err(query_error)?,
                );
            }
            for action in &mut actions {
                if let Some(vars) = by_action.remove(&action.id) {
                    action.updated_state_variables = vars;
                }
            }
        }
        Ok(actions)
    }

    async fn state_statistics(
        &self,
        filter: &StatisticsFilter,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, StateExecutionStatistics>, RepositoryError> {
        let now = format_datetime(&now);
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT state, \
             SUM(CASE WHEN executor_id IS NOT NULL THEN 1 ELSE 0 END) AS executing, \
             SUM(CASE WHEN executor_id IS NULL AND next_activation <= ",
        );
        qb.push_bind(now.clone())
            .push(" THEN 1 ELSE 0 END) AS queued, SUM(CASE WHEN executor_id IS NULL AND next_activation > ")
            .push_bind(now)
            .push(
                " THEN 1 ELSE 0 END) AS sleeping, \
                 SUM(CASE WHEN executor_id IS NULL AND next_activation IS NULL THEN 1 ELSE 0 END) AS non_scheduled \
                 FROM workflow_instances WHERE type = ",
            )
            .push_bind(filter.workflow_type.clone());

        let windows = [
            ("created", ">=", filter.created_after),
            ("created", "<=", filter.created_before),
            ("modified", ">=", filter.modified_after),
            ("modified", "<=", filter.modified_before),
        ];
        for (column, op, bound) in windows {
            if let Some(bound) = bound {
                qb.push(format!(" AND {column} {op} "))
                    .push_bind(format_datetime(&bound));
            }
        }
        qb.push(" GROUP BY state");

        let rows = qb
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut stats = BTreeMap::new();
        for row in &rows {
            let count = |column: &str| -> Result<u64, RepositoryError> {
                let value: i64 = row.try_get(column).map_err(query_error)?;
                Ok(value.max(0) as u64)
            };
            stats.insert(
                row.try_get::<String, _>("state").map_err(query_error)?,
                StateExecutionStatistics {
                    executing: count("executing")?,
                    queued: count("queued")?,
                    sleeping: count("sleeping")?,
                    non_scheduled: count("non_scheduled")?,
                },
            );
        }
        Ok(stats)
    }
}
