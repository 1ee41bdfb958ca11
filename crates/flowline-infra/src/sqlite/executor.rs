//! SQLite executor repository implementation.

use chrono::{DateTime, Utc};
use flowline_core::repository::executor::ExecutorRepository;
use flowline_types::error::RepositoryError;
use flowline_types::executor::{Executor, ExecutorRegistration};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_optional_datetime, query_error};

/// SQLite-backed implementation of `ExecutorRepository`.
pub struct SqliteExecutorRepository {
    pool: DatabasePool,
}

impl SqliteExecutorRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn executor_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Executor, RepositoryError> {
    let pid: i64 = row.try_get("pid").map_err(query_error)?;
    Ok(Executor {
        id: row.try_get("id").map_err(query_error)?,
        host: row.try_get("host").map_err(query_error)?,
        pid: u32::try_from(pid).map_err(|_| RepositoryError::Query(format!("invalid pid: {pid}")))?,
        executor_group: row.try_get("executor_group").map_err(query_error)?,
        started: parse_datetime(&row.try_get::<String, _>("started").map_err(query_error)?)?,
        active: parse_datetime(&row.try_get::<String, _>("active").map_err(query_error)?)?,
        expires: parse_datetime(&row.try_get::<String, _>("expires").map_err(query_error)?)?,
        stopped: parse_optional_datetime(row.try_get("stopped").map_err(query_error)?)?,
    })
}

impl ExecutorRepository for SqliteExecutorRepository {
    async fn register(&self, registration: &ExecutorRegistration) -> Result<i64, RepositoryError> {
        let started = format_datetime(&registration.started);
        sqlx::query_scalar(
            "INSERT INTO executors (host, pid, executor_group, started, active, expires)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&registration.host)
        .bind(i64::from(registration.pid))
        .bind(&registration.executor_group)
        .bind(&started)
        .bind(&started)
        .bind(format_datetime(&registration.expires))
        .fetch_one(&self.pool.writer)
        .await
        .map_err(query_error)
    }

    async fn heartbeat(&self, id: i64, active: DateTime<Utc>, expires: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE executors SET active = ?, expires = ? WHERE id = ?")
            .bind(format_datetime(&active))
            .bind(format_datetime(&expires))
            .bind(id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_shutdown(&self, id: i64, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        let now = format_datetime(&now);
        let result = sqlx::query("UPDATE executors SET stopped = ?, expires = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_executors(&self, executor_group: Option<&str>) -> Result<Vec<Executor>, RepositoryError> {
        let rows = match executor_group {
            Some(group) => {
                sqlx::query("SELECT * FROM executors WHERE executor_group = ? ORDER BY id ASC")
                    .bind(group)
                    .fetch_all(&self.pool.reader)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM executors ORDER BY id ASC")
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_error)?;

        rows.iter().map(executor_from_row).collect()
    }
}
