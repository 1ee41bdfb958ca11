//! Executor (worker node) repository trait definition.

use chrono::{DateTime, Utc};
use flowline_types::error::RepositoryError;
use flowline_types::executor::{Executor, ExecutorRegistration};

pub trait ExecutorRepository: Send + Sync {
    /// Record a starting node. Returns its executor id.
    fn register(
        &self,
        registration: &ExecutorRegistration,
    ) -> impl std::future::Future<Output = Result<i64, RepositoryError>> + Send;

    /// Refresh the heartbeat of `id`.
    fn heartbeat(
        &self,
        id: i64,
        active: DateTime<Utc>,
        expires: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Mark a cleanly stopped node so peers never wait for it to expire.
    fn mark_shutdown(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List executors, optionally restricted to one group.
    fn list_executors(
        &self,
        executor_group: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<Executor>, RepositoryError>> + Send;
}
