//! Executor heartbeat and dead-node recovery.
//!
//! Every node refreshes its executor row once per keepalive interval and, on
//! the same boundary, releases instances still owned by executors whose
//! heartbeat expired. Recovery is a guarded update on the dead owner, so any
//! number of nodes may run it concurrently.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use flowline_types::error::RepositoryError;

use crate::clock::Clock;
use crate::repository::executor::ExecutorRepository;
use crate::repository::instance::InstanceRepository;

pub struct RecoveryManager<I, E> {
    instances: Arc<I>,
    executors: Arc<E>,
    clock: Arc<dyn Clock>,
    executor_id: i64,
    executor_group: String,
    keepalive_interval: Duration,
    dead_node_timeout: Duration,
    next_heartbeat: DateTime<Utc>,
}

impl<I: InstanceRepository, E: ExecutorRepository> RecoveryManager<I, E> {
    /// The first [`tick`](Self::tick) is always a heartbeat boundary.
    pub fn new(
        instances: Arc<I>,
        executors: Arc<E>,
        clock: Arc<dyn Clock>,
        executor_id: i64,
        executor_group: impl Into<String>,
        keepalive_interval: std::time::Duration,
        dead_node_timeout: std::time::Duration,
    ) -> Self {
        let next_heartbeat = clock.now();
        Self {
            instances,
            executors,
            clock,
            executor_id,
            executor_group: executor_group.into(),
            keepalive_interval: to_chrono(keepalive_interval),
            dead_node_timeout: to_chrono(dead_node_timeout),
            next_heartbeat,
        }
    }

    /// Heartbeat if the keepalive interval elapsed. Returns `true` on a
    /// heartbeat boundary, when the caller should run recovery.
    pub async fn tick(&mut self) -> Result<bool, RepositoryError> {
        let now = self.clock.now();
        if now < self.next_heartbeat {
            return Ok(false);
        }
        self.executors
            .heartbeat(self.executor_id, now, now + self.dead_node_timeout)
            .await?;
        self.next_heartbeat = now + self.keepalive_interval;
        tracing::trace!(executor_id = self.executor_id, "executor heartbeat");
        Ok(true)
    }

    /// Time left until the next heartbeat boundary. The dispatcher never
    /// blocks longer than this.
    pub fn max_wait(&self) -> std::time::Duration {
        (self.next_heartbeat - self.clock.now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }

    pub fn next_heartbeat(&self) -> DateTime<Utc> {
        self.next_heartbeat
    }

    /// Release instances owned by expired executors of this group.
    pub async fn recover_dead_nodes(&self) -> Result<u64, RepositoryError> {
        let recovered = self
            .instances
            .recover_dead_nodes(self.executor_id, &self.executor_group, self.clock.now())
            .await?;
        if recovered > 0 {
            tracing::warn!(
                executor_id = self.executor_id,
                recovered,
                "recovered workflow instances from dead executors"
            );
        }
        Ok(recovered)
    }
}

fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::days(36_500))
}
