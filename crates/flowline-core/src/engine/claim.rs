//! Claims due workflow instances for one executor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowline_types::error::{PollingError, RepositoryError};

use crate::repository::instance::InstanceRepository;

/// Binds the store's claim primitive to this executor's identity and group.
pub struct ClaimEngine<I> {
    instances: Arc<I>,
    executor_id: i64,
    executor_group: String,
}

impl<I: InstanceRepository> ClaimEngine<I> {
    pub fn new(instances: Arc<I>, executor_id: i64, executor_group: impl Into<String>) -> Self {
        Self {
            instances,
            executor_id,
            executor_group: executor_group.into(),
        }
    }

    pub fn executor_id(&self) -> i64 {
        self.executor_id
    }

    /// Claim up to `max_count` instances that are due at `now`.
    ///
    /// A short batch is a normal outcome. A [`PollingError::RaceCondition`]
    /// tells the caller to back off before polling again.
    pub async fn claim_next(&self, max_count: usize, now: DateTime<Utc>) -> Result<Vec<i64>, PollingError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let ids = self
            .instances
            .claim_next(self.executor_id, &self.executor_group, max_count, now)
            .await?;
        tracing::debug!(
            executor_id = self.executor_id,
            requested = max_count,
            claimed = ids.len(),
            "polled workflow instances"
        );
        Ok(ids)
    }

    /// Give back a claimed instance this executor will not run.
    pub async fn release(&self, instance_id: i64, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let released = self.instances.release_claim(self.executor_id, instance_id, now).await?;
        if released {
            tracing::info!(executor_id = self.executor_id, instance_id, "released claimed workflow instance");
        }
        Ok(released)
    }
}
