//! The dispatcher control loop of one node.
//!
//! wait for pool capacity -> heartbeat/recover -> stuck check -> claim ->
//! submit to pool -> sleep when idle (fixed) or on a claim race (jittered).
//! Per-cycle failures are logged and followed by a fixed sleep; the loop only
//! exits on shutdown.

use std::sync::Arc;
use std::time::Duration;

use flowline_types::error::PollingError;
use rand::Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::clock::Clock;
use crate::engine::claim::ClaimEngine;
use crate::engine::periodic_logger::PeriodicLogger;
use crate::engine::processor::StateProcessor;
use crate::engine::recovery::RecoveryManager;
use crate::engine::worker_pool::WorkerPool;
use crate::repository::executor::ExecutorRepository;
use crate::repository::instance::InstanceRepository;

/// Lifecycle of the dispatcher loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatcherState::Starting => write!(f, "starting"),
            DispatcherState::Running => write!(f, "running"),
            DispatcherState::ShuttingDown => write!(f, "shutting_down"),
            DispatcherState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Loop timing knobs.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub sleep: Duration,
    pub stuck_threshold: Duration,
    pub stuck_warning_period: Duration,
    pub shutdown_timeout: Duration,
}

/// Result of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    Dispatched(usize),
    Idle,
    /// No capacity before the next heartbeat boundary.
    Busy,
    Cancelled,
}

pub struct Dispatcher<I, E> {
    executors: Arc<E>,
    clock: Arc<dyn Clock>,
    executor_id: i64,
    settings: DispatcherSettings,
    pool: WorkerPool,
    claim: ClaimEngine<I>,
    recovery: RecoveryManager<I, E>,
    processor: Arc<StateProcessor<I>>,
    stuck_logger: PeriodicLogger,
    state: watch::Sender<DispatcherState>,
    shutdown: CancellationToken,
}

impl<I, E> Dispatcher<I, E>
where
    I: InstanceRepository + 'static,
    E: ExecutorRepository + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executors: Arc<E>,
        clock: Arc<dyn Clock>,
        executor_id: i64,
        settings: DispatcherSettings,
        pool: WorkerPool,
        claim: ClaimEngine<I>,
        recovery: RecoveryManager<I, E>,
        processor: Arc<StateProcessor<I>>,
        state: watch::Sender<DispatcherState>,
        shutdown: CancellationToken,
    ) -> Self {
        let stuck_logger = PeriodicLogger::new(settings.stuck_warning_period);
        Self {
            executors,
            clock,
            executor_id,
            settings,
            pool,
            claim,
            recovery,
            processor,
            stuck_logger,
            state,
            shutdown,
        }
    }

    /// Run until the shutdown token is cancelled, then drain and deregister.
    pub async fn run(mut self) {
        self.state.send_replace(DispatcherState::Running);
        tracing::info!(
            executor_id = self.executor_id,
            threads = self.pool.thread_count(),
            "workflow dispatcher started"
        );

        while !self.shutdown.is_cancelled() {
            match self.dispatch_once().await {
                Ok(Cycle::Dispatched(_)) | Ok(Cycle::Busy) | Ok(Cycle::Cancelled) => {}
                Ok(Cycle::Idle) => self.sleep(self.settings.sleep).await,
                Err(PollingError::RaceCondition { lost, candidates }) => {
                    tracing::info!(
                        executor_id = self.executor_id,
                        lost,
                        candidates,
                        "another executor claimed the same instances, backing off"
                    );
                    let pause = self.jittered_sleep();
                    self.sleep(pause).await;
                }
                Err(PollingError::Repository(e)) => {
                    tracing::error!(
                        executor_id = self.executor_id,
                        error = %e,
                        "dispatch cycle failed"
                    );
                    self.sleep(self.settings.sleep).await;
                }
            }
        }

        self.stop().await;
    }

    async fn dispatch_once(&mut self) -> Result<Cycle, PollingError> {
        let deadline = tokio::time::Instant::now() + self.recovery.max_wait();
        let has_capacity = tokio::select! {
            ready = self.pool.wait_until_capacity_at_least(1, deadline) => ready,
            _ = self.shutdown.cancelled() => return Ok(Cycle::Cancelled),
        };

        if self.recovery.tick().await? {
            self.recovery.recover_dead_nodes().await?;
        }

        let stuck = self.pool.potentially_stuck(self.settings.stuck_threshold);
        if stuck > 0 && self.stuck_logger.should_log() {
            tracing::warn!(
                executor_id = self.executor_id,
                stuck,
                threshold_secs = self.settings.stuck_threshold.as_secs(),
                "state processors running longer than the stuck threshold"
            );
        }

        if !has_capacity {
            return Ok(Cycle::Busy);
        }

        let capacity = self.pool.remaining_capacity();
        let ids = self.claim.claim_next(capacity, self.clock.now()).await?;
        if ids.is_empty() {
            return Ok(Cycle::Idle);
        }

        let claimed = ids.len();
        for instance_id in ids {
            let processor = Arc::clone(&self.processor);
            let task = async move { processor.run(instance_id).await }
                .instrument(tracing::info_span!("process_instance", instance_id));
            if let Err(e) = self.pool.execute(task) {
                tracing::warn!(
                    instance_id,
                    error = %e,
                    "could not queue claimed workflow instance, releasing it"
                );
                if let Err(e) = self.claim.release(instance_id, self.clock.now()).await {
                    tracing::error!(
                        instance_id,
                        error = %e,
                        "failed to release claimed workflow instance"
                    );
                }
            }
        }
        Ok(Cycle::Dispatched(claimed))
    }

    fn jittered_sleep(&self) -> Duration {
        let max_ms = self.settings.sleep.as_millis().max(1) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Sleep unless shutdown is requested first.
    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    async fn stop(self) {
        self.state.send_replace(DispatcherState::ShuttingDown);
        tracing::info!(executor_id = self.executor_id, "workflow dispatcher shutting down");

        self.pool.shutdown(self.settings.shutdown_timeout).await;

        if let Err(e) = self
            .executors
            .mark_shutdown(self.executor_id, self.clock.now())
            .await
        {
            tracing::error!(
                executor_id = self.executor_id,
                error = %e,
                "failed to mark executor as shut down"
            );
        }

        self.state.send_replace(DispatcherState::Stopped);
        tracing::info!(executor_id = self.executor_id, "workflow dispatcher stopped");
    }
}
