//! Worker node bootstrap.
//!
//! [`Engine::start`] validates the configuration, persists definition
//! summaries, registers the executor and spawns the dispatcher. Any failure
//! here is fatal for the node; after startup the dispatcher never exits on
//! its own.

use std::sync::Arc;

use chrono::Duration;
use flowline_types::config::EngineConfig;
use flowline_types::error::{ConfigError, RepositoryError};
use flowline_types::executor::ExecutorRegistration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::definition::registry::DefinitionRegistry;
use crate::engine::claim::ClaimEngine;
use crate::engine::dispatcher::{Dispatcher, DispatcherSettings, DispatcherState};
use crate::engine::processor::StateProcessor;
use crate::engine::recovery::RecoveryManager;
use crate::engine::worker_pool::WorkerPool;
use crate::repository::definition::DefinitionRepository;
use crate::repository::executor::ExecutorRepository;
use crate::repository::instance::InstanceRepository;

/// Errors that prevent a node from starting.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no workflow definitions registered")]
    NoDefinitions,

    #[error("engine bootstrap failed: {0}")]
    Repository(#[from] RepositoryError),
}

/// A worker node waiting to be started.
pub struct Engine<I, E, D> {
    instances: Arc<I>,
    executors: Arc<E>,
    definitions: Arc<D>,
    registry: Arc<DefinitionRegistry>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl<I, E, D> Engine<I, E, D>
where
    I: InstanceRepository + 'static,
    E: ExecutorRepository + 'static,
    D: DefinitionRepository + 'static,
{
    pub fn new(
        instances: Arc<I>,
        executors: Arc<E>,
        definitions: Arc<D>,
        registry: Arc<DefinitionRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            instances,
            executors,
            definitions,
            registry,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source (tests use a manual clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn start(self) -> Result<DispatcherHandle, EngineError> {
        self.config.validate()?;
        if self.registry.is_empty() {
            return Err(EngineError::NoDefinitions);
        }

        let now = self.clock.now();
        let executor_cfg = &self.config.executor;

        if self.config.dispatcher.persist_definitions {
            for summary in self.registry.summaries() {
                self.definitions.store_definition(&summary, now).await?;
            }
            tracing::debug!(count = self.registry.len(), "stored workflow definitions");
        }

        let dead_node_timeout = Duration::seconds(executor_cfg.dead_node_timeout_secs as i64);
        let registration = ExecutorRegistration {
            host: host_name(),
            pid: std::process::id(),
            executor_group: executor_cfg.group.clone(),
            started: now,
            expires: now + dead_node_timeout,
        };
        let executor_id = self.executors.register(&registration).await?;
        tracing::info!(
            executor_id,
            group = %executor_cfg.group,
            host = %registration.host,
            "registered executor"
        );

        let shutdown = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(DispatcherState::Starting);

        let pool = WorkerPool::new(executor_cfg.thread_count, executor_cfg.queue_size);
        let claim = ClaimEngine::new(Arc::clone(&self.instances), executor_id, executor_cfg.group.clone());
        let recovery = RecoveryManager::new(
            Arc::clone(&self.instances),
            Arc::clone(&self.executors),
            Arc::clone(&self.clock),
            executor_id,
            executor_cfg.group.clone(),
            executor_cfg.keepalive_interval(),
            executor_cfg.dead_node_timeout(),
        );
        let processor = Arc::new(StateProcessor::new(
            Arc::clone(&self.instances),
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
            executor_id,
            self.config.processor.max_subsequent_executions,
            shutdown.clone(),
        ));
        let settings = DispatcherSettings {
            sleep: self.config.dispatcher.sleep(),
            stuck_threshold: executor_cfg.stuck_threshold(),
            stuck_warning_period: self.config.dispatcher.stuck_warning_period(),
            shutdown_timeout: self.config.dispatcher.shutdown_timeout(),
        };

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.executors),
            Arc::clone(&self.clock),
            executor_id,
            settings,
            pool,
            claim,
            recovery,
            processor,
            state_tx,
            shutdown.clone(),
        );
        let join = tokio::spawn(dispatcher.run());

        Ok(DispatcherHandle {
            executor_id,
            state: state_rx,
            shutdown,
            join,
        })
    }
}

/// Handle to a running dispatcher.
pub struct DispatcherHandle {
    executor_id: i64,
    state: watch::Receiver<DispatcherState>,
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn executor_id(&self) -> i64 {
        self.executor_id
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DispatcherState> {
        self.state.clone()
    }

    /// Token that stops the dispatcher when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait until the dispatcher reaches `target`.
    pub async fn wait_for(&mut self, target: DispatcherState) {
        // Err means the dispatcher task is gone; there is nothing left to wait for.
        let _ = self.state.wait_for(|state| *state == target).await;
    }

    /// Request shutdown and wait until the dispatcher has fully exited.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.join.await {
            tracing::error!(executor_id = self.executor_id, error = %e, "dispatcher task failed");
        }
    }
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
