//! Application state wiring the store, the definitions and the services.
//!
//! Repositories are generic seams in `flowline-core`; AppState pins them to
//! the SQLite implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use flowline_core::definition::registry::DefinitionRegistry;
use flowline_core::service::instance::WorkflowInstanceService;
use flowline_infra::config::{load_engine_config, resolve_database_url};
use flowline_infra::sqlite::definition::SqliteDefinitionRepository;
use flowline_infra::sqlite::executor::SqliteExecutorRepository;
use flowline_infra::sqlite::instance::SqliteInstanceRepository;
use flowline_infra::sqlite::pool::DatabasePool;
use flowline_types::config::EngineConfig;

use crate::demo;

pub type ConcreteInstanceService = WorkflowInstanceService<SqliteInstanceRepository, SqliteExecutorRepository>;

/// Shared state for every CLI command.
#[derive(Clone)]
pub struct AppState {
    pub config: EngineConfig,
    pub instances: Arc<SqliteInstanceRepository>,
    pub executors: Arc<SqliteExecutorRepository>,
    pub definitions: Arc<SqliteDefinitionRepository>,
    pub registry: Arc<DefinitionRegistry>,
    pub instance_service: Arc<ConcreteInstanceService>,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Load the configuration, open the database and wire the services.
    pub async fn init(config_path: &Path, database_url: Option<&str>) -> anyhow::Result<Self> {
        let config = load_engine_config(config_path)
            .await
            .with_context(|| format!("invalid configuration in {}", config_path.display()))?;

        let db_url = resolve_database_url(&config, database_url);
        if let Some(parent) = sqlite_file_path(&db_url).and_then(|p| p.parent().map(Path::to_path_buf)) {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(&parent).await?;
            }
        }
        let db_pool = DatabasePool::new(&db_url)
            .await
            .with_context(|| format!("failed to open database {db_url}"))?;
        tracing::debug!(url = %db_url, "database ready");

        let instances = Arc::new(
            SqliteInstanceRepository::new(db_pool.clone()).with_claim_config(config.claim.clone()),
        );
        let executors = Arc::new(SqliteExecutorRepository::new(db_pool.clone()));
        let definitions = Arc::new(SqliteDefinitionRepository::new(db_pool.clone()));
        let registry = Arc::new(demo::registry()?);

        let instance_service = Arc::new(WorkflowInstanceService::new(
            Arc::clone(&instances),
            Arc::clone(&executors),
            Arc::clone(&registry),
            config.executor.group.clone(),
        ));

        Ok(Self {
            config,
            instances,
            executors,
            definitions,
            registry,
            instance_service,
            db_pool,
        })
    }
}

/// File path of a `sqlite://` URL, without query parameters.
fn sqlite_file_path(url: &str) -> Option<&Path> {
    let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(Path::new(path))
    }
}
