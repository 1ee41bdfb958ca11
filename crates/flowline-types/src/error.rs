use thiserror::Error;

/// Errors from repository operations (used by trait definitions in flowline-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from claiming the next batch of instances.
#[derive(Debug, Error)]
pub enum PollingError {
    /// Too many candidates were claimed by another executor between select and update.
    #[error("race condition while claiming: {lost} of {candidates} candidates already taken")]
    RaceCondition { lost: usize, candidates: usize },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Errors surfaced by instance submission and administration.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("unknown workflow type: '{0}'")]
    UnknownType(String),

    #[error("state '{state}' is not declared by workflow type '{workflow_type}'")]
    UnknownState { workflow_type: String, state: String },

    #[error("workflow instance {0} not found")]
    NotFound(i64),

    #[error("nothing to update for workflow instance {0}")]
    EmptyUpdate(i64),

    #[error("invalid change: {0}")]
    InvalidChange(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Invalid engine configuration; fatal at node startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("failed to read configuration file '{path}': {reason}")]
    Read { path: String, reason: String },
}
