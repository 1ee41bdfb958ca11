//! Storage of workflow definition summaries.

use chrono::{DateTime, Utc};
use flowline_types::definition::DefinitionSummary;
use flowline_types::error::RepositoryError;

pub trait DefinitionRepository: Send + Sync {
    /// Upsert the summary of a registered workflow type.
    fn store_definition(
        &self,
        summary: &DefinitionSummary,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_definitions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<DefinitionSummary>, RepositoryError>> + Send;
}
