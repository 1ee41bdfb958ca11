//! SQLite definition repository: stores each workflow type's summary as JSON.

use chrono::{DateTime, Utc};
use flowline_core::repository::definition::DefinitionRepository;
use flowline_types::definition::DefinitionSummary;
use flowline_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

pub struct SqliteDefinitionRepository {
    pool: DatabasePool,
}

impl SqliteDefinitionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl DefinitionRepository for SqliteDefinitionRepository {
    async fn store_definition(&self, summary: &DefinitionSummary, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        let json = serde_json::to_string(summary)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize definition: {e}")))?;

        sqlx::query(
            "INSERT INTO workflow_definitions (type, definition, modified) VALUES (?, ?, ?)
             ON CONFLICT(type) DO UPDATE SET definition = excluded.definition, modified = excluded.modified
             WHERE definition != excluded.definition",
        )
        .bind(&summary.workflow_type)
        .bind(json)
        .bind(format_datetime(&now))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn list_definitions(&self) -> Result<Vec<DefinitionSummary>, RepositoryError> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT definition FROM workflow_definitions ORDER BY type ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|json| {
                serde_json::from_str(json)
                    .map_err(|e| RepositoryError::Query(format!("corrupt definition row: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_types::definition::{StateKind, StateSummary};

    fn summary(workflow_type: &str, states: &[&str]) -> DefinitionSummary {
        DefinitionSummary {
            workflow_type: workflow_type.to_string(),
            description: String::new(),
            initial_state: states[0].to_string(),
            states: states
                .iter()
                .enumerate()
                .map(|(i, name)| StateSummary {
                    name: name.to_string(),
                    kind: if i == 0 { StateKind::Start } else { StateKind::End },
                    description: String::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_store_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let repo = SqliteDefinitionRepository::new(DatabasePool::new(&url).await.unwrap());

        repo.store_definition(&summary("order", &["begin", "done"]), Utc::now())
            .await
            .unwrap();
        repo.store_definition(&summary("billing", &["begin", "done"]), Utc::now())
            .await
            .unwrap();

        let listed = repo.list_definitions().await.unwrap();
        let types: Vec<&str> = listed.iter().map(|d| d.workflow_type.as_str()).collect();
        assert_eq!(types, vec!["billing", "order"]);
        assert_eq!(listed[1].states[0].kind, StateKind::Start);
    }

    #[tokio::test]
    async fn test_store_replaces_changed_definition() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let repo = SqliteDefinitionRepository::new(DatabasePool::new(&url).await.unwrap());

        repo.store_definition(&summary("order", &["begin", "done"]), Utc::now())
            .await
            .unwrap();
        repo.store_definition(&summary("order", &["begin", "review", "done"]), Utc::now())
            .await
            .unwrap();

        let listed = repo.list_definitions().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].states.len(), 3);
    }
}
