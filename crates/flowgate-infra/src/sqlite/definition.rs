//! SQLite workflow definition repository.
//!
//! Definitions are stored as JSON blobs keyed by service key. Saving a
//! definition replaces the current one; requests already running keep the
//! snapshot they were created with.

use chrono::Utc;
use flowgate_core::repository::definition::DefinitionRepository;
use flowgate_types::error::RepositoryError;
use flowgate_types::workflow::WorkflowDefinition;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

/// SQLite-backed implementation of `DefinitionRepository`.
#[derive(Clone)]
pub struct SqliteDefinitionRepository {
    pool: DatabasePool,
}

impl SqliteDefinitionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn row_to_definition(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowDefinition, RepositoryError> {
    let json: String = row.try_get("definition").map_err(query_error)?;
    serde_json::from_str(&json)
        .map_err(|e| RepositoryError::Query(format!("invalid workflow definition JSON: {e}")))
}

impl DefinitionRepository for SqliteDefinitionRepository {
    async fn load_definition(
        &self,
        service_key: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflow_definitions WHERE service_key = ?")
            .bind(service_key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(row_to_definition).transpose()
    }

    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = serde_json::to_string(def)
            .map_err(|e| RepositoryError::Query(format!("serialize definition: {e}")))?;
        let now = format_datetime(&Utc::now());

        sqlx::query(
            r#"INSERT INTO workflow_definitions (service_key, version, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(service_key) DO UPDATE SET
                 version = excluded.version,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&def.service_key)
        .bind(def.version)
        .bind(&definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query("SELECT definition FROM workflow_definitions ORDER BY service_key ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter().map(row_to_definition).collect()
    }
}
