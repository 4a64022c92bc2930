//! SQLite SLA policies.
//!
//! Stored `(service_key, step_key) -> minutes` rows win over the `[sla]`
//! table from `config.toml`, which is consulted as a fallback.

use std::collections::HashMap;

use flowgate_core::repository::sla::SlaRepository;
use flowgate_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::query_error;

/// SQLite-backed implementation of `SlaRepository`.
#[derive(Clone)]
pub struct SqliteSlaRepository {
    pool: DatabasePool,
    defaults: HashMap<String, HashMap<String, u32>>,
}

impl SqliteSlaRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            defaults: HashMap::new(),
        }
    }

    /// Fall back to these minutes when no row is stored for a step.
    pub fn with_defaults(mut self, defaults: HashMap<String, HashMap<String, u32>>) -> Self {
        self.defaults = defaults;
        self
    }

    pub async fn set_policy(
        &self,
        service_key: &str,
        step_key: &str,
        minutes: u32,
    ) -> Result<(), RepositoryError> {
        if minutes == 0 {
            return Err(RepositoryError::Query(
                "SLA duration must be positive".to_string(),
            ));
        }

        sqlx::query(
            r#"INSERT INTO sla_policies (service_key, step_key, duration_minutes) VALUES (?, ?, ?)
               ON CONFLICT(service_key, step_key) DO UPDATE SET
                 duration_minutes = excluded.duration_minutes"#,
        )
        .bind(service_key)
        .bind(step_key)
        .bind(minutes)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }
}

impl SlaRepository for SqliteSlaRepository {
    async fn get_step_duration_minutes(
        &self,
        service_key: &str,
        step_key: &str,
    ) -> Result<Option<u32>, RepositoryError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT duration_minutes FROM sla_policies WHERE service_key = ? AND step_key = ?",
        )
        .bind(service_key)
        .bind(step_key)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        if let Some((minutes,)) = row {
            let minutes = u32::try_from(minutes).map_err(|_| {
                RepositoryError::Query(format!("invalid SLA duration: {minutes}"))
            })?;
            return Ok(Some(minutes));
        }

        Ok(self
            .defaults
            .get(service_key)
            .and_then(|steps| steps.get(step_key))
            .copied())
    }
}
