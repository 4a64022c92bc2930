//! SQLite request repository implementation.
//!
//! Implements `RequestRepository` and `StepRepository` from `flowgate-core`.
//! Every applied transition runs in one writer transaction guarded by the
//! request's version column: a stale `expected_version` updates no row and
//! the whole transition is rolled back as a conflict.

use std::collections::HashSet;

use flowgate_core::repository::request::{RequestRepository, StepRepository};
use flowgate_types::error::RepositoryError;
use flowgate_types::request::{
    AppliedTransition, Assignee, RequestEvent, RequestStatus, StepInstance, StepStatus,
    TaskInstance, TaskStatus, WorkflowRequest,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{enum_from_str, enum_to_str, format_datetime, parse_datetime, parse_uuid, query_error};

/// SQLite-backed implementation of `RequestRepository` and `StepRepository`.
#[derive(Clone)]
pub struct SqliteRequestRepository {
    pool: DatabasePool,
}

impl SqliteRequestRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RequestRow {
    id: String,
    service_key: String,
    requester_id: String,
    status: String,
    data: String,
    definition: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl RequestRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            service_key: row.try_get("service_key")?,
            requester_id: row.try_get("requester_id")?,
            status: row.try_get("status")?,
            data: row.try_get("data")?,
            definition: row.try_get("definition")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_request(self) -> Result<WorkflowRequest, RepositoryError> {
        let status: RequestStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let data = serde_json::from_str(&self.data)
            .map_err(|e| RepositoryError::Query(format!("invalid request data JSON: {e}")))?;
        let definition = serde_json::from_str(&self.definition)
            .map_err(|e| RepositoryError::Query(format!("invalid definition snapshot: {e}")))?;

        Ok(WorkflowRequest {
            id: parse_uuid(&self.id)?,
            service_key: self.service_key,
            requester_id: self.requester_id,
            status,
            data,
            definition,
            version: self.version,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<StepInstance, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let request_id: String = row.try_get("request_id").map_err(query_error)?;
    let status: String = row.try_get("status").map_err(query_error)?;
    let started_at: String = row.try_get("started_at").map_err(query_error)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(query_error)?;

    Ok(StepInstance {
        id: parse_uuid(&id)?,
        request_id: parse_uuid(&request_id)?,
        step_key: row.try_get("step_key").map_err(query_error)?,
        status: enum_from_str(&status, "step status")?,
        started_at: parse_datetime(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_datetime).transpose()?,
    })
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<TaskInstance, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let request_id: String = row.try_get("request_id").map_err(query_error)?;
    let assignee_type: String = row.try_get("assignee_type").map_err(query_error)?;
    let assignee: String = row.try_get("assignee").map_err(query_error)?;
    let status: String = row.try_get("status").map_err(query_error)?;
    let due_at: Option<String> = row.try_get("due_at").map_err(query_error)?;
    let escalate_at: Option<String> = row.try_get("escalate_at").map_err(query_error)?;
    let created_at: String = row.try_get("created_at").map_err(query_error)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(query_error)?;

    let assignee = match assignee_type.as_str() {
        "user" => Assignee::User { user_id: assignee },
        "role" => Assignee::Role { role: assignee },
        other => {
            return Err(RepositoryError::Query(format!(
                "invalid assignee type: {other}"
            )));
        }
    };

    Ok(TaskInstance {
        id: parse_uuid(&id)?,
        request_id: parse_uuid(&request_id)?,
        step_key: row.try_get("step_key").map_err(query_error)?,
        assignee,
        status: enum_from_str(&status, "task status")?,
        due_at: due_at.as_deref().map(parse_datetime).transpose()?,
        escalate_at: escalate_at.as_deref().map(parse_datetime).transpose()?,
        created_at: parse_datetime(&created_at)?,
        completed_at: completed_at.as_deref().map(parse_datetime).transpose()?,
        completed_by: row.try_get("completed_by").map_err(query_error)?,
    })
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<RequestEvent, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let request_id: String = row.try_get("request_id").map_err(query_error)?;
    let from_steps: String = row.try_get("from_steps").map_err(query_error)?;
    let to_steps: String = row.try_get("to_steps").map_err(query_error)?;
    let status: String = row.try_get("status").map_err(query_error)?;
    let at: String = row.try_get("at").map_err(query_error)?;

    Ok(RequestEvent {
        id: parse_uuid(&id)?,
        request_id: parse_uuid(&request_id)?,
        actor: row.try_get("actor").map_err(query_error)?,
        action: row.try_get("action").map_err(query_error)?,
        from_steps: serde_json::from_str(&from_steps)
            .map_err(|e| RepositoryError::Query(format!("invalid from_steps: {e}")))?,
        to_steps: serde_json::from_str(&to_steps)
            .map_err(|e| RepositoryError::Query(format!("invalid to_steps: {e}")))?,
        status: status.parse().map_err(|e: String| RepositoryError::Query(e))?,
        at: parse_datetime(&at)?,
    })
}

fn assignee_parts(assignee: &Assignee) -> (&'static str, &str) {
    match assignee {
        Assignee::User { user_id } => ("user", user_id),
        Assignee::Role { role } => ("role", role),
    }
}

// ---------------------------------------------------------------------------
// Transaction steps
// ---------------------------------------------------------------------------

/// Apply `t` on an open transaction. Fails with `Conflict` when the request
/// has moved past `t.expected_version`.
async fn apply_in_tx(conn: &mut SqliteConnection, t: &AppliedTransition) -> Result<(), RepositoryError> {
    let now = format_datetime(&t.event.at);
    let request_id = t.request_id.to_string();
    let data = t
        .data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    let updated = sqlx::query(
        r#"UPDATE requests
           SET status = ?, version = version + 1, updated_at = ?, data = COALESCE(?, data)
           WHERE id = ? AND version = ?"#,
    )
    .bind(t.status.as_str())
    .bind(&now)
    .bind(&data)
    .bind(&request_id)
    .bind(t.expected_version)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    if updated.rows_affected() == 0 {
        let current: Option<(i64,)> = sqlx::query_as("SELECT version FROM requests WHERE id = ?")
            .bind(&request_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(query_error)?;
        return Err(match current {
            None => RepositoryError::NotFound,
            Some((version,)) => RepositoryError::Conflict(format!(
                "request {} is at version {version}, expected {}",
                t.request_id, t.expected_version
            )),
        });
    }

    let active = enum_to_str(&StepStatus::Active)?;
    let pending = enum_to_str(&TaskStatus::Pending)?;
    let closed_task_status = enum_to_str(&t.closed_task_status)?;
    let completed_by = (t.closed_task_status == TaskStatus::Completed).then_some(t.completed_by.as_str());

    for step_key in &t.steps_to_complete {
        sqlx::query(
            "UPDATE request_steps SET status = ?, completed_at = ? WHERE request_id = ? AND step_key = ? AND status = ?",
        )
        .bind(enum_to_str(&StepStatus::Completed)?)
        .bind(&now)
        .bind(&request_id)
        .bind(step_key)
        .bind(&active)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;

        sqlx::query(
            "UPDATE request_tasks SET status = ?, completed_at = ?, completed_by = ? WHERE request_id = ? AND step_key = ? AND status = ?",
        )
        .bind(&closed_task_status)
        .bind(&now)
        .bind(completed_by)
        .bind(&request_id)
        .bind(step_key)
        .bind(&pending)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }

    if t.cancel_remaining {
        sqlx::query(
            "UPDATE request_steps SET status = ?, completed_at = ? WHERE request_id = ? AND status = ?",
        )
        .bind(enum_to_str(&StepStatus::Cancelled)?)
        .bind(&now)
        .bind(&request_id)
        .bind(&active)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;

        sqlx::query(
            "UPDATE request_tasks SET status = ?, completed_at = ? WHERE request_id = ? AND status = ?",
        )
        .bind(enum_to_str(&TaskStatus::Cancelled)?)
        .bind(&now)
        .bind(&request_id)
        .bind(&pending)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }

    for step in &t.steps_to_open {
        sqlx::query(
            r#"INSERT INTO request_steps (id, request_id, step_key, status, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.id.to_string())
        .bind(step.request_id.to_string())
        .bind(&step.step_key)
        .bind(enum_to_str(&step.status)?)
        .bind(format_datetime(&step.started_at))
        .bind(step.completed_at.as_ref().map(format_datetime))
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }

    for task in &t.tasks_to_open {
        let (assignee_type, assignee) = assignee_parts(&task.assignee);
        sqlx::query(
            r#"INSERT INTO request_tasks
               (id, request_id, step_key, assignee_type, assignee, status,
                due_at, escalate_at, created_at, completed_at, completed_by)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(task.request_id.to_string())
        .bind(&task.step_key)
        .bind(assignee_type)
        .bind(assignee)
        .bind(enum_to_str(&task.status)?)
        .bind(task.due_at.as_ref().map(format_datetime))
        .bind(task.escalate_at.as_ref().map(format_datetime))
        .bind(format_datetime(&task.created_at))
        .bind(task.completed_at.as_ref().map(format_datetime))
        .bind(&task.completed_by)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }

    let event = &t.event;
    let from_steps =
        serde_json::to_string(&event.from_steps).map_err(|e| RepositoryError::Query(e.to_string()))?;
    let to_steps =
        serde_json::to_string(&event.to_steps).map_err(|e| RepositoryError::Query(e.to_string()))?;
    sqlx::query(
        r#"INSERT INTO request_events (id, request_id, actor, action, from_steps, to_steps, status, at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(event.id.to_string())
    .bind(event.request_id.to_string())
    .bind(&event.actor)
    .bind(&event.action)
    .bind(&from_steps)
    .bind(&to_steps)
    .bind(event.status.as_str())
    .bind(format_datetime(&event.at))
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    Ok(())
}

// ---------------------------------------------------------------------------
// RequestRepository impl
// ---------------------------------------------------------------------------

impl RequestRepository for SqliteRequestRepository {
    async fn create_request(
        &self,
        request: &WorkflowRequest,
        initial: &AppliedTransition,
    ) -> Result<(), RepositoryError> {
        let data = serde_json::to_string(&request.data)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let definition = serde_json::to_string(&request.definition)
            .map_err(|e| RepositoryError::Query(format!("serialize definition: {e}")))?;

        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO requests
               (id, service_key, requester_id, status, data, definition, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(request.id.to_string())
        .bind(&request.service_key)
        .bind(&request.requester_id)
        .bind(request.status.as_str())
        .bind(&data)
        .bind(&definition)
        .bind(request.version)
        .bind(format_datetime(&request.created_at))
        .bind(format_datetime(&request.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!(
                        "request {} already exists",
                        request.id
                    ));
                }
            }
            query_error(e)
        })?;

        apply_in_tx(&mut *tx, initial).await?;

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get_request(&self, id: &Uuid) -> Result<Option<WorkflowRequest>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = RequestRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_request()?))
            }
            None => Ok(None),
        }
    }

    async fn apply_transition(&self, transition: &AppliedTransition) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        apply_in_tx(&mut *tx, transition).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn list_steps(&self, request_id: &Uuid) -> Result<Vec<StepInstance>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM request_steps WHERE request_id = ? ORDER BY rowid ASC")
            .bind(request_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter().map(row_to_step).collect()
    }

    async fn list_tasks(&self, request_id: &Uuid) -> Result<Vec<TaskInstance>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM request_tasks WHERE request_id = ? ORDER BY rowid ASC")
            .bind(request_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn list_events(&self, request_id: &Uuid) -> Result<Vec<RequestEvent>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM request_events WHERE request_id = ? ORDER BY rowid ASC")
            .bind(request_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter().map(row_to_event).collect()
    }

    async fn list_open_tasks_for(
        &self,
        user_ids: &[String],
        roles: &[String],
    ) -> Result<Vec<TaskInstance>, RepositoryError> {
        if user_ids.is_empty() && roles.is_empty() {
            return Ok(vec![]);
        }

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT * FROM request_tasks WHERE status = ");
        qb.push_bind(enum_to_str(&TaskStatus::Pending)?);
        qb.push(" AND ((assignee_type = 'user' AND assignee IN (");
        {
            let mut list = qb.separated(", ");
            for user_id in user_ids {
                list.push_bind(user_id.clone());
            }
        }
        qb.push(")) OR (assignee_type = 'role' AND assignee IN (");
        {
            let mut list = qb.separated(", ");
            for role in roles {
                list.push_bind(role.clone());
            }
        }
        qb.push("))) ORDER BY created_at ASC, rowid ASC");

        let rows = qb
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter().map(row_to_task).collect()
    }
}

// ---------------------------------------------------------------------------
// StepRepository impl
// ---------------------------------------------------------------------------

impl StepRepository for SqliteRequestRepository {
    async fn list_completed_steps(
        &self,
        request_id: &Uuid,
        step_keys: &[String],
    ) -> Result<HashSet<String>, RepositoryError> {
        if step_keys.is_empty() {
            return Ok(HashSet::new());
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT DISTINCT step_key FROM request_steps WHERE request_id = ");
        qb.push_bind(request_id.to_string());
        qb.push(" AND status = ");
        qb.push_bind(enum_to_str(&StepStatus::Completed)?);
        qb.push(" AND step_key IN (");
        {
            let mut list = qb.separated(", ");
            for key in step_keys {
                list.push_bind(key.clone());
            }
        }
        qb.push(")");

        let rows = qb
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("step_key").map_err(query_error))
            .collect()
    }

    async fn list_active_steps(&self, request_id: &Uuid) -> Result<Vec<StepInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM request_steps WHERE request_id = ? AND status = ? ORDER BY rowid ASC",
        )
        .bind(request_id.to_string())
        .bind(enum_to_str(&StepStatus::Active)?)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter().map(row_to_step).collect()
    }

    async fn list_pending_tasks(&self, request_id: &Uuid) -> Result<Vec<TaskInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM request_tasks WHERE request_id = ? AND status = ? ORDER BY rowid ASC",
        )
        .bind(request_id.to_string())
        .bind(enum_to_str(&TaskStatus::Pending)?)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter().map(row_to_task).collect()
    }
}
