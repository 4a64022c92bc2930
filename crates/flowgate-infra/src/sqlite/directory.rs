//! SQLite organization directory: users, managers, roles, and delegations.

use chrono::{DateTime, Utc};
use flowgate_core::repository::directory::{DelegationRepository, DirectoryRepository};
use flowgate_types::directory::{Delegation, DirectoryUser};
use flowgate_types::error::RepositoryError;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

/// SQLite-backed implementation of `DirectoryRepository` and
/// `DelegationRepository`, plus the writes the CLI needs to maintain them.
#[derive(Clone)]
pub struct SqliteDirectoryRepository {
    pool: DatabasePool,
}

impl SqliteDirectoryRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a user together with their role set.
    pub async fn upsert_user(&self, user: &DirectoryUser) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO users (id, display_name, manager_id) VALUES (?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 manager_id = excluded.manager_id"#,
        )
        .bind(&user.id)
        .bind(&user.display_name)
        .bind(&user.manager_id)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
            .bind(&user.id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        for role in &user.roles {
            sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?, ?)")
                .bind(&user.id)
                .bind(role)
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<DirectoryUser>, RepositoryError> {
        let row = sqlx::query("SELECT id, display_name, manager_id FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(DirectoryUser {
            id: row.try_get("id").map_err(query_error)?,
            display_name: row.try_get("display_name").map_err(query_error)?,
            manager_id: row.try_get("manager_id").map_err(query_error)?,
            roles: self.user_roles(user_id).await?,
        }))
    }

    pub async fn add_delegation(&self, delegation: &Delegation) -> Result<(), RepositoryError> {
        if delegation.ends_at <= delegation.starts_at {
            return Err(RepositoryError::Query(
                "delegation must end after it starts".to_string(),
            ));
        }

        sqlx::query(
            r#"INSERT INTO delegations (id, from_user, to_user, starts_at, ends_at, active)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(delegation.id.to_string())
        .bind(&delegation.from_user)
        .bind(&delegation.to_user)
        .bind(format_datetime(&delegation.starts_at))
        .bind(format_datetime(&delegation.ends_at))
        .bind(delegation.active)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    /// Active delegations matching `column = user_id` that cover `at`.
    ///
    /// Window checks run on parsed timestamps rather than in SQL.
    async fn delegations_where(
        &self,
        column: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        let sql = format!("SELECT * FROM delegations WHERE {column} = ? AND active = 1");
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut found = Vec::with_capacity(rows.len());
        for row in &rows {
            let delegation = row_to_delegation(row)?;
            if delegation.covers(at) {
                found.push(delegation);
            }
        }
        // Most recently started first
        found.sort_by(|a, b| b.starts_at.cmp(&a.starts_at));
        Ok(found)
    }
}

fn row_to_delegation(row: &sqlx::sqlite::SqliteRow) -> Result<Delegation, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let starts_at: String = row.try_get("starts_at").map_err(query_error)?;
    let ends_at: String = row.try_get("ends_at").map_err(query_error)?;

    Ok(Delegation {
        id: parse_uuid(&id)?,
        from_user: row.try_get("from_user").map_err(query_error)?,
        to_user: row.try_get("to_user").map_err(query_error)?,
        starts_at: parse_datetime(&starts_at)?,
        ends_at: parse_datetime(&ends_at)?,
        active: row.try_get("active").map_err(query_error)?,
    })
}

impl DirectoryRepository for SqliteDirectoryRepository {
    async fn get_manager(&self, user_id: &str) -> Result<Option<String>, RepositoryError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT manager_id FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(query_error)?;

        Ok(row.and_then(|(manager,)| manager))
    }

    async fn user_roles(&self, user_id: &str) -> Result<Vec<String>, RepositoryError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT role FROM user_roles WHERE user_id = ? ORDER BY role ASC")
                .bind(user_id)
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_error)?;

        Ok(rows.into_iter().map(|(role,)| role).collect())
    }
}

impl DelegationRepository for SqliteDirectoryRepository {
    async fn list_active_delegations_from(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        self.delegations_where("from_user", user_id, at).await
    }

    async fn list_active_delegations_to(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        self.delegations_where("to_user", user_id, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_support::test_pool;
    use chrono::Duration;
    use uuid::Uuid;

    fn make_user(id: &str, manager: Option<&str>, roles: &[&str]) -> DirectoryUser {
        DirectoryUser {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            manager_id: manager.map(str::to_string),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn make_delegation(from: &str, to: &str, starts_at: DateTime<Utc>, days: i64) -> Delegation {
        Delegation {
            id: Uuid::now_v7(),
            from_user: from.to_string(),
            to_user: to.to_string(),
            starts_at,
            ends_at: starts_at + Duration::days(days),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_manager_and_roles() {
        let repo = SqliteDirectoryRepository::new(test_pool().await);
        repo.upsert_user(&make_user("emp", Some("mgr"), &["staff"]))
            .await
            .unwrap();
        repo.upsert_user(&make_user("mgr", None, &["finance-team", "approvers"]))
            .await
            .unwrap();

        assert_eq!(repo.get_manager("emp").await.unwrap().as_deref(), Some("mgr"));
        assert_eq!(repo.get_manager("mgr").await.unwrap(), None);
        assert_eq!(repo.get_manager("ghost").await.unwrap(), None);
        assert_eq!(
            repo.user_roles("mgr").await.unwrap(),
            vec!["approvers", "finance-team"]
        );
    }

    #[tokio::test]
    async fn test_upsert_replaces_roles() {
        let repo = SqliteDirectoryRepository::new(test_pool().await);
        repo.upsert_user(&make_user("u", None, &["a", "b"])).await.unwrap();
        repo.upsert_user(&make_user("u", Some("boss"), &["c"])).await.unwrap();

        let user = repo.get_user("u").await.unwrap().unwrap();
        assert_eq!(user.roles, vec!["c"]);
        assert_eq!(user.manager_id.as_deref(), Some("boss"));
    }

    #[tokio::test]
    async fn test_active_delegations_window() {
        let repo = SqliteDirectoryRepository::new(test_pool().await);
        let now = Utc::now();
        repo.add_delegation(&make_delegation("mgr", "deputy", now - Duration::days(1), 7))
            .await
            .unwrap();
        repo.add_delegation(&make_delegation("mgr", "old", now - Duration::days(30), 7))
            .await
            .unwrap();

        let from = repo.list_active_delegations_from("mgr", now).await.unwrap();
        assert_eq!(from.len(), 1);
        assert_eq!(from[0].to_user, "deputy");

        let to = repo.list_active_delegations_to("deputy", now).await.unwrap();
        assert_eq!(to.len(), 1);
        assert!(repo.list_active_delegations_to("old", now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_delegation_ignored() {
        let repo = SqliteDirectoryRepository::new(test_pool().await);
        let now = Utc::now();
        let mut d = make_delegation("mgr", "deputy", now - Duration::hours(1), 1);
        d.active = false;
        repo.add_delegation(&d).await.unwrap();

        assert!(repo.list_active_delegations_from("mgr", now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_window_rejected() {
        let repo = SqliteDirectoryRepository::new(test_pool().await);
        let now = Utc::now();
        let d = make_delegation("mgr", "deputy", now, 0);
        assert!(repo.add_delegation(&d).await.is_err());
    }
}
