//! Assignee resolution: turns a node's role token into a task owner.
//!
//! Tokens:
//! - `DIRECT_MANAGER` -- the requester's manager
//! - `MANAGER_LEVEL_<n>` -- `n` levels up the chain (`MANAGER_LEVEL_1` is the direct manager)
//! - anything else -- a literal role; any holder of the role may act
//!
//! A resolved user is replaced by their delegate when a delegation covers
//! the resolution time. Substitution is a single hop; a delegate's own
//! delegations are not followed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use flowgate_types::request::Assignee;
use uuid::Uuid;

use super::definition::WorkflowError;
use crate::repository::directory::{DelegationRepository, DirectoryRepository};

pub const DIRECT_MANAGER: &str = "DIRECT_MANAGER";
pub const MANAGER_LEVEL_PREFIX: &str = "MANAGER_LEVEL_";

/// Default bound on `MANAGER_LEVEL_<n>`.
pub const DEFAULT_MAX_MANAGER_DEPTH: u32 = 10;

/// A parsed role token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleToken {
    /// Walk `level` steps up the management chain from the requester.
    Manager { level: u32 },
    /// Literal role name.
    Role(String),
}

impl RoleToken {
    pub fn parse(token: &str) -> Result<Self, WorkflowError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(WorkflowError::AssigneeResolution {
                token: token.to_string(),
                reason: "role token is empty".to_string(),
            });
        }
        if token == DIRECT_MANAGER {
            return Ok(RoleToken::Manager { level: 1 });
        }
        if let Some(level) = token.strip_prefix(MANAGER_LEVEL_PREFIX) {
            return match level.parse::<u32>() {
                Ok(level) if level >= 1 => Ok(RoleToken::Manager { level }),
                _ => Err(WorkflowError::AssigneeResolution {
                    token: token.to_string(),
                    reason: "manager level must be a positive integer".to_string(),
                }),
            };
        }
        Ok(RoleToken::Role(token.to_string()))
    }
}

/// Resolves role tokens against the directory and delegation stores.
pub struct AssigneeResolver<'a, U, G> {
    directory: &'a U,
    delegations: &'a G,
    max_manager_depth: u32,
}

impl<'a, U: DirectoryRepository, G: DelegationRepository> AssigneeResolver<'a, U, G> {
    pub fn new(directory: &'a U, delegations: &'a G) -> Self {
        Self {
            directory,
            delegations,
            max_manager_depth: DEFAULT_MAX_MANAGER_DEPTH,
        }
    }

    pub fn with_max_manager_depth(mut self, depth: u32) -> Self {
        self.max_manager_depth = depth;
        self
    }

    /// Resolve `role_token` for a request raised by `requester_id`, now.
    pub async fn resolve_assignee(
        &self,
        request_id: &Uuid,
        role_token: &str,
        requester_id: &str,
    ) -> Result<Assignee, WorkflowError> {
        self.resolve_assignee_at(request_id, role_token, requester_id, Utc::now())
            .await
    }

    /// Resolve `role_token` as of `at`.
    pub async fn resolve_assignee_at(
        &self,
        request_id: &Uuid,
        role_token: &str,
        requester_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Assignee, WorkflowError> {
        let assignee = match RoleToken::parse(role_token)? {
            RoleToken::Role(role) => Assignee::Role { role },
            RoleToken::Manager { level } => {
                let manager = self.walk_managers(role_token, requester_id, level).await?;
                Assignee::User {
                    user_id: self.apply_delegation(manager, at).await?,
                }
            }
        };
        tracing::debug!(%request_id, token = role_token, %assignee, "assignee resolved");
        Ok(assignee)
    }

    /// Users whose tasks `user_id` may work on at `at`: themselves plus
    /// everyone currently delegating to them.
    pub async fn acting_for(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<String>, WorkflowError> {
        let mut users = vec![user_id.to_string()];
        for delegation in self
            .delegations
            .list_active_delegations_to(user_id, at)
            .await?
        {
            if delegation.covers(at) && !users.contains(&delegation.from_user) {
                users.push(delegation.from_user);
            }
        }
        Ok(users)
    }

    async fn walk_managers(
        &self,
        token: &str,
        requester_id: &str,
        level: u32,
    ) -> Result<String, WorkflowError> {
        if level > self.max_manager_depth {
            return Err(WorkflowError::AssigneeResolution {
                token: token.to_string(),
                reason: format!(
                    "level {level} exceeds the maximum of {}",
                    self.max_manager_depth
                ),
            });
        }

        let mut visited = HashSet::from([requester_id.to_string()]);
        let mut current = requester_id.to_string();
        for walked in 0..level {
            let Some(manager) = self.directory.get_manager(&current).await? else {
                return Err(WorkflowError::AssigneeResolution {
                    token: token.to_string(),
                    reason: format!(
                        "management chain of '{requester_id}' ends at '{current}' after {walked} level(s)"
                    ),
                });
            };
            if !visited.insert(manager.clone()) {
                return Err(WorkflowError::AssigneeResolution {
                    token: token.to_string(),
                    reason: format!("management chain of '{requester_id}' loops at '{manager}'"),
                });
            }
            current = manager;
        }
        Ok(current)
    }

    async fn apply_delegation(
        &self,
        user_id: String,
        at: DateTime<Utc>,
    ) -> Result<String, WorkflowError> {
        let delegate = self
            .delegations
            .list_active_delegations_from(&user_id, at)
            .await?
            .into_iter()
            .find(|d| d.covers(at));
        match delegate {
            Some(d) => {
                tracing::debug!(from = %user_id, to = %d.to_user, "delegation applied");
                Ok(d.to_user)
            }
            None => Ok(user_id),
        }
    }
}
