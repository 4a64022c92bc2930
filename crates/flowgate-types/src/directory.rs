//! Organization directory types: users, their managers, and delegations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user as the directory knows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: String,
    pub display_name: String,
    /// Direct manager, if any. Top of the hierarchy has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A time-bounded grant letting `to_user` act for `from_user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: Uuid,
    pub from_user: String,
    pub to_user: String,
    pub starts_at: DateTime<Utc>,
    /// Exclusive upper bound.
    pub ends_at: DateTime<Utc>,
    pub active: bool,
}

impl Delegation {
    /// Active and `at` falls in `[starts_at, ends_at)`.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.active && self.starts_at <= at && at < self.ends_at
    }
}
