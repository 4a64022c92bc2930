//! User directory and delegation repository trait definitions.

use chrono::{DateTime, Utc};
use flowgate_types::directory::Delegation;
use flowgate_types::error::RepositoryError;

/// Read access to the organisation chart.
pub trait DirectoryRepository: Send + Sync {
    /// The user's direct manager, if they have one.
    fn get_manager(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, RepositoryError>> + Send;

    /// Roles the user holds.
    fn user_roles(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}

/// Temporary hand-over of one user's approval authority to another.
pub trait DelegationRepository: Send + Sync {
    /// Delegations granted by `user_id` that cover `at`, most recent first.
    fn list_active_delegations_from(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Delegation>, RepositoryError>> + Send;

    /// Delegations received by `user_id` that cover `at`, most recent first.
    fn list_active_delegations_to(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Delegation>, RepositoryError>> + Send;
}
