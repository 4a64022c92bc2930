//! Request, step, and task repository trait definitions.
//!
//! `StepRepository` is the narrow read interface the transition engine
//! needs for join checks. `RequestRepository` owns the write side: every
//! transition lands through `apply_transition` as one atomic unit.

use std::collections::HashSet;

use flowgate_types::error::RepositoryError;
use flowgate_types::request::{
    AppliedTransition, RequestEvent, StepInstance, TaskInstance, WorkflowRequest,
};
use uuid::Uuid;

/// Read access to a request's step and task rows.
pub trait StepRepository: Send + Sync {
    /// The subset of `step_keys` that have a completed step instance.
    fn list_completed_steps(
        &self,
        request_id: &Uuid,
        step_keys: &[String],
    ) -> impl std::future::Future<Output = Result<HashSet<String>, RepositoryError>> + Send;

    /// Active step instances, oldest first.
    fn list_active_steps(
        &self,
        request_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepInstance>, RepositoryError>> + Send;

    /// Pending task instances, oldest first.
    fn list_pending_tasks(
        &self,
        request_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<TaskInstance>, RepositoryError>> + Send;
}

/// Repository trait for request persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RequestRepository: Send + Sync {
    /// Insert a new request together with its first transition.
    fn create_request(
        &self,
        request: &WorkflowRequest,
        initial: &AppliedTransition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a request by ID.
    fn get_request(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRequest>, RepositoryError>> + Send;

    /// Commit a transition atomically.
    ///
    /// Fails with `RepositoryError::Conflict` when the stored request version
    /// no longer matches `expected_version`; nothing is written in that case.
    fn apply_transition(
        &self,
        transition: &AppliedTransition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Every step instance of a request, oldest first.
    fn list_steps(
        &self,
        request_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepInstance>, RepositoryError>> + Send;

    /// Every task instance of a request, oldest first.
    fn list_tasks(
        &self,
        request_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<TaskInstance>, RepositoryError>> + Send;

    /// Audit events of a request, oldest first.
    fn list_events(
        &self,
        request_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<RequestEvent>, RepositoryError>> + Send;

    /// Pending tasks across all requests owned by any of `user_ids` or `roles`.
    fn list_open_tasks_for(
        &self,
        user_ids: &[String],
        roles: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<TaskInstance>, RepositoryError>> + Send;
}
