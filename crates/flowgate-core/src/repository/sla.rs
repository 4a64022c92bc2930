//! SLA policy repository trait definition.

use flowgate_types::error::RepositoryError;

/// Per-step SLA budgets.
pub trait SlaRepository: Send + Sync {
    /// Minutes allowed for `step_key` of `service_key`, if a policy exists.
    fn get_step_duration_minutes(
        &self,
        service_key: &str,
        step_key: &str,
    ) -> impl std::future::Future<Output = Result<Option<u32>, RepositoryError>> + Send;
}
