//! Workflow definition repository trait definition.

use flowgate_types::error::RepositoryError;
use flowgate_types::workflow::WorkflowDefinition;

/// Repository trait for registered workflow definitions, keyed by service.
///
/// Saving a definition replaces the one registered for its service key.
/// Requests already in flight keep the snapshot they started with.
pub trait DefinitionRepository: Send + Sync {
    /// Load the definition registered for a service.
    fn load_definition(
        &self,
        service_key: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// Upsert a definition by its service key.
    fn save_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List every registered definition, ordered by service key.
    fn list_definitions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;
}
