//! Definition registration service.

use flowgate_types::workflow::WorkflowDefinition;

use crate::repository::definition::DefinitionRepository;
use crate::workflow::definition::{WorkflowError, validate_definition};
use crate::workflow::subworkflow::resolve_subworkflows;

/// Registers and lists workflow definitions.
pub struct DefinitionService<D: DefinitionRepository> {
    definitions: D,
    max_subworkflow_depth: u32,
}

impl<D: DefinitionRepository> DefinitionService<D> {
    pub fn new(definitions: D, max_subworkflow_depth: u32) -> Self {
        Self {
            definitions,
            max_subworkflow_depth,
        }
    }

    /// Validate `def` and every sub-workflow it reaches, then save it.
    ///
    /// Sub-workflows must already be registered.
    pub async fn register(&self, def: &WorkflowDefinition) -> Result<(), WorkflowError> {
        validate_definition(def)?;
        resolve_subworkflows(def, &self.definitions, self.max_subworkflow_depth).await?;
        self.definitions.save_definition(def).await?;
        tracing::info!(
            service = %def.service_key,
            version = def.version,
            "workflow definition registered"
        );
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<WorkflowDefinition>, WorkflowError> {
        Ok(self.definitions.list_definitions().await?)
    }

    pub async fn get(&self, service_key: &str) -> Result<WorkflowDefinition, WorkflowError> {
        self.definitions
            .load_definition(service_key)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(service_key.to_string()))
    }
}
