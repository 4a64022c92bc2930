//! Sub-workflow resolution: loads every definition a workflow hands off to,
//! transitively, with a depth bound and cycle detection.

use std::collections::HashMap;

use flowgate_types::workflow::WorkflowDefinition;

use super::definition::{WorkflowError, validate_definition};
use crate::repository::definition::DefinitionRepository;

/// Default bound on sub-workflow nesting.
pub const DEFAULT_MAX_SUBWORKFLOW_DEPTH: u32 = 5;

/// Load and validate every definition reachable through `subworkflow` nodes
/// of `root`, in discovery order. `root` itself is not included.
///
/// Depth counts hand-offs: a child of `root` sits at depth 1. A reference
/// back to any service on the current path is a cycle.
pub async fn resolve_subworkflows<D: DefinitionRepository>(
    root: &WorkflowDefinition,
    definitions: &D,
    max_depth: u32,
) -> Result<Vec<WorkflowDefinition>, WorkflowError> {
    let mut loaded: HashMap<String, WorkflowDefinition> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    // (service key, depth, path from root including the key)
    let mut stack: Vec<(String, u32, Vec<String>)> = Vec::new();
    push_children(root, 0, &[root.service_key.clone()], max_depth, &mut stack)?;

    while let Some((key, depth, path)) = stack.pop() {
        if !loaded.contains_key(&key) {
            let def = definitions
                .load_definition(&key)
                .await?
                .ok_or_else(|| WorkflowError::DefinitionNotFound(key.clone()))?;
            validate_definition(&def)?;
            order.push(key.clone());
            loaded.insert(key.clone(), def);
        }
        if let Some(def) = loaded.get(&key) {
            push_children(def, depth, &path, max_depth, &mut stack)?;
        }
    }

    tracing::debug!(
        service = %root.service_key,
        subworkflows = ?order,
        "sub-workflows resolved"
    );

    Ok(order
        .into_iter()
        .filter_map(|key| loaded.remove(&key))
        .collect())
}

/// Queue the sub-workflows `def` calls, first declared on top.
fn push_children(
    def: &WorkflowDefinition,
    depth: u32,
    path: &[String],
    max_depth: u32,
    stack: &mut Vec<(String, u32, Vec<String>)>,
) -> Result<(), WorkflowError> {
    let child_depth = depth + 1;
    for child in def.subworkflow_keys().into_iter().rev() {
        if path.iter().any(|p| p == child) {
            let mut cycle = path.to_vec();
            cycle.push(child.to_string());
            return Err(WorkflowError::SubWorkflowCycle(cycle.join(" -> ")));
        }
        if child_depth > max_depth {
            return Err(WorkflowError::SubWorkflowDepthExceeded {
                depth: child_depth,
                max: max_depth,
            });
        }
        let mut child_path = path.to_vec();
        child_path.push(child.to_string());
        stack.push((child.to_string(), child_depth, child_path));
    }
    Ok(())
}
