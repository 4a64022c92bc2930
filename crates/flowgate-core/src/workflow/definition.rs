//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML/JSON files and `WorkflowDefinition`, validates the
//! structural invariants every executable graph must hold (one start, at
//! least one end, resolvable edges, everything reachable from start), and
//! discovers definition files on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use flowgate_types::error::RepositoryError;
use flowgate_types::request::RequestStatus;
use flowgate_types::workflow::{NodeKind, WorkflowDefinition};
use thiserror::Error;
use uuid::Uuid;

use super::graph::unreachable_nodes;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or executing a workflow.
///
/// Every variant aborts the transition it came from; nothing is committed.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// No workflow is registered for the service.
    #[error("no workflow definition for service '{0}'")]
    DefinitionNotFound(String),

    /// The current step key is not a node of the definition.
    #[error("step '{0}' is not part of the workflow")]
    InvalidStep(String),

    /// The step exists but the request has no open work on it.
    #[error("step '{0}' is not open on this request")]
    StepNotOpen(String),

    /// `approve` found no eligible edge on a non-end node.
    #[error("no eligible transition from step '{step}'")]
    NoTransition { step: String },

    /// A role token could not be turned into an owner.
    #[error("cannot resolve assignee '{token}': {reason}")]
    AssigneeResolution { token: String, reason: String },

    /// Sub-workflow nesting depth exceeded.
    #[error("sub-workflow depth {depth} exceeds maximum {max}")]
    SubWorkflowDepthExceeded { depth: u32, max: u32 },

    /// Sub-workflows reference each other in a loop.
    #[error("sub-workflow cycle: {0}")]
    SubWorkflowCycle(String),

    /// The request does not exist.
    #[error("request {0} not found")]
    RequestNotFound(Uuid),

    /// The request already reached a terminal status.
    #[error("request {id} is already {status}")]
    RequestClosed { id: Uuid, status: RequestStatus },

    /// Storage failure, including optimistic-lock conflicts.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
///
/// Runs `validate_definition` after deserialization, so the returned value
/// is guaranteed to be structurally valid. JSON is valid YAML, so JSON
/// exports from the visual editor load through here too.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Service key is non-empty and contains only alphanumerics, hyphens, underscores
/// - Node IDs are non-empty and unique; edge IDs are unique
/// - Exactly one `start` node and at least one `end` node
/// - Every edge source/target names an existing node
/// - Sub-workflow nodes name a service
/// - Every node other than `start` is reachable from `start`
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.service_key.is_empty() {
        return Err(WorkflowError::ValidationError(
            "service key must not be empty".to_string(),
        ));
    }
    if !def
        .service_key
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(WorkflowError::ValidationError(format!(
            "service key '{}' contains invalid characters (only alphanumeric, hyphens and underscores allowed)",
            def.service_key
        )));
    }

    let mut node_ids = HashSet::new();
    for node in &def.nodes {
        if node.id.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "node ID must not be empty".to_string(),
            ));
        }
        if !node_ids.insert(node.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate node ID: '{}'",
                node.id
            )));
        }
    }

    let starts = def
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Start)
        .count();
    if starts != 1 {
        return Err(WorkflowError::ValidationError(format!(
            "workflow must have exactly one start node, found {starts}"
        )));
    }
    if !def.nodes.iter().any(|n| n.kind == NodeKind::End) {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one end node".to_string(),
        ));
    }

    let mut edge_ids = HashSet::new();
    for edge in &def.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate edge ID: '{}'",
                edge.id
            )));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint.as_str()) {
                return Err(WorkflowError::ValidationError(format!(
                    "edge '{}' references unknown node '{}'",
                    edge.id, endpoint
                )));
            }
        }
    }

    for node in &def.nodes {
        if let NodeKind::Subworkflow { service_key } = &node.kind {
            if service_key.trim().is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "subworkflow node '{}' does not name a service",
                    node.id
                )));
            }
        }
    }

    let unreachable = unreachable_nodes(def);
    if !unreachable.is_empty() {
        return Err(WorkflowError::ValidationError(format!(
            "nodes not reachable from start: {}",
            unreachable.join(", ")
        )));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML or JSON file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Discover all workflow definition files under `base_dir`.
///
/// Scans for `.yaml`, `.yml`, and `.json` files recursively. Files that fail
/// to parse are skipped with a warning.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" || ext == "json" {
                match load_workflow_file(&path) {
                    Ok(def) => results.push((path, def)),
                    Err(e) => {
                        tracing::warn!(?path, error = %e, "skipping unparseable workflow file");
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
