//! Workflow definition types for Flowgate.
//!
//! A `WorkflowDefinition` is the graph one service's requests move through:
//! typed nodes joined by optionally guarded edges. Definitions are authored
//! outside this crate (YAML files, a visual editor) and are read-only once a
//! request has snapshotted them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Edge label / condition text that marks a rejection path.
pub const REJECT_LABEL: &str = "reject";

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The workflow graph for a single service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Service key the definition is registered under (e.g. "purchase-order").
    pub service_key: String,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Monotonic definition version. Requests pin the version they started on.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Ordered node list. Order is preserved for display only.
    pub nodes: Vec<NodeDefinition>,
    /// Directed edges. Order matters: the first passing edge wins on
    /// non-fork nodes.
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    /// Extensible metadata for integrations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The unique `start` node, if the definition has exactly one.
    pub fn start_node(&self) -> Option<&NodeDefinition> {
        let mut starts = self.nodes.iter().filter(|n| n.kind == NodeKind::Start);
        match (starts.next(), starts.next()) {
            (Some(start), None) => Some(start),
            _ => None,
        }
    }

    /// Edges leaving `node_id`, in definition order.
    pub fn outgoing_edges<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a EdgeDefinition> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Service keys referenced by `subworkflow` nodes.
    pub fn subworkflow_keys(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::Subworkflow { service_key } => Some(service_key.as_str()),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Node id, unique within the definition. Doubles as the step key.
    pub id: String,
    /// The kind of node, flattened so YAML reads `type: approval`.
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Display and routing data.
    #[serde(default)]
    pub data: NodeData,
}

/// The closed set of node kinds.
///
/// Internally tagged by `type`:
/// ```yaml
/// - id: legal
///   type: subworkflow
///   service_key: legal-review
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    End,
    Task,
    Approval,
    Action,
    /// Parallel fork: every passing edge opens a branch.
    ForkAnd,
    /// Inclusive fork: every passing edge opens a branch (conditions pick which).
    ForkOr,
    /// Waits for all incoming branches before becoming eligible.
    Join,
    /// Hands off to another service's workflow.
    Subworkflow { service_key: String },
}

impl NodeKind {
    /// Fork nodes keep every passing edge instead of only the first.
    pub fn is_fork(&self) -> bool {
        matches!(self, NodeKind::ForkAnd | NodeKind::ForkOr)
    }

    /// Short lowercase name used in logs and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::Task => "task",
            NodeKind::Approval => "approval",
            NodeKind::Action => "action",
            NodeKind::ForkAnd => "fork_and",
            NodeKind::ForkOr => "fork_or",
            NodeKind::Join => "join",
            NodeKind::Subworkflow { .. } => "subworkflow",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node data carried alongside the kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Role token: a literal role name or a manager-hierarchy token
    /// (`DIRECT_MANAGER`, `MANAGER_LEVEL_2`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// SLA budget for the step in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_minutes: Option<u32>,
    /// Minutes after step start at which the step escalates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_minutes: Option<u32>,
    /// Count SLA time in business hours only. Declared, not yet applied.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub business_hours_only: bool,
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// A directed, optionally guarded transition between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl EdgeDefinition {
    /// Whether this edge is a rejection path, by label or by its condition text.
    pub fn is_reject(&self) -> bool {
        let labeled = self
            .label
            .as_deref()
            .is_some_and(|l| l.trim().eq_ignore_ascii_case(REJECT_LABEL));
        let conditioned = matches!(
            &self.condition,
            Some(ConditionSpec::Expression(expr)) if expr.trim().eq_ignore_ascii_case(REJECT_LABEL)
        );
        labeled || conditioned
    }
}

/// Edge guard as authored: a string expression or a structured predicate.
///
/// Operators are kept as raw strings so an unknown operator still loads and
/// evaluates to `false` instead of rejecting the whole definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionSpec {
    /// `"amount > 500"`, `"status == 'approved'"`, `"vip"`.
    Expression(String),
    /// `{kind: and|or, conditions: [...]}`.
    Group {
        kind: GroupKind,
        conditions: Vec<ConditionSpec>,
    },
    /// `{field, operator, value}`.
    Simple {
        field: String,
        operator: String,
        #[serde(default)]
        value: serde_json::Value,
    },
}

/// Boolean combinator for grouped conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    And,
    Or,
}
