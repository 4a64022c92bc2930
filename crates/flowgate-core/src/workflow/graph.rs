//! Compiled workflow graph: adjacency indices, compiled edge guards, and
//! reachability analysis.
//!
//! A `CompiledWorkflow` is built once per definition (validation included)
//! and is immutable afterwards, so it can be shared across concurrent
//! transitions behind an `Arc`.

use std::collections::{HashMap, HashSet};

use flowgate_types::workflow::{EdgeDefinition, NodeDefinition, WorkflowDefinition};
use petgraph::graph::DiGraph;
use petgraph::visit::Dfs;

use super::condition::{Condition, compile_optional};
use super::definition::{WorkflowError, validate_definition};

// ---------------------------------------------------------------------------
// Reachability
// ---------------------------------------------------------------------------

/// Node IDs that cannot be reached from the start node, in definition order.
///
/// Builds a `DiGraph` over the nodes and runs a depth-first search from
/// `start`. Returns an empty list when there is no single start node, since
/// that is reported separately. Edges with unknown endpoints are ignored.
pub fn unreachable_nodes(def: &WorkflowDefinition) -> Vec<String> {
    let Some(start) = def.start_node() else {
        return vec![];
    };

    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, _> = def
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();

    for edge in &def.edges {
        if let (Some(&from), Some(&to)) = (
            indices.get(edge.source.as_str()),
            indices.get(edge.target.as_str()),
        ) {
            graph.add_edge(from, to, ());
        }
    }

    let mut reached = HashSet::new();
    let mut dfs = Dfs::new(&graph, indices[start.id.as_str()]);
    while let Some(idx) = dfs.next(&graph) {
        reached.insert(graph[idx]);
    }

    def.nodes
        .iter()
        .filter(|n| !reached.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Compiled workflow
// ---------------------------------------------------------------------------

/// An outgoing edge paired with its compiled guard.
#[derive(Debug, Clone, Copy)]
pub struct CompiledEdge<'a> {
    pub edge: &'a EdgeDefinition,
    pub condition: &'a Condition,
}

/// A validated definition with per-node adjacency and compiled conditions.
#[derive(Debug)]
pub struct CompiledWorkflow {
    definition: WorkflowDefinition,
    /// One compiled guard per edge, aligned with `definition.edges`.
    conditions: Vec<Condition>,
    node_index: HashMap<String, usize>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

impl CompiledWorkflow {
    /// Validate and compile a definition.
    pub fn compile(definition: WorkflowDefinition) -> Result<Self, WorkflowError> {
        validate_definition(&definition)?;

        let conditions = definition
            .edges
            .iter()
            .map(|e| compile_optional(e.condition.as_ref()))
            .collect();

        let node_index = definition
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in definition.edges.iter().enumerate() {
            outgoing.entry(edge.source.clone()).or_default().push(i);
            incoming.entry(edge.target.clone()).or_default().push(i);
        }

        Ok(Self {
            definition,
            conditions,
            node_index,
            outgoing,
            incoming,
        })
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn service_key(&self) -> &str {
        &self.definition.service_key
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.node_index.get(id).map(|&i| &self.definition.nodes[i])
    }

    pub fn start_node(&self) -> Option<&NodeDefinition> {
        self.definition.start_node()
    }

    /// Outgoing edges of `node_id` in definition order.
    pub fn outgoing(&self, node_id: &str) -> Vec<CompiledEdge<'_>> {
        self.outgoing
            .get(node_id)
            .map(|idxs| {
                idxs.iter()
                    .map(|&i| CompiledEdge {
                        edge: &self.definition.edges[i],
                        condition: &self.conditions[i],
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Distinct source node IDs of edges arriving at `node_id`.
    pub fn predecessors(&self, node_id: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.incoming
            .get(node_id)
            .map(|idxs| {
                idxs.iter()
                    .map(|&i| self.definition.edges[i].source.as_str())
                    .filter(|source| seen.insert(*source))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
