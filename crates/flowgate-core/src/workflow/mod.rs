//! Workflow engine core: definition model, condition evaluation, and the
//! transition machinery that moves requests through a service's graph.
//!
//! - `definition` -- YAML/JSON parsing, validation, filesystem load/save
//! - `graph` -- compiled adjacency, edge guards, reachability
//! - `condition` -- edge guard compiler and fail-closed evaluator
//! - `join` -- join readiness against persisted step rows
//! - `assignee` -- role token and management chain resolution, delegation
//! - `sla` -- step deadlines and escalation times
//! - `engine` -- edge selection and the resulting transition
//! - `subworkflow` -- depth-bounded loading of nested workflows

pub mod assignee;
pub mod condition;
pub mod definition;
pub mod engine;
pub mod graph;
pub mod join;
pub mod sla;
pub mod subworkflow;
