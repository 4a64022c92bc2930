//! Observability for Flowgate: tracing subscriber setup and the span
//! attribute names shared by the CLI.

pub mod tracing_setup;
pub mod workflow_attrs;
