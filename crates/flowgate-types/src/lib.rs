//! Shared domain types for Flowgate.
//!
//! This crate contains the types passed between the workflow engine, its
//! storage adapters, and the CLI: workflow definitions, request/step/task
//! rows, transition results, directory data, configuration, and errors.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod directory;
pub mod error;
pub mod request;
pub mod workflow;
