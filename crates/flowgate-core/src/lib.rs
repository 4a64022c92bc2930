//! Business logic and repository trait definitions for Flowgate.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, the workflow engine, and the services that drive
//! requests through it. It depends only on `flowgate-types` -- never on
//! `flowgate-infra` or any database/IO crate.

pub mod repository;
pub mod service;
pub mod workflow;

#[cfg(test)]
mod testing;
