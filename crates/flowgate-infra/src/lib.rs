//! Infrastructure layer for Flowgate.
//!
//! Contains implementations of the repository traits defined in
//! `flowgate-core`: SQLite storage for definitions, requests, the
//! organization directory, and SLA policies, plus the `config.toml` loader.

pub mod config;
pub mod sqlite;
