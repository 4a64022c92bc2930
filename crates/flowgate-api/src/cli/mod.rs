//! CLI command definitions for the `flowgate` binary.
//!
//! Uses clap derive macros for argument parsing. Commands follow a
//! noun-verb pattern (e.g., `flowgate request start`, `flowgate definition list`).

pub mod definition;
pub mod directory;
pub mod request;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use flowgate_types::request::WorkflowAction;

/// Run approval workflows for service requests.
#[derive(Parser)]
#[command(name = "flowgate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate a workflow definition file.
    Validate {
        /// Path to a YAML or JSON definition.
        file: PathBuf,
    },

    /// Dry-run one transition of a definition file without touching the database.
    Simulate {
        /// Path to a YAML or JSON definition.
        file: PathBuf,

        /// Step the action is taken on.
        #[arg(long)]
        step: String,

        /// Action to take: approve, reject, or complete.
        #[arg(long, default_value = "approve")]
        action: WorkflowAction,

        /// Form data as a JSON object.
        #[arg(long)]
        data: Option<String>,

        /// Steps to treat as already completed (comma-separated).
        #[arg(long, value_delimiter = ',')]
        completed: Vec<String>,
    },

    /// Manage registered workflow definitions.
    #[command(alias = "def")]
    Definition {
        #[command(subcommand)]
        action: definition::DefinitionCommand,
    },

    /// Start and drive requests.
    #[command(alias = "req")]
    Request {
        #[command(subcommand)]
        action: request::RequestCommand,
    },

    /// List the pending tasks a user can act on.
    Inbox {
        /// User ID.
        user: String,
    },

    /// Maintain users, delegations, and SLA policies.
    #[command(alias = "dir")]
    Directory {
        #[command(subcommand)]
        action: directory::DirectoryCommand,
    },

    /// Show data directory, engine limits, and registered services.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

impl Commands {
    /// Short name used for the command's tracing span.
    pub fn span_name(&self) -> &'static str {
        match self {
            Commands::Validate { .. } => "validate",
            Commands::Simulate { .. } => "simulate",
            Commands::Definition { .. } => "definition",
            Commands::Request { .. } => "request",
            Commands::Inbox { .. } => "inbox",
            Commands::Directory { .. } => "directory",
            Commands::Status => "status",
            Commands::Completions { .. } => "completions",
        }
    }
}

/// Parse a `--data` argument as JSON.
pub fn parse_json_arg(raw: Option<&str>) -> anyhow::Result<Option<serde_json::Value>> {
    raw.map(|s| {
        serde_json::from_str(s).map_err(|e| anyhow::anyhow!("Invalid JSON for --data: {e}"))
    })
    .transpose()
}
