//! Definition subcommands: validate, simulate, register, list, show.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use flowgate_core::repository::request::StepRepository;
use flowgate_core::workflow::definition::{WorkflowError, discover_workflows, load_workflow_file};
use flowgate_core::workflow::engine::TransitionEngine;
use flowgate_core::workflow::graph::CompiledWorkflow;
use flowgate_types::error::RepositoryError;
use flowgate_types::request::{StepInstance, TaskInstance, WorkflowAction};
use flowgate_types::workflow::WorkflowDefinition;
use uuid::Uuid;

use super::parse_json_arg;
use crate::state::AppState;

/// Definition management subcommands.
#[derive(Subcommand)]
pub enum DefinitionCommand {
    /// Register a definition file, or every definition under a directory.
    Register {
        /// YAML/JSON file or directory.
        path: PathBuf,
    },

    /// List registered definitions.
    List,

    /// Show one registered definition.
    Show {
        /// Service key.
        service_key: String,
    },
}

pub async fn handle_definition_command(
    cmd: DefinitionCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        DefinitionCommand::Register { path } => handle_register(&path, state, json).await,
        DefinitionCommand::List => handle_list(state, json).await,
        DefinitionCommand::Show { service_key } => handle_show(&service_key, state, json).await,
    }
}

fn load_file(file: &Path) -> Result<WorkflowDefinition> {
    load_workflow_file(file).map_err(|e| match e {
        WorkflowError::ParseError(msg) => anyhow::anyhow!("Failed to parse workflow: {msg}"),
        WorkflowError::ValidationError(msg) => anyhow::anyhow!("Workflow validation failed: {msg}"),
        other => anyhow::anyhow!("Failed to load {}: {other}", file.display()),
    })
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn validate(file: &Path, json: bool) -> Result<()> {
    let def = load_file(file)?;
    let compiled = CompiledWorkflow::compile(def)?;
    let def = compiled.definition();

    if json {
        let out = serde_json::json!({
            "valid": true,
            "service_key": def.service_key,
            "version": def.version,
            "nodes": def.nodes.len(),
            "edges": def.edges.len(),
            "subworkflows": def.subworkflow_keys(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} '{}' v{} is valid",
            style("✓").green().bold(),
            style(&def.service_key).cyan(),
            def.version
        );
        println!("  Nodes: {}", def.nodes.len());
        println!("  Edges: {}", def.edges.len());
        let subs = def.subworkflow_keys();
        if !subs.is_empty() {
            println!("  Hands off to: {}", subs.join(", "));
        }
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Simulate
// ---------------------------------------------------------------------------

/// Step history for a dry run: only the given steps count as completed.
struct SimulatedHistory {
    completed: HashSet<String>,
}

impl StepRepository for SimulatedHistory {
    async fn list_completed_steps(
        &self,
        _request_id: &Uuid,
        step_keys: &[String],
    ) -> Result<HashSet<String>, RepositoryError> {
        Ok(step_keys
            .iter()
            .filter(|k| self.completed.contains(*k))
            .cloned()
            .collect())
    }

    async fn list_active_steps(&self, _request_id: &Uuid) -> Result<Vec<StepInstance>, RepositoryError> {
        Ok(vec![])
    }

    async fn list_pending_tasks(&self, _request_id: &Uuid) -> Result<Vec<TaskInstance>, RepositoryError> {
        Ok(vec![])
    }
}

pub async fn simulate(
    file: &Path,
    step: &str,
    action: WorkflowAction,
    data: Option<&str>,
    completed: Vec<String>,
    json: bool,
) -> Result<()> {
    let workflow = CompiledWorkflow::compile(load_file(file)?)?;
    let data = parse_json_arg(data)?.unwrap_or_else(|| serde_json::json!({}));
    let history = SimulatedHistory {
        completed: completed.into_iter().collect(),
    };

    let result = TransitionEngine::new(&history)
        .compute_transition(&Uuid::nil(), &workflow, step, action, &data)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} on '{}'",
        style("→").cyan().bold(),
        action,
        style(step).cyan()
    );
    println!("  Completes: {}", result.steps_to_complete.join(", "));
    if result.active_steps_to_create.is_empty() {
        println!("  Opens:     {}", style("nothing").dim());
    } else {
        for opened in &result.active_steps_to_create {
            let role = opened.role.as_deref().unwrap_or("-");
            println!(
                "  Opens:     {} ({}, role {})",
                style(&opened.step_key).green(),
                opened.kind.as_str(),
                role
            );
            if let Some(child) = opened.subworkflow_key() {
                println!("             hands off to service '{child}'");
            }
        }
    }
    println!("  Status:    {}", result.next_status);
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Register
// ---------------------------------------------------------------------------

async fn handle_register(path: &Path, state: &AppState, json: bool) -> Result<()> {
    let defs: Vec<WorkflowDefinition> = if path.is_dir() {
        discover_workflows(path)
            .with_context(|| format!("Failed to scan {}", path.display()))?
            .into_iter()
            .map(|(_, def)| def)
            .collect()
    } else {
        vec![load_file(path)?]
    };

    // Children must be registered before the parents that call them, so keep
    // retrying deferred definitions while each pass makes progress.
    let mut pending = defs;
    let mut registered: Vec<String> = Vec::new();
    loop {
        let before = pending.len();
        let mut deferred = Vec::new();
        let mut last_error = None;
        for def in pending {
            match state.definition_service.register(&def).await {
                Ok(()) => registered.push(def.service_key.clone()),
                Err(WorkflowError::DefinitionNotFound(missing)) => {
                    tracing::debug!(service = %def.service_key, %missing, "deferring registration");
                    last_error = Some(WorkflowError::DefinitionNotFound(missing));
                    deferred.push(def);
                }
                Err(e) => return Err(e.into()),
            }
        }
        if deferred.is_empty() {
            break;
        }
        if deferred.len() == before {
            if let Some(e) = last_error {
                return Err(e.into());
            }
        }
        pending = deferred;
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "registered": registered }))?
        );
    } else {
        println!();
        for key in &registered {
            println!("  {} Registered '{}'", style("*").green().bold(), style(key).cyan());
        }
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// List / show
// ---------------------------------------------------------------------------

async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let defs = state.definition_service.list().await?;

    if json {
        let out: Vec<_> = defs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "service_key": d.service_key,
                    "name": d.name,
                    "version": d.version,
                    "nodes": d.nodes.len(),
                    "edges": d.edges.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows registered.");
        println!(
            "  Register one with: {}",
            style("flowgate definition register <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Service").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Version"),
            Cell::new("Nodes"),
            Cell::new("Edges"),
        ]);

    for d in &defs {
        table.add_row(vec![
            Cell::new(&d.service_key),
            Cell::new(d.name.as_deref().unwrap_or("-")),
            Cell::new(d.version),
            Cell::new(d.nodes.len()),
            Cell::new(d.edges.len()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(service_key: &str, state: &AppState, json: bool) -> Result<()> {
    let def = state.definition_service.get(service_key).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&def)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} v{}{}",
        style(&def.service_key).cyan().bold(),
        def.version,
        def.name
            .as_deref()
            .map(|n| format!(" -- {n}"))
            .unwrap_or_default()
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Role"),
            Cell::new("SLA (min)"),
            Cell::new("Next"),
        ]);
    for node in &def.nodes {
        let next: Vec<String> = def
            .outgoing_edges(&node.id)
            .map(|e| match (&e.label, &e.condition) {
                (Some(label), _) if e.is_reject() => format!("{} [{label}]", e.target),
                (_, Some(_)) => format!("{} [guarded]", e.target),
                _ => e.target.clone(),
            })
            .collect();
        table.add_row(vec![
            Cell::new(&node.id),
            Cell::new(node.kind.as_str()),
            Cell::new(node.data.role.as_deref().unwrap_or("-")),
            Cell::new(
                node.data
                    .sla_minutes
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(next.join(", ")),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}
