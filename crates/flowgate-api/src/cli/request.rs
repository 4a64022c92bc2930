//! Request subcommands: start, act, force-complete, show, plus the inbox.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use flowgate_core::service::request::ActionOutcome;
use flowgate_observe::workflow_attrs;
use flowgate_types::request::{RequestStatus, StepStatus, TaskInstance, TaskStatus, WorkflowAction};

use super::parse_json_arg;
use crate::state::AppState;

/// Request lifecycle subcommands.
#[derive(Subcommand)]
pub enum RequestCommand {
    /// Start a request against a registered service.
    Start {
        /// Service key.
        service: String,

        /// Requesting user ID.
        #[arg(long)]
        requester: String,

        /// Form data as a JSON object.
        #[arg(long)]
        data: Option<String>,
    },

    /// Approve, reject, or complete the current step of a request.
    Act {
        /// Request ID.
        id: String,

        /// Action: approve, reject, or complete.
        action: WorkflowAction,

        /// User taking the action.
        #[arg(long)]
        actor: String,

        /// Step to act on (defaults to the request's current step).
        #[arg(long)]
        step: Option<String>,

        /// Form data to merge into the request before routing.
        #[arg(long)]
        data: Option<String>,
    },

    /// Close a request immediately, cancelling open work.
    ForceComplete {
        /// Request ID.
        id: String,

        /// Administrator taking the action.
        #[arg(long)]
        actor: String,
    },

    /// Show a request with its steps, tasks, and history.
    Show {
        /// Request ID.
        id: String,
    },
}

pub async fn handle_request_command(
    cmd: RequestCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let span = tracing::Span::current();
    match cmd {
        RequestCommand::Start {
            service,
            requester,
            data,
        } => {
            let data = parse_json_arg(data.as_deref())?.unwrap_or_else(|| serde_json::json!({}));
            let outcome = state
                .request_service
                .start_request(&service, &requester, data)
                .await?;
            workflow_attrs::record_request(&span, &outcome.request_id, &service, &requester);
            print_outcome("Started", &outcome, json)
        }
        RequestCommand::Act {
            id,
            action,
            actor,
            step,
            data,
        } => {
            let id = parse_request_id(&id)?;
            let data = parse_json_arg(data.as_deref())?;
            let outcome = state
                .request_service
                .submit_action(&id, step.as_deref(), action, &actor, data)
                .await?;
            let request = state.request_service.get_request(&id).await?;
            workflow_attrs::record_request(&span, &id, &request.service_key, &actor);
            print_outcome(&capitalize(&action.to_string()), &outcome, json)
        }
        RequestCommand::ForceComplete { id, actor } => {
            let id = parse_request_id(&id)?;
            let outcome = state.request_service.force_complete(&id, &actor).await?;
            print_outcome("Force-completed", &outcome, json)
        }
        RequestCommand::Show { id } => handle_show(&parse_request_id(&id)?, state, json).await,
    }
}

fn parse_request_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid request ID: {raw}"))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn styled_status(status: RequestStatus) -> String {
    match status {
        RequestStatus::Completed => style(status.as_str()).green().to_string(),
        RequestStatus::Rejected => style(status.as_str()).red().to_string(),
        RequestStatus::AwaitingApproval => style(status.as_str()).yellow().to_string(),
        RequestStatus::InProgress => style(status.as_str()).cyan().to_string(),
    }
}

fn step_status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Active => "active",
        StepStatus::Completed => "completed",
        StepStatus::Cancelled => "cancelled",
    }
}

fn task_status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Completed => "completed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn format_time(at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

fn print_outcome(verb: &str, outcome: &ActionOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} request {}",
        style("*").green().bold(),
        verb,
        style(outcome.request_id).cyan()
    );
    println!("  Status: {}", styled_status(outcome.status));
    if !outcome.passed_through.is_empty() {
        println!("  Passed: {}", outcome.passed_through.join(", "));
    }
    for opened in &outcome.transition.active_steps_to_create {
        println!(
            "  Now at: {} ({})",
            style(&opened.step_key).bold(),
            opened.kind.as_str()
        );
        if let Some(child) = opened.subworkflow_key() {
            println!(
                "          hand off to service '{}' to continue",
                style(child).cyan()
            );
        }
    }
    print_task_table(&outcome.tasks);
    println!();
    Ok(())
}

fn print_task_table(tasks: &[TaskInstance]) {
    if tasks.is_empty() {
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Assignee"),
            Cell::new("Status"),
            Cell::new("Due"),
            Cell::new("Escalates"),
        ]);

    for task in tasks {
        table.add_row(vec![
            Cell::new(&task.step_key),
            Cell::new(&task.assignee),
            Cell::new(task_status_str(task.status)),
            Cell::new(format_time(task.due_at)),
            Cell::new(format_time(task.escalate_at)),
        ]);
    }

    println!();
    println!("{table}");
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

async fn handle_show(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    let details = state.request_service.request_details(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&details)?);
        return Ok(());
    }

    let request = &details.request;
    println!();
    println!("  Request:   {}", style(request.id).cyan().bold());
    println!(
        "  Service:   {} (v{})",
        request.service_key, request.definition.version
    );
    println!("  Requester: {}", request.requester_id);
    println!("  Status:    {}", styled_status(request.status));
    println!("  Created:   {}", format_time(Some(request.created_at)));
    println!("  Updated:   {}", format_time(Some(request.updated_at)));
    println!("  Data:      {}", request.data);

    let mut steps = Table::new();
    steps
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Started"),
            Cell::new("Completed"),
        ]);
    for step in &details.steps {
        steps.add_row(vec![
            Cell::new(&step.step_key),
            Cell::new(step_status_str(step.status)),
            Cell::new(format_time(Some(step.started_at))),
            Cell::new(format_time(step.completed_at)),
        ]);
    }
    println!();
    println!("{steps}");

    print_task_table(&details.tasks);

    if !details.events.is_empty() {
        let mut events = Table::new();
        events
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("When").fg(Color::Cyan),
                Cell::new("Actor"),
                Cell::new("Action"),
                Cell::new("From"),
                Cell::new("To"),
                Cell::new("Status"),
            ]);
        for event in &details.events {
            events.add_row(vec![
                Cell::new(format_time(Some(event.at))),
                Cell::new(&event.actor),
                Cell::new(&event.action),
                Cell::new(event.from_steps.join(", ")),
                Cell::new(event.to_steps.join(", ")),
                Cell::new(event.status),
            ]);
        }
        println!();
        println!("{events}");
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

pub async fn handle_inbox(user: &str, state: &AppState, json: bool) -> Result<()> {
    let tasks = state.request_service.inbox(user).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!();
        println!("  Nothing waiting for {}.", style(user).cyan());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Request").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Assignee"),
            Cell::new("Due"),
        ]);
    for task in &tasks {
        table.add_row(vec![
            Cell::new(task.request_id),
            Cell::new(&task.step_key),
            Cell::new(&task.assignee),
            Cell::new(format_time(task.due_at)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
