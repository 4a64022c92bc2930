//! Flowgate CLI entry point.
//!
//! Binary name: `flowgate`
//!
//! Parses CLI arguments, sets up tracing, initializes the database and
//! services, then dispatches to the appropriate command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use tracing::Instrument;

use flowgate_observe::tracing_setup::{self, DEFAULT_FILTER, LogFormat};
use flowgate_observe::workflow_attrs;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => DEFAULT_FILTER,
        2 => "info,flowgate=debug",
        _ => "trace",
    };
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    tracing_setup::init_tracing(filter, format, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let span = workflow_attrs::command_span(cli.command.span_name());
    let result = run(cli).instrument(span).await;

    tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let json = cli.json;

    // Commands that never touch the database
    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "flowgate", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Validate { file } => return cli::definition::validate(&file, json),
        Commands::Simulate {
            file,
            step,
            action,
            data,
            completed,
        } => {
            return cli::definition::simulate(&file, &step, action, data.as_deref(), completed, json)
                .await;
        }
        command => {
            // Initialize application state (DB, services)
            let state = AppState::init().await?;
            dispatch(command, &state, json).await
        }
    }
}

async fn dispatch(command: Commands, state: &AppState, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Definition { action } => {
            cli::definition::handle_definition_command(action, state, json).await
        }
        Commands::Request { action } => {
            cli::request::handle_request_command(action, state, json).await
        }
        Commands::Inbox { user } => cli::request::handle_inbox(&user, state, json).await,
        Commands::Directory { action } => {
            cli::directory::handle_directory_command(action, state, json).await
        }
        Commands::Status => cli::status::status(state, json).await,
        Commands::Validate { .. } | Commands::Simulate { .. } | Commands::Completions { .. } => {
            unreachable!("handled before state initialization")
        }
    }
}
