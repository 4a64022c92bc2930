//! System status dashboard command.

use anyhow::Result;
use console::style;

use flowgate_infra::config::DATA_DIR_ENV;
use flowgate_infra::sqlite::pool::database_url;

use crate::state::AppState;

/// Display where data lives, the engine limits in force, and registered services.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let definitions = state.definition_service.list().await?;
    let config = &state.config;
    let sla_overrides: usize = config.sla.values().map(|steps| steps.len()).sum();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "database": database_url(&state.data_dir),
            "engine": {
                "max_manager_depth": config.max_manager_depth,
                "max_subworkflow_depth": config.max_subworkflow_depth,
                "sla_defaults": sla_overrides,
            },
            "services": definitions.iter().map(|d| &d.service_key).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Flowgate v{}",
        style("*").green().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── Storage ──").dim());
    println!("  Data dir: {}", state.data_dir.display());
    println!("  Database: {}", database_url(&state.data_dir));
    println!(
        "  {}",
        style(format!("(override with {DATA_DIR_ENV})")).dim()
    );
    println!();

    println!("  {}", style("── Engine ──").dim());
    println!("  Manager depth:      {}", config.max_manager_depth);
    println!("  Sub-workflow depth: {}", config.max_subworkflow_depth);
    println!("  SLA defaults:       {sla_overrides}");
    println!();

    println!("  {}", style("── Services ──").dim());
    if definitions.is_empty() {
        println!("  {}", style("none registered").yellow());
    } else {
        for def in &definitions {
            println!("  {} (v{})", style(&def.service_key).cyan(), def.version);
        }
    }
    println!();
    Ok(())
}
