//! Directory subcommands: users, delegations, and SLA policies.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use console::style;
use uuid::Uuid;

use flowgate_types::directory::{Delegation, DirectoryUser};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum DirectoryCommand {
    /// Add or replace a user.
    UserAdd {
        /// User ID.
        id: String,

        /// Display name (defaults to the ID).
        #[arg(long)]
        name: Option<String>,

        /// Manager's user ID.
        #[arg(long)]
        manager: Option<String>,

        /// Role the user holds (repeatable).
        #[arg(long = "role")]
        roles: Vec<String>,
    },

    /// Show a user with manager and roles.
    UserShow {
        /// User ID.
        id: String,
    },

    /// Let another user act for someone for a while.
    Delegate {
        /// User delegating their work.
        from: String,

        /// User receiving it.
        to: String,

        /// Length of the delegation in days.
        #[arg(long, conflicts_with = "until", default_value_t = 7)]
        days: i64,

        /// End of the delegation (RFC 3339).
        #[arg(long)]
        until: Option<String>,
    },

    /// Set the SLA for one step of a service.
    Sla {
        /// Service key.
        service: String,

        /// Step key.
        step: String,

        /// Minutes allowed before the task is due.
        minutes: u32,
    },
}

pub async fn handle_directory_command(
    cmd: DirectoryCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        DirectoryCommand::UserAdd {
            id,
            name,
            manager,
            roles,
        } => {
            let user = DirectoryUser {
                display_name: name.unwrap_or_else(|| id.clone()),
                id,
                manager_id: manager,
                roles,
            };
            state.directory.upsert_user(&user).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&user)?);
            } else {
                println!();
                println!(
                    "  {} Saved user '{}'",
                    style("*").green().bold(),
                    style(&user.id).cyan()
                );
                println!();
            }
        }

        DirectoryCommand::UserShow { id } => {
            let user = state
                .directory
                .get_user(&id)
                .await?
                .with_context(|| format!("User '{id}' not found"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&user)?);
            } else {
                println!();
                println!("  User:    {} ({})", style(&user.id).cyan().bold(), user.display_name);
                println!("  Manager: {}", user.manager_id.as_deref().unwrap_or("-"));
                let roles = if user.roles.is_empty() {
                    "-".to_string()
                } else {
                    user.roles.join(", ")
                };
                println!("  Roles:   {roles}");
                println!();
            }
        }

        DirectoryCommand::Delegate {
            from,
            to,
            days,
            until,
        } => {
            let starts_at = Utc::now();
            let ends_at = delegation_end(starts_at, days, until.as_deref())?;
            let delegation = Delegation {
                id: Uuid::now_v7(),
                from_user: from,
                to_user: to,
                starts_at,
                ends_at,
                active: true,
            };
            state.directory.add_delegation(&delegation).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&delegation)?);
            } else {
                println!();
                println!(
                    "  {} '{}' acts for '{}' until {}",
                    style("*").green().bold(),
                    style(&delegation.to_user).cyan(),
                    style(&delegation.from_user).cyan(),
                    delegation.ends_at.format("%Y-%m-%d %H:%M")
                );
                println!();
            }
        }

        DirectoryCommand::Sla {
            service,
            step,
            minutes,
        } => {
            state.sla.set_policy(&service, &step, minutes).await?;
            if json {
                let out = serde_json::json!({
                    "service_key": service,
                    "step_key": step,
                    "duration_minutes": minutes,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!();
                println!(
                    "  {} SLA for {}/{} set to {} minutes",
                    style("*").green().bold(),
                    service,
                    step,
                    minutes
                );
                println!();
            }
        }
    }
    Ok(())
}

fn delegation_end(
    starts_at: DateTime<Utc>,
    days: i64,
    until: Option<&str>,
) -> Result<DateTime<Utc>> {
    match until {
        Some(raw) => Ok(DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid --until timestamp: {raw}"))?
            .with_timezone(&Utc)),
        None => {
            anyhow::ensure!(days > 0, "--days must be positive");
            Ok(starts_at + Duration::days(days))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegation_end_from_days() {
        let now = Utc::now();
        assert_eq!(delegation_end(now, 3, None).unwrap(), now + Duration::days(3));
        assert!(delegation_end(now, 0, None).is_err());
    }

    #[test]
    fn test_delegation_end_from_timestamp() {
        let now = Utc::now();
        let end = delegation_end(now, 7, Some("2030-01-01T00:00:00+02:00")).unwrap();
        assert_eq!(end.to_rfc3339(), "2029-12-31T22:00:00+00:00");
        assert!(delegation_end(now, 7, Some("tomorrow")).is_err());
    }
}
