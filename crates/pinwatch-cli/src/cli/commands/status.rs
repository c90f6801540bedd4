//! `pinwatch status` - Print the stored status of every server.

use anyhow::{Context as _, Result};
use colored::Colorize;
use pinwatch_core::{HealthState, ServerStatus, StatusSummary};
use pinwatch_srv::{LogFormat, MonitorConfig};
use pinwatch_store::SqliteStore;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};

use super::Context;
use crate::cli::args::StatusArgs;
use crate::output::OutputFormat;

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "Server")]
    base_uri: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Last checked")]
    last_checked: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Cert expires")]
    cert_expires: String,
}

impl From<&ServerStatus> for StatusRow {
    fn from(status: &ServerStatus) -> Self {
        Self {
            entity: status.key.entity_id.clone(),
            base_uri: status.key.base_uri.clone(),
            state: status.health().to_string(),
            last_checked: status
                .last_checked
                .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            reason: status
                .reason
                .map_or_else(|| "-".to_string(), |r| r.to_string()),
            cert_expires: status
                .cert_expires
                .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d").to_string()),
        }
    }
}

pub async fn execute(ctx: Context, args: StatusArgs) -> Result<()> {
    ctx.init_logging(LogFormat::Text)?;

    let database = database_path(&args)?;
    if !database.exists() {
        anyhow::bail!("no status database at {}", database.display());
    }
    let store = SqliteStore::open(&database)
        .with_context(|| format!("opening {}", database.display()))?;

    let statuses = store.all_statuses().await?;
    let summary = store.summary().await?;

    match ctx.output_format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "summary": summary,
                "servers": statuses,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Pretty => print_status_pretty(&statuses, summary),
    }
    Ok(())
}

/// `--database`, else the configured path (file, then environment).
fn database_path(args: &StatusArgs) -> Result<PathBuf> {
    if let Some(database) = &args.database {
        return Ok(database.clone());
    }
    let mut config = match &args.config {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    config.apply_env(|name| std::env::var(name).ok());
    Ok(config.database_path)
}

fn print_status_pretty(statuses: &[ServerStatus], summary: StatusSummary) {
    if statuses.is_empty() {
        println!("No servers recorded yet.");
        return;
    }

    let rows: Vec<StatusRow> = statuses.iter().map(StatusRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!();

    for status in statuses
        .iter()
        .filter(|s| s.health() == HealthState::Unhealthy)
    {
        if let Some(detail) = &status.detail {
            println!("  {} {}", status.key.base_uri.red(), detail);
        }
    }

    println!(
        "{} {}  {} {}  {} {}",
        "healthy:".bold(),
        summary.healthy.to_string().green(),
        "unhealthy:".bold(),
        summary.unhealthy.to_string().red(),
        "unchecked:".bold(),
        summary.unchecked.to_string().yellow(),
    );
}
