//! Command-line argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::output::OutputFormat;

/// Monitor federation servers' TLS certificates against published pins.
///
/// Every server listed in the federation metadata is probed periodically;
/// its leaf certificate must be current, match the host name and hash to
/// one of the entity's published sha256 pins.
#[derive(Parser, Debug)]
#[command(name = "pinwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, value_enum)]
    pub output: Option<OutputFormat>,

    /// Increase log verbosity (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the monitor until Ctrl-C or SIGTERM
    Run(RunArgs),

    /// Probe a single server once
    Check(CheckArgs),

    /// Show the stored status of every server
    Status(StatusArgs),
}

// ============================================================================
// Run command
// ============================================================================

#[derive(Args, Debug)]
pub struct RunArgs {
    /// TOML configuration file (PINWATCH_* variables override it)
    #[arg(short, long, env = "PINWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Report every server healthy without contacting it
    #[arg(long)]
    pub dry_run: bool,

    /// Check this base URI first, ignoring its check interval; repeatable
    #[arg(long = "recheck", value_name = "BASE_URI")]
    pub recheck: Vec<String>,
}

// ============================================================================
// Check command
// ============================================================================

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Server base URI (e.g., https://api.example.org/)
    pub base_uri: String,

    /// Entity the server belongs to (only used for labelling)
    #[arg(short, long, default_value = "adhoc")]
    pub entity: String,

    /// Expected pin as alg:digest (e.g., sha256:47DEQpj8...=); repeatable
    #[arg(short, long = "pin")]
    pub pins: Vec<String>,

    /// Connect and handshake timeout in seconds
    #[arg(short, long, default_value = "10")]
    pub timeout: u64,
}

// ============================================================================
// Status command
// ============================================================================

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// TOML configuration file to read database_path from
    #[arg(short, long, env = "PINWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Status database (overrides the configuration)
    #[arg(short, long)]
    pub database: Option<PathBuf>,
}
