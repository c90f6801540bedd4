//! CLI argument parsing and command dispatch.

pub mod args;
pub mod commands;

use anyhow::Result;
use args::{Cli, Commands};
use clap::Parser;

/// Run the CLI application.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let ctx = commands::Context {
        output_format: cli.output.unwrap_or_default(),
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Run(args) => commands::run::execute(ctx, args).await,
        Commands::Check(args) => commands::check::execute(ctx, args).await,
        Commands::Status(args) => commands::status::execute(ctx, args).await,
    }
}
