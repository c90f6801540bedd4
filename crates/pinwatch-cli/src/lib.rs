//! # pinwatch-cli
//!
//! Command-line interface for the pinwatch monitor.
//!
//! - `pinwatch run` - run the monitor until interrupted (`--recheck`, `--dry-run`)
//! - `pinwatch check` - probe one server once and print the verdict
//! - `pinwatch status` - print the stored status of every server

pub mod cli;
pub mod output;

pub use cli::run;
