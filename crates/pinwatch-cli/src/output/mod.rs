//! Output formatting for different formats.

use clap::ValueEnum;

/// Available output formats.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable tables with colors
    #[default]
    Pretty,
    /// JSON output
    Json,
}
