//! Command implementations.

pub mod check;
pub mod run;
pub mod status;

use pinwatch_srv::logging::{init_logging, DEFAULT_DIRECTIVE};
use pinwatch_srv::LogFormat;

use crate::output::OutputFormat;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output format
    pub output_format: OutputFormat,

    /// Verbose logging
    pub verbose: bool,
}

impl Context {
    /// Install the log subscriber in `format`.
    pub fn init_logging(&self, format: LogFormat) -> anyhow::Result<()> {
        let directive = if self.verbose {
            "pinwatch=debug"
        } else {
            DEFAULT_DIRECTIVE
        };
        init_logging(format, directive)?;
        Ok(())
    }
}
