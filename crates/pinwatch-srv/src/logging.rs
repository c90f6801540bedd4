//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;
use crate::{Result, SrvError};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "pinwatch=info";

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` overrides `default_directive` when set.
pub fn init_logging(format: LogFormat, default_directive: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| SrvError::Logging(format!("invalid log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .json(),
            )
            .try_init(),
    };
    installed.map_err(|e| SrvError::Logging(e.to_string()))
}
