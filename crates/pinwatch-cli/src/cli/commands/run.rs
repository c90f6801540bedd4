//! `pinwatch run` - Run the monitor until interrupted.

use anyhow::{Context as _, Result};
use pinwatch_srv::{Monitor, MonitorConfig};
use tracing::{info, warn};

use super::Context;
use crate::cli::args::RunArgs;

pub async fn execute(ctx: Context, args: RunArgs) -> Result<()> {
    let (config, ignored) = MonitorConfig::load(args.config.as_deref())
        .context("loading configuration")?;
    ctx.init_logging(config.log_format)?;
    for message in &ignored {
        warn!("{message}");
    }

    let monitor = if args.dry_run {
        Monitor::start_dry_run(&config).await
    } else {
        Monitor::start(&config).await
    }
    .context("starting monitor")?;

    for base_uri in &args.recheck {
        match monitor.request_recheck(base_uri) {
            Ok(0) => warn!(base_uri = %base_uri, "no server in metadata at this address"),
            Ok(queued) => info!(base_uri = %base_uri, queued, "recheck queued"),
            Err(e) => warn!(base_uri = %base_uri, error = %e, "recheck not queued"),
        }
    }

    shutdown_signal().await?;
    info!("received shutdown signal, waiting for running checks");

    monitor.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("waiting for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")
}
