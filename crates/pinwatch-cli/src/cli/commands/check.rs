//! `pinwatch check` - Probe one server and print the verdict.

use anyhow::{Context as _, Result};
use colored::Colorize;
use pinwatch_core::{CheckResult, Pin, Server, TrustChecker};
use pinwatch_probe::TlsTrustChecker;
use pinwatch_srv::LogFormat;
use std::time::Duration;

use super::Context;
use crate::cli::args::CheckArgs;
use crate::output::OutputFormat;

pub async fn execute(ctx: Context, args: CheckArgs) -> Result<()> {
    ctx.init_logging(LogFormat::Text)?;

    let pins = parse_pins(&args.pins)?;
    let server = Server::new(args.base_uri, pins);
    let checker = TlsTrustChecker::new(Duration::from_secs(args.timeout.max(1)));
    let result = checker.check(&args.entity, &server).await;

    match ctx.output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Pretty => print_result_pretty(&result),
    }
    Ok(())
}

fn parse_pins(raw: &[String]) -> Result<Vec<Pin>> {
    raw.iter()
        .map(|pin| pin.parse::<Pin>().with_context(|| format!("parsing --pin {pin}")))
        .collect()
}

fn print_result_pretty(result: &CheckResult) {
    let verdict = if result.healthy {
        "healthy".green().bold()
    } else {
        "unhealthy".red().bold()
    };
    println!("{} {}", result.key.base_uri.cyan().bold(), verdict);
    println!();
    println!("  {} {}", "Entity:".bold(), result.key.entity_id);
    println!("  {} {}", "Checked:".bold(), result.checked_at.to_rfc3339());

    if let Some(reason) = result.reason {
        println!("  {} {}", "Reason:".bold(), reason.to_string().yellow());
    }
    if let Some(detail) = &result.detail {
        println!("  {} {}", "Detail:".bold(), detail);
    }
    if let Some(cert) = &result.certificate {
        println!();
        println!("  {}", "Certificate".bold().underline());
        println!(
            "    {} {}",
            "Common name:".bold(),
            cert.common_name.as_deref().unwrap_or("-")
        );
        println!("    {} {}", "Expires:".bold(), cert.not_after.to_rfc3339());
        println!("    {} sha256:{}", "Fingerprint:".bold(), cert.fingerprint);
    }
}
