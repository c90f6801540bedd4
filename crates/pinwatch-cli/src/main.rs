//! pinwatch - federation TLS pin monitor

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    pinwatch_cli::run().await
}
