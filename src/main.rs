mod cli;
mod driver;
mod inject;
mod model;
mod server;
mod storage;
mod transcript;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Cli::parse();
    if let Err(e) = cli::run(args).await {
        // Outermost run boundary: anything unexpected lands here once.
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
