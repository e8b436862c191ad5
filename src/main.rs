//! `dfcore` command line entry point
//!
//! Runs against the simulated driver; its parameters come from the
//! `[simulation]` configuration section.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use dfcore::cli::{self, Cli};
use dfcore::config::DfConfig;
use dfcore::driver::sim::SimBackend;
use dfcore::logging;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = DfConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    logging::init(&config.logging, cli.verbose);

    let backend = SimBackend::new(config.simulation.clone());
    let mut stdout = std::io::stdout().lock();
    cli::execute(&cli.command, &config, &backend, &mut stdout)
        .await
        .context("Command failed")?;
    Ok(())
}
