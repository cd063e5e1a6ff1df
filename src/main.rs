mod application;
mod domain;
mod infrastructure;
mod presentation;

use clap::Parser;
use crate::infrastructure::config::Config;
use crate::infrastructure::logging;
use crate::presentation::cli::Cli;

/// Hulaki: HTTP and WebSocket client for the terminal
///
/// One-shot commands for every HTTP verb with pretty-printed responses, and
/// an interactive full-screen WebSocket session that sends what you type and
/// shows what the server pushes back.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let target = logging::target_for(cli.command.is_interactive(), config.logging.file.clone());
    let _log_guard = logging::init(&config.logging.level, cli.verbose, target)?;

    cli.run(&config).await
}
