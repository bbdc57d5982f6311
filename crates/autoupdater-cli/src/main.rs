mod cli;
mod config;
mod output;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .without_time()
        .init();

    match cli.command {
        Command::Serve => {
            let config = config::AutoupdaterConfig::load(&cli.config)?;
            cli::serve::run(config).await?;
        }
        Command::List => {
            let config = config::AutoupdaterConfig::load(&cli.config)?;
            cli::list::run(config).await?;
        }
        Command::Status { name } => {
            let config = config::AutoupdaterConfig::load(&cli.config)?;
            cli::status::run(config, &name).await?;
        }
        Command::Update { name, version } => {
            let config = config::AutoupdaterConfig::load(&cli.config)?;
            cli::update::run(config, &name, version.as_deref()).await?;
        }
        Command::UpdateAll => {
            let config = config::AutoupdaterConfig::load(&cli.config)?;
            cli::update::run_all(config).await?;
        }
    }

    Ok(())
}
