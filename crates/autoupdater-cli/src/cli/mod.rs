use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod list;
pub mod serve;
pub mod status;
pub mod update;

#[derive(Parser)]
#[command(name = "autoupdater", version, about = "Container-deployment auto-updater")]
pub struct Cli {
    /// Path to autoupdater.toml
    #[arg(short, long, default_value = "autoupdater.toml")]
    pub config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the reconciliation loop and Control API server
    Serve,

    /// List configured packages and their current/available versions
    List,

    /// Show the upgrade status for one package
    Status {
        /// Package name
        name: String,
    },

    /// Trigger an update for one package and wait for it to finish
    Update {
        /// Package name
        name: String,
        /// Explicit target version instead of the latest tag
        #[arg(long)]
        version: Option<String>,
    },

    /// Trigger an update for every configured package
    UpdateAll,
}
