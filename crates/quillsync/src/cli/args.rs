//! Command-line argument structures and enums

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quillsync")]
#[command(version)]
#[command(about = "Replay collaborative editing sessions against an in-memory realtime store")]
#[command(long_about = None)]
pub struct Cli {
    /// Sync configuration file (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a scenario script and print the timeline
    Simulate {
        /// Path to the scenario script (TOML)
        script: PathBuf,

        /// Print the raw store contents after the last step
        #[arg(long)]
        dump: bool,
    },

    /// Print the effective sync configuration
    Config,
}
