/// Clap argument definitions
mod args;

/// `config` command handler
mod config;

/// `simulate` command: scenario scripts and their replay
mod simulate;

use clap::Parser;
use std::path::Path;

use quillsync_core::SyncConfig;

pub use args::Cli;
use args::Commands;

/// Main entry point for the CLI
pub fn run_cli() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    };

    let success = match cli.command {
        Commands::Simulate { script, dump } => simulate::handle_simulate(&script, config, dump),
        Commands::Config => config::handle_config(&config),
    };

    if !success {
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> quillsync_core::Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::load_from(path),
        None => Ok(SyncConfig::default()),
    }
}
