mod args;
mod commands;
mod state;

use std::io;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::ports::ClockPort;

use args::{Cli, Commands, ConfigCommands};

#[derive(Debug, Clone, Copy)]
pub(crate) struct SystemClock;

impl ClockPort for SystemClock {
    fn now(&self) -> chrono::DateTime<Utc> {
        Utc::now()
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug_requested());

    match cli.command {
        None => commands::fetch::run(cli.fetch).await,
        Some(Commands::Fetch(args)) => commands::fetch::run(args).await,
        Some(Commands::Clean { config }) => commands::clean::run(config),
        Some(Commands::Init { path, force }) => commands::init::run(path, force),
        Some(Commands::Config {
            command: ConfigCommands::Path,
        }) => commands::config::run_path(),
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}
