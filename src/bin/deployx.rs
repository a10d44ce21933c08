// src/bin/deployx.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use deployx::cli::{Cli, handlers};

/// The main entry point of the `deployx` application.
/// It sets up logging, parses arguments, dispatches to the correct handler,
/// and performs centralized error handling.
fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        // `{:#}` prints the failing site followed by the underlying cause.
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);
    if cli.list {
        return handlers::list::handle(cli.json);
    }
    handlers::run::handle(&cli)
}
