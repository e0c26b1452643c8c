//! support-desk - Support ticket lifecycle manager
//!
//! Entry point for the CLI. Parses arguments, sets up logging and
//! dispatches to the command handlers.

use anyhow::Context;
use clap::Parser;
use std::process;
use support_desk::cli::{Cli, Commands, OutputFormatter, handlers};
use support_desk::config::Config;
use support_desk::error::DeskError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let formatter = OutputFormatter::new(cli.json, cli.no_color);
    init_logging(cli.verbose);

    if let Err(e) = run(cli, &formatter).await {
        handle_error(&e, &formatter);
        process::exit(1);
    }
}

/// Log to stderr; stdout carries command output and the event stream
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, formatter: &OutputFormatter) -> anyhow::Result<()> {
    let config = load_config(&cli).context("failed to load configuration")?;

    match cli.command {
        Commands::Serve => handlers::handle_serve_command(&config, formatter).await?,
        Commands::Status => handlers::handle_status_command(&config, formatter)?,
        Commands::Log { limit } => handlers::handle_log_command(&config, limit, formatter)?,
    }
    Ok(())
}

fn load_config(cli: &Cli) -> support_desk::Result<Config> {
    match &cli.data_dir {
        Some(data_dir) => Config::load_for_data_dir(data_dir, cli.config.as_deref()),
        None => Config::load(cli.config.as_deref()),
    }
}

/// Print an error for the user, as JSON too when requested
fn handle_error(error: &anyhow::Error, formatter: &OutputFormatter) {
    let message = error
        .chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ");
    formatter.error(&message);

    if formatter.is_json() {
        let kind = error.downcast_ref::<DeskError>().map(|e| match e {
            DeskError::Validation(_) => "validation",
            DeskError::Permission(_) => "permission",
            DeskError::StateConflict(_) => "state_conflict",
            DeskError::Platform(_) => "platform",
            DeskError::Protocol(_) => "protocol",
            DeskError::Storage(_) => "storage",
            DeskError::Config(_) => "config",
        });
        let _ = formatter.print_json(&serde_json::json!({
            "status": "error",
            "error": message,
            "error_type": kind,
        }));
    }

    if tracing::enabled!(tracing::Level::DEBUG) {
        eprintln!("\nDebug information:");
        eprintln!("{error:?}");
    }
}
