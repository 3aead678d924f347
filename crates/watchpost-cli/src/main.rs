//! Watchpost CLI - inspect and drive the offline operation queue
//!
//! Lists, edits and replays queued camera mutations from the terminal and
//! runs one-off reconciliations for diagnosis.

mod cli;
mod commands {
    pub mod common;
    pub mod completions;
    pub mod config;
    pub mod queue;
    pub mod reconcile;
}
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConfigCommands, QueueCommands};
use crate::commands::common::CliContext;
use crate::commands::completions::run_completions;
use crate::commands::config::{run_config_path, run_config_show};
use crate::commands::queue::{
    run_enqueue, run_flush, run_list, run_remove, run_retry, run_status,
};
use crate::commands::reconcile::run_reconcile;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "watchpost=info"
        .parse()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let context = CliContext::load(cli.config, cli.db_path)?;

    match cli.command {
        Commands::Queue { command } => match command {
            QueueCommands::List { json } => run_list(&context, json).await?,
            QueueCommands::Status { json } => run_status(&context, json).await?,
            QueueCommands::Enqueue {
                kind,
                targets,
                fields,
            } => run_enqueue(&context, kind, &targets, &fields).await?,
            QueueCommands::Flush { json } => run_flush(&context, json).await?,
            QueueCommands::Retry { json } => run_retry(&context, json).await?,
            QueueCommands::Remove { id } => run_remove(&context, &id).await?,
        },
        Commands::Reconcile {
            local,
            incoming,
            timestamp,
        } => run_reconcile(&context, &local, &incoming, timestamp)?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => run_config_show(&context)?,
            ConfigCommands::Path => run_config_path(&context),
        },
        Commands::Completions { .. } => {}
    }

    Ok(())
}
