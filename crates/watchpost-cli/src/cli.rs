use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use watchpost_core::OperationKind;

#[derive(Parser)]
#[command(name = "watchpost")]
#[command(about = "Inspect and drive the Watchpost offline operation queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Optional path to the local queue database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or replay queued operations
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Reconcile an incoming camera update against a local record
    Reconcile {
        /// JSON file holding the local camera record
        #[arg(long, value_name = "PATH")]
        local: PathBuf,
        /// JSON file holding the incoming partial update
        #[arg(long, value_name = "PATH")]
        incoming: PathBuf,
        /// Source timestamp of the update (unix ms)
        #[arg(long, value_name = "MS")]
        timestamp: Option<i64>,
    },
    /// Show resolved configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued operations
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show pending/failed counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue a mutation for later replay
    Enqueue {
        /// Operation type (entity-update, toggle-flag, status-change, bulk-settings-update)
        kind: OperationKind,
        /// Target camera id; repeat for bulk updates
        #[arg(long = "target", value_name = "ID", required = true)]
        targets: Vec<String>,
        /// Field to apply, as NAME=VALUE (VALUE is parsed as JSON when possible)
        #[arg(long = "field", value_name = "NAME=VALUE")]
        fields: Vec<String>,
    },
    /// Replay due operations now
    Flush {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset failed operations to pending and replay them
    Retry {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop an operation regardless of its status
    #[command(alias = "rm")]
    Remove {
        /// Operation ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration (token omitted)
    Show,
    /// Print the config file path in use
    Path,
}
