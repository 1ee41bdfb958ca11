//! CLI command definitions for the `flowline` binary.
//!
//! `serve` runs a worker node; every other command is a one-shot operation
//! against the instance store.

pub mod instance;
pub mod node;
pub mod stats;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use flowline_types::instance::WorkflowInstanceStatus;

/// Durable workflow engine node and administration tool.
#[derive(Parser)]
#[command(name = "flowline", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine configuration file.
    #[arg(long, global = true, env = "FLOWLINE_CONFIG", default_value = "flowline.toml")]
    pub config: PathBuf,

    /// Database URL, overriding the configuration file.
    #[arg(long, global = true, env = "FLOWLINE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a worker node until Ctrl+C or SIGTERM.
    Serve {
        /// Executor group to claim instances for.
        #[arg(long)]
        group: Option<String>,

        /// Number of concurrently executing instances.
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Submit a new workflow instance.
    Create {
        /// Workflow type.
        workflow_type: String,

        /// Business key for lookups.
        #[arg(long)]
        business_key: Option<String>,

        /// External id (defaults to a generated UUID).
        #[arg(long)]
        external_id: Option<String>,

        /// Start state (defaults to the definition's initial state).
        #[arg(long)]
        state: Option<String>,

        /// Initial state variable as KEY=VALUE (repeatable).
        #[arg(long = "var", value_parser = parse_key_value)]
        variables: Vec<(String, String)>,

        /// First activation in seconds from now.
        #[arg(long, conflicts_with = "sleep")]
        delay: Option<u64>,

        /// Create without activation; the instance waits for `wakeup`.
        #[arg(long)]
        sleep: bool,

        /// Executor group (defaults to the configured group).
        #[arg(long)]
        group: Option<String>,
    },

    /// Show one instance with its variables.
    Show {
        /// Instance id.
        id: i64,

        /// Include the action history.
        #[arg(long)]
        actions: bool,
    },

    /// Change an instance that is not currently executing.
    Update {
        /// Instance id.
        id: i64,

        /// Move to this state (resets retries).
        #[arg(long)]
        state: Option<String>,

        /// Set the status (created, inProgress, manual, finished, stopped).
        #[arg(long)]
        status: Option<WorkflowInstanceStatus>,

        /// Reason recorded on the instance and in its history.
        #[arg(long)]
        text: Option<String>,

        /// Schedule for immediate processing.
        #[arg(long, conflicts_with = "sleep")]
        activate: bool,

        /// Clear the activation time.
        #[arg(long)]
        sleep: bool,
    },

    /// Make a sleeping instance runnable now.
    Wakeup {
        /// Instance id.
        id: i64,

        /// Only wake if the instance is in one of these states (repeatable).
        #[arg(long = "state")]
        states: Vec<String>,
    },

    /// List instances, newest first.
    #[command(alias = "ls")]
    List {
        /// Filter by workflow type (repeatable).
        #[arg(long = "type")]
        types: Vec<String>,

        /// Filter by state (repeatable).
        #[arg(long = "state")]
        states: Vec<String>,

        /// Filter by status (repeatable).
        #[arg(long = "status")]
        statuses: Vec<WorkflowInstanceStatus>,

        /// Filter by business key.
        #[arg(long)]
        business_key: Option<String>,

        /// Maximum number of rows.
        #[arg(long, default_value = "100")]
        limit: u32,
    },

    /// Per-state execution statistics for a workflow type.
    Stats {
        /// Workflow type.
        workflow_type: String,

        /// Only instances created at or after this RFC3339 time.
        #[arg(long)]
        created_after: Option<DateTime<Utc>>,

        /// Only instances created at or before this RFC3339 time.
        #[arg(long)]
        created_before: Option<DateTime<Utc>>,

        /// Only instances modified at or after this RFC3339 time.
        #[arg(long)]
        modified_after: Option<DateTime<Utc>>,

        /// Only instances modified at or before this RFC3339 time.
        #[arg(long)]
        modified_before: Option<DateTime<Utc>>,
    },

    /// List registered executors and their liveness.
    Executors {
        /// Restrict to one executor group.
        #[arg(long)]
        group: Option<String>,
    },

    /// List the workflow definitions this binary registers.
    Definitions,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
