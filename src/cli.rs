//! CLI definitions for Tickwork.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tickwork CLI.
#[derive(Parser)]
#[command(name = "tickwork")]
#[command(about = "Recurring job scheduler")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler in the foreground until Ctrl-C (default)
    Run,

    /// Job management commands
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Check a cron expression and print its next fire times
    Validate {
        /// Cron expression (5 fields, or 6-7 with seconds)
        expression: String,

        /// Number of fire times to print
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum JobAction {
    /// Create a job
    Add {
        /// Job name
        #[arg(long)]
        name: String,

        /// Cron expression
        #[arg(long)]
        schedule: String,

        /// Task type (e.g. log, shell)
        #[arg(long = "type")]
        task_type: String,

        /// Task data as JSON
        #[arg(long)]
        data: Option<String>,

        /// Retries after a failed attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// List jobs
    List {
        /// Filter by tag
        #[arg(long)]
        tag: Option<String>,

        /// Filter by status
        #[arg(long)]
        status: Option<String>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show one job as JSON
    Show {
        /// Job ID
        id: String,
    },

    /// Change a job's definition. Omitted fields keep their values.
    Update {
        /// Job ID
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        schedule: Option<String>,

        #[arg(long = "type")]
        task_type: Option<String>,

        /// Task data as JSON
        #[arg(long)]
        data: Option<String>,

        #[arg(long)]
        max_retries: Option<u32>,

        /// Replace tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Delete a job
    Delete {
        /// Job ID
        id: String,
    },

    /// Pause a scheduled job
    Pause {
        /// Job ID
        id: String,
    },

    /// Resume a paused job
    Resume {
        /// Job ID
        id: String,
    },

    /// Make a job due now
    Trigger {
        /// Job ID
        id: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Load and validate the configuration file
    Check,
}
