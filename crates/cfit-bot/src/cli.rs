use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "cfit-bot")]
#[command(version, about = "Hands CFIT bug tickets to a coding agent and posts what it finds", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_enum, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Investigate one or more tickets concurrently
    Investigate {
        /// Asana task URLs (or bare task ids)
        #[arg(required = true)]
        task_urls: Vec<String>,
    },

    /// Post output a finished session left on disk
    PostResults {
        task_id: String,
    },

    /// Inspect or remove ticket worktrees
    Worktrees {
        #[command(subcommand)]
        command: WorktreeCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum WorktreeCommands {
    /// List cfit worktrees in the configured repositories
    List,

    /// Remove a ticket's worktrees
    Cleanup {
        task_id: String,
    },
}
