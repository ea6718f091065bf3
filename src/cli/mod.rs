//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for list commands.
#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    #[default]
    Table,
    /// JSON (same as --json)
    Json,
}

pub mod commands;

/// taskdoc - tasks mirrored to checkbox documents
#[derive(Parser, Debug)]
#[command(name = "td", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.taskdoc/data/taskdoc.db)
    #[arg(long, global = true, env = "TD_DB")]
    pub db: Option<PathBuf>,

    /// Actor name for audit trail
    #[arg(long, global = true, env = "TD_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Output format (table, json)
    #[arg(long, value_enum, global = true, default_value_t)]
    pub format: OutputFormat,

    /// Output only the ID (for scripting)
    #[arg(long, global = true)]
    pub silent: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database
    Init {
        /// Overwrite existing database
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,

    /// Category management
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },

    /// Task management
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Mirror categories to a folder of markdown documents
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Subcommand, Debug)]
pub enum CategoryCommands {
    /// Create a category
    Add {
        /// Name (also the document heading)
        name: String,

        /// Hex color (#rrggbb)
        #[arg(short, long)]
        color: Option<String>,
    },

    /// List categories
    List {
        /// Include archived categories
        #[arg(long)]
        all: bool,
    },

    /// Archive a category (its document is no longer written)
    Archive {
        /// Name, matched ignoring case
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    Add(TaskAddArgs),

    /// Show tasks as a tree per category
    List {
        /// Only this category
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Mark a task completed
    Done {
        /// Task ID
        id: String,
    },

    /// Mark a task open again
    Reopen {
        /// Task ID
        id: String,
    },

    /// Delete a task (its subtasks move to the top level)
    Delete {
        /// Task ID
        id: String,
    },

    /// Update a task
    Update(TaskUpdateArgs),

    /// Show the audit trail of a task
    History {
        /// Task ID
        id: String,

        /// Maximum number of events
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Args, Debug)]
pub struct TaskAddArgs {
    /// Title
    pub title: String,

    /// Category name
    #[arg(short, long)]
    pub category: String,

    /// Parent task ID
    #[arg(short, long)]
    pub parent: Option<String>,

    /// Description
    #[arg(short, long)]
    pub description: Option<String>,
}

#[derive(Args, Debug)]
pub struct TaskUpdateArgs {
    /// Task ID
    pub id: String,

    /// New title
    #[arg(long)]
    pub title: Option<String>,

    /// New description (empty string clears it)
    #[arg(short, long)]
    pub description: Option<String>,

    /// New status (open, completed, or a synonym such as done/todo)
    #[arg(short, long)]
    pub status: Option<String>,

    /// Move under this parent task
    #[arg(short, long, conflicts_with = "root")]
    pub parent: Option<String>,

    /// Move to the top level
    #[arg(long)]
    pub root: bool,
}

#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Connect a folder and export every category to it
    Connect {
        /// Folder to mirror into
        dir: PathBuf,
    },

    /// Forget the connected folder
    Disconnect,

    /// Show the connected folder and its documents
    Status,

    /// Write changed documents to the connected folder
    Export,

    /// Import edits made in the connected folder
    Pull,

    /// Keep the folder in sync until interrupted
    Watch,
}
