//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Infragraph - Declarative infrastructure engine.
#[derive(Parser, Debug)]
#[command(name = "infragraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "INFRAGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Set a variable (`name=value`), may be repeated.
    #[arg(long = "var", global = true, value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Load variables from a YAML or JSON file, may be repeated.
    #[arg(long = "var-file", global = true, value_name = "PATH")]
    pub var_files: Vec<PathBuf>,

    /// Seconds to wait for a held state lock.
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// State directory, overriding the configuration.
    #[arg(long, global = true, env = "INFRAGRAPH_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new project from the network template.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration and build the resource graph.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Compute and display the execution plan.
    Plan {
        /// Save the plan to a file for a later `apply`.
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// Plan the destruction of every recorded resource.
        #[arg(long)]
        destroy: bool,

        /// Skip re-reading recorded resources from the provider.
        #[arg(long)]
        no_refresh: bool,
    },

    /// Apply a saved plan, or plan and apply.
    Apply {
        /// Saved plan file.
        plan: Option<PathBuf>,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Maximum number of concurrent operations.
        #[arg(long)]
        parallelism: Option<usize>,

        /// Skip re-reading recorded resources from the provider.
        #[arg(long)]
        no_refresh: bool,
    },

    /// Destroy every recorded resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Maximum number of concurrent operations.
        #[arg(long)]
        parallelism: Option<usize>,
    },

    /// Show output values computed from state.
    Output {
        /// Output name (shows all outputs if not specified).
        name: Option<String>,
    },

    /// Check for drift between state and remote resources.
    Drift,

    /// Inspect and manage state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// List recorded resources.
    List,

    /// Show one recorded resource.
    Show {
        /// Resource address (`type.name` or `type.name[i]`).
        address: String,
    },

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },

    /// Forget resources without destroying them.
    Rm {
        /// Resource addresses.
        #[arg(required = true)]
        addresses: Vec<String>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
