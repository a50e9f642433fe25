//! # nodeprep CLI Module
//!
//! This module implements the CLI interface for nodeprep.
//!
//! ## Available Commands
//!
//! - `init` - Generate node state unless it already exists
//! - `patch` - Rewrite `key = value` lines in the node config
//! - `prepare` - `init` followed by `patch`
//! - `status` - Show state and configured rules
//! - `tree` - List the state directory

mod commands;

use clap::{Args, Parser, Subcommand};
use nodeprep_core::NodeprepError;
use std::path::PathBuf;

use crate::config::{DEFAULT_CONFIG_FILE, ProjectConfig, default_root};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// nodeprep - prepare blockchain node state before start
///
/// Generates node state once through the node's own `init` command, then
/// rewrites selected lines of the generated config.
#[derive(Parser, Debug)]
#[command(name = "nodeprep")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress directory tree output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the project descriptor
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Project root (defaults to the descriptor's directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Options shared by commands that bootstrap.
#[derive(Args, Debug, Clone, Default)]
pub struct InitArgs {
    /// Give up after this many seconds (overrides init_timeout_secs)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Do not take the <state_dir>.lock file
    #[arg(long)]
    pub no_lock: bool,
}

/// Options shared by commands that patch.
#[derive(Args, Debug, Clone, Default)]
pub struct PatchArgs {
    /// Extra rule KEY=VALUE (repeatable, overrides [patch.set])
    #[arg(short, long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Config file to patch instead of the one under the state directory
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate node state unless it already exists
    Init {
        #[command(flatten)]
        init: InitArgs,
    },

    /// Rewrite `key = value` lines in the node config
    Patch {
        #[command(flatten)]
        patch: PatchArgs,
    },

    /// Run init, then patch
    Prepare {
        #[command(flatten)]
        init: InitArgs,

        #[command(flatten)]
        patch: PatchArgs,
    },

    /// Show state directory status and configured rules
    Status,

    /// List the state directory
    Tree,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), NodeprepError> {
    let output = Output {
        json_mode: cli.json_mode,
        quiet: cli.quiet || cli.json_mode,
    };

    // `patch --file` works without a descriptor; everything else needs one.
    if let Some(Commands::Patch { patch }) = &cli.command {
        if let Some(file) = &patch.file {
            let config = ProjectConfig::load_optional(&cli.config)?;
            let base = config.map(|c| c.patch.set).unwrap_or_default();
            return cmd_patch(file, base, &patch.set, output).map(|_| ());
        }
    }

    let root = match &cli.root {
        Some(root) => std::path::absolute(root)?,
        None => default_root(&cli.config)?,
    };
    let ctx = ProjectContext::load(&cli.config, &root)?;

    match cli.command {
        Some(Commands::Init { init }) => cmd_init(&ctx, &init, output).await.map(|_| ()),
        Some(Commands::Patch { patch }) => {
            cmd_patch(&ctx.config_file(), ctx.config.patch.set.clone(), &patch.set, output)
                .map(|_| ())
        }
        Some(Commands::Prepare { init, patch }) => cmd_prepare(&ctx, &init, &patch, output).await,
        Some(Commands::Tree) => cmd_tree(&ctx, output),
        Some(Commands::Status) | None => cmd_status(&ctx, output),
    }
}
