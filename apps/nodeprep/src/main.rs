//! # nodeprep - Node State Preparation
//!
//! Prepares a blockchain node's on-disk state before the node starts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 apps/nodeprep (THE BINARY)               │
//! │                                                          │
//! │  ┌─────────────┐   ┌──────────────┐   ┌───────────────┐  │
//! │  │    CLI      │   │  Descriptor  │   │   Container   │  │
//! │  │   (clap)    │   │   (toml)     │   │   runtime     │  │
//! │  └──────┬──────┘   └──────┬───────┘   └───────┬───────┘  │
//! │         └─────────────────┼───────────────────┘          │
//! │                           ▼                              │
//! │                  ┌─────────────────┐                     │
//! │                  │  nodeprep-core  │                     │
//! │                  │  (THE LOGIC)    │                     │
//! │                  └─────────────────┘                     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Generate state once (no-op afterwards)
//! nodeprep init
//!
//! # Rewrite config lines
//! nodeprep patch --set 'moniker="node-1"'
//!
//! # Both, as run before every node start
//! nodeprep prepare --timeout 600
//! ```

use clap::Parser;
use nodeprep::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Initialize tracing — NODEPREP_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("NODEPREP_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "nodeprep=debug,nodeprep_core=debug"
    } else {
        "nodeprep=info,nodeprep_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr; stdout carries command output (and JSON in --json-mode).
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
