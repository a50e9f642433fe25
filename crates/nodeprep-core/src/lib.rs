//! # nodeprep-core
//!
//! Node preparation logic for nodeprep - THE LOGIC.
//!
//! Two independent pieces, composed only by the caller:
//! - `bootstrap`: idempotent "initialize or skip" gate over the node's state
//!   directory, with a single moniker retry
//! - `patch`: line-oriented `key = value` rewriting of the generated config
//!
//! ## Architectural Constraints
//!
//! The core:
//! - Never builds a structured view of the config file
//! - Never spawns processes itself; the initializer is supplied by the caller
//! - Has NO async runtime dependency (the binary brings tokio)

// =============================================================================
// MODULES
// =============================================================================

pub mod bootstrap;
pub mod patch;
pub mod state;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    DEFAULT_STATE_DIR, InitAttempt, InitOutcome, NodeState, NodeprepError, Project, RuleSet,
};

// =============================================================================
// RE-EXPORTS: Gate + Patcher
// =============================================================================

pub use bootstrap::{
    BootstrapGate, HostnameSource, INIT_MESSAGE, Initializer, Reporter, SystemHostname,
    TracingReporter,
};
pub use patch::{ASSIGNMENT_SEPARATOR, PatchReport, line_matches, patch_config, patch_text};
pub use state::{BootstrapLock, MAX_TREE_DEPTH, probe_state, render_tree};
