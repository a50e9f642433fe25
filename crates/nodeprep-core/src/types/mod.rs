//! # Core Type Definitions
//!
//! This module contains all shared types for nodeprep:
//! - Project descriptor (`Project`)
//! - Bootstrap state and outcomes (`NodeState`, `InitAttempt`, `InitOutcome`)
//! - Rewrite rules (`RuleSet`)
//! - Error types (`NodeprepError`)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// PROJECT DESCRIPTOR
// =============================================================================

/// State directory used when the project does not name one, relative to the
/// project root.
pub const DEFAULT_STATE_DIR: &str = "state";

/// Describes the node project being prepared.
///
/// The core only reads `state_dir()`; the remaining fields are carried for
/// initializers that need them to build their invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Human-readable project name.
    pub name: String,
    /// Project root; relative state paths resolve against it.
    pub root: PathBuf,
    /// Node daemon binary inside the container image.
    pub binary: String,
    /// Container image holding the node software.
    pub image: String,
    state_dir: PathBuf,
}

impl Project {
    /// Create a project with the default state directory.
    pub fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        binary: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            binary: binary.into(),
            image: image.into(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }

    /// Override the state directory. Relative paths resolve against `root`.
    #[must_use]
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    /// Resolved state directory path.
    pub fn state_dir(&self) -> PathBuf {
        resolve(&self.root, &self.state_dir)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

// =============================================================================
// BOOTSTRAP STATE
// =============================================================================

/// Whether the node's state directory has been generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Uninitialized,
    Initialized,
}

/// Which initializer invocation produced the state directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitAttempt {
    /// `init` with no extra arguments.
    Default,
    /// `init --moniker <hostname>` after the default attempt failed.
    WithMoniker(String),
}

impl InitAttempt {
    /// Argument list passed to the initializer for this attempt.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Default => vec!["init".to_string()],
            Self::WithMoniker(moniker) => vec![
                "init".to_string(),
                "--moniker".to_string(),
                moniker.clone(),
            ],
        }
    }
}

/// Result of one `ensure_initialized` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitOutcome {
    /// State directory already existed; nothing was run.
    AlreadyInitialized,
    /// The initializer ran and succeeded on the given attempt.
    Initialized(InitAttempt),
}

impl InitOutcome {
    /// True when this call actually ran the initializer.
    #[must_use]
    pub const fn ran_initializer(&self) -> bool {
        matches!(self, Self::Initialized(_))
    }
}

// =============================================================================
// REWRITE RULES
// =============================================================================

/// Set of `key -> value` rewrites applied in one patch pass.
///
/// Keys are unique. Storage is ordered for reproducible output, but the
/// evaluation order is not part of the contract: rule sets where one key is a
/// prefix of another are ambiguous, see [`RuleSet::overlaps`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet(BTreeMap<String, String>);

impl RuleSet {
    /// Create an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a rule, returning the previous value for `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Replacement value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge `other` into `self`; rules in `other` win on equal keys.
    pub fn extend(&mut self, other: RuleSet) {
        self.0.extend(other.0);
    }

    /// Parse a `key=value` assignment as given on the command line.
    ///
    /// Only the first `=` splits; the value may contain further `=` signs.
    ///
    /// # Errors
    ///
    /// Returns `NodeprepError::InvalidRule` when there is no `=` or the key is
    /// empty (an empty key would match every line).
    pub fn parse_assignment(raw: &str) -> Result<(String, String), NodeprepError> {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| NodeprepError::InvalidRule(format!("missing '=' in '{}'", raw)))?;

        if key.is_empty() {
            return Err(NodeprepError::InvalidRule(format!("empty key in '{}'", raw)));
        }

        Ok((key.to_string(), value.to_string()))
    }

    /// Reject rules that cannot be applied safely.
    ///
    /// # Errors
    ///
    /// Returns `NodeprepError::InvalidRule` for an empty key, which would
    /// match every line.
    pub fn validate(&self) -> Result<(), NodeprepError> {
        if let Some(value) = self.0.get("") {
            return Err(NodeprepError::InvalidRule(format!(
                "empty key with value '{}'",
                value
            )));
        }
        Ok(())
    }

    /// Pairs `(shorter, longer)` where `shorter` is a prefix of `longer`.
    ///
    /// Both keys of such a pair can match the same line, and which one wins
    /// is unspecified. Callers should treat a non-empty result as a mistake.
    pub fn overlaps(&self) -> Vec<(String, String)> {
        let keys: Vec<&String> = self.0.keys().collect();
        let mut pairs = Vec::new();

        for (i, short) in keys.iter().enumerate() {
            for long in &keys[i + 1..] {
                if long.starts_with(short.as_str()) {
                    pairs.push(((*short).clone(), (*long).clone()));
                }
            }
        }

        pairs
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RuleSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while preparing a node.
///
/// - I/O errors are carried unchanged so callers can inspect `kind()`
/// - Use `Result<T, NodeprepError>` for fallible operations
#[derive(Debug, Error)]
pub enum NodeprepError {
    /// A file-system operation failed (state probe, config read or write).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The local hostname could not be resolved for the moniker retry.
    #[error("Cannot resolve hostname: {0}")]
    Hostname(#[source] std::io::Error),

    /// The external initializer exited unsuccessfully or could not start.
    #[error("Initializer `{args}` failed: {reason}")]
    InitializerFailed { args: String, reason: String },

    /// The caller cancelled the bootstrap while the initializer was running.
    #[error("Initialization cancelled")]
    Cancelled,

    /// The caller's deadline elapsed before initialization finished.
    #[error("Initialization timed out after {0:?}")]
    TimedOut(Duration),

    /// Another bootstrap holds the lock for this state directory.
    #[error("State directory is locked by another bootstrap: {0}")]
    Locked(PathBuf),

    /// A rewrite rule could not be parsed.
    #[error("Invalid rewrite rule: {0}")]
    InvalidRule(String),

    /// The project descriptor is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),
}

// =============================================================================
// TESTS
// =============================================================================
