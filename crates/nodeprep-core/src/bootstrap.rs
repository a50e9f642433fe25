//! # Bootstrap Gate
//!
//! Decides whether the external initializer must run and drives it.
//!
//! The gate is a two-state probe (`Uninitialized` -> `Initialized`) followed by
//! a fixed attempt sequence:
//!
//! 1. `init`
//! 2. on failure, `init --moniker <hostname>`
//! 3. on failure, give up
//!
//! Some node daemons refuse to initialize without a moniker and fail with an
//! unhelpful message; the hostname is a usable default. A second failure is
//! not retried.
//!
//! An existing state directory short-circuits everything: no initializer
//! call, no hostname lookup, no output.
//!
//! Once the initializer has succeeded, a failure to render the state tree is
//! only logged. The state exists at that point and the bootstrap succeeds.

use crate::state::{BootstrapLock, probe_state, render_tree};
use crate::types::{InitAttempt, InitOutcome, NodeState, NodeprepError, Project};
use std::future::Future;
use std::io;
use std::path::Path;

/// Progress line announced before the first initializer attempt.
pub const INIT_MESSAGE: &str = "Generating configuration and genesis files";

// =============================================================================
// SEAMS
// =============================================================================

/// Runs the external initializer with an argument list.
///
/// Implementations own cancellation: when the caller's context is cancelled
/// they should stop the external process and return
/// `NodeprepError::Cancelled`.
pub trait Initializer {
    fn run(&self, args: &[String]) -> impl Future<Output = Result<(), NodeprepError>>;
}

/// Source of the local hostname used as the fallback moniker.
pub trait HostnameSource {
    fn hostname(&self) -> io::Result<String>;
}

/// Receives the gate's diagnostic output.
pub trait Reporter {
    /// Human-readable progress message.
    fn progress(&self, message: &str);

    /// Rendered state directory tree after a successful initialization.
    fn tree(&self, root: &Path, rendered: &str);
}

/// Hostname as reported by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostname;

impl HostnameSource for SystemHostname {
    #[cfg(unix)]
    fn hostname(&self) -> io::Result<String> {
        let mut buf = [0u8; 256];
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        let len = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
        non_empty(String::from_utf8_lossy(&buf[..len]).into_owned())
    }

    #[cfg(not(unix))]
    fn hostname(&self) -> io::Result<String> {
        let name = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, e))?;
        non_empty(name)
    }
}

fn non_empty(name: String) -> io::Result<String> {
    if name.is_empty() {
        Err(io::Error::new(io::ErrorKind::NotFound, "hostname is empty"))
    } else {
        Ok(name)
    }
}

/// Reporter that forwards everything to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn progress(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn tree(&self, root: &Path, rendered: &str) {
        tracing::info!("State directory {:?}:\n{}", root, rendered.trim_end());
    }
}

// =============================================================================
// GATE
// =============================================================================

/// Idempotent "initialize or skip" for a project's state directory.
pub struct BootstrapGate<I, H = SystemHostname, R = TracingReporter> {
    initializer: I,
    hostname: H,
    reporter: R,
    lock: bool,
}

impl<I: Initializer> BootstrapGate<I> {
    /// Gate using the system hostname and `tracing` for output, without
    /// the bootstrap lock.
    pub fn new(initializer: I) -> Self {
        Self {
            initializer,
            hostname: SystemHostname,
            reporter: TracingReporter,
            lock: false,
        }
    }
}

impl<I, H, R> BootstrapGate<I, H, R>
where
    I: Initializer,
    H: HostnameSource,
    R: Reporter,
{
    /// Replace the hostname source.
    pub fn with_hostname<H2: HostnameSource>(self, hostname: H2) -> BootstrapGate<I, H2, R> {
        BootstrapGate {
            initializer: self.initializer,
            hostname,
            reporter: self.reporter,
            lock: self.lock,
        }
    }

    /// Replace the reporter.
    pub fn with_reporter<R2: Reporter>(self, reporter: R2) -> BootstrapGate<I, H, R2> {
        BootstrapGate {
            initializer: self.initializer,
            hostname: self.hostname,
            reporter,
            lock: self.lock,
        }
    }

    /// Serialize concurrent bootstraps of the same state directory through a
    /// `<state_dir>.lock` file.
    #[must_use]
    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    pub fn initializer(&self) -> &I {
        &self.initializer
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Make sure the project's state directory exists, running the
    /// initializer if it does not.
    ///
    /// # Errors
    ///
    /// - `Io` when the state probe fails for a reason other than not-found
    /// - `Hostname` when the default attempt failed and no moniker is available
    /// - the initializer's error when the moniker retry fails
    /// - `Cancelled` from the initializer, without a retry
    /// - `Locked` when locking is enabled and another bootstrap is running
    pub async fn ensure_initialized(&self, project: &Project) -> Result<InitOutcome, NodeprepError> {
        let state_dir = project.state_dir();

        if probe_state(&state_dir)? == NodeState::Initialized {
            tracing::debug!("State directory {:?} exists, skipping init", state_dir);
            return Ok(InitOutcome::AlreadyInitialized);
        }

        let _lock = if self.lock {
            let lock = BootstrapLock::acquire(&state_dir)?;
            // A concurrent bootstrap may have finished before we got the lock.
            if probe_state(&state_dir)? == NodeState::Initialized {
                return Ok(InitOutcome::AlreadyInitialized);
            }
            Some(lock)
        } else {
            None
        };

        self.reporter.progress(INIT_MESSAGE);
        let attempt = self.run_attempts().await?;

        match render_tree(&state_dir) {
            Ok(rendered) => self.reporter.tree(&state_dir, &rendered),
            Err(e) => tracing::warn!("Could not list {:?}: {}", state_dir, e),
        }

        Ok(InitOutcome::Initialized(attempt))
    }

    async fn run_attempts(&self) -> Result<InitAttempt, NodeprepError> {
        let first = InitAttempt::Default;
        match self.initializer.run(&first.args()).await {
            Ok(()) => return Ok(first),
            Err(NodeprepError::Cancelled) => return Err(NodeprepError::Cancelled),
            Err(e) => tracing::warn!("Default init failed ({}), retrying with --moniker", e),
        }

        let hostname = self.hostname.hostname().map_err(NodeprepError::Hostname)?;
        let retry = InitAttempt::WithMoniker(hostname);
        self.initializer.run(&retry.args()).await?;

        Ok(retry)
    }
}

// =============================================================================
// TESTS
// =============================================================================
