//! # Container Runtime
//!
//! The external initializer: the node daemon's `init` subcommand, run inside
//! its container image with the state directory bind-mounted.
//!
//! Cancellation is a `watch` channel flipped by Ctrl+C; the overall deadline
//! is applied by the caller with [`with_deadline`]. Either way the child is
//! killed (`kill_on_drop`) rather than left running.

use crate::config::ProjectConfig;
use nodeprep_core::{Initializer, NodeprepError, Project};
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;

// =============================================================================
// CANCELLATION
// =============================================================================

/// Trigger side of a [`Cancellation`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side: cloned into everything that must stop on cancel.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

/// Create a linked handle/token pair.
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx })
}

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Never resolves if the handle is dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Run `fut` under an optional deadline.
///
/// On expiry the future is dropped, which kills any child it spawned.
pub async fn with_deadline<T, F>(timeout: Option<Duration>, fut: F) -> Result<T, NodeprepError>
where
    F: Future<Output = Result<T, NodeprepError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| NodeprepError::TimedOut(limit))?,
        None => fut.await,
    }
}

// =============================================================================
// CONTAINER INITIALIZER
// =============================================================================

/// Runs `<program> run --rm -v <state>:<home> <image> <binary> <args...>`.
#[derive(Debug, Clone)]
pub struct ContainerInitializer {
    program: String,
    image: String,
    binary: String,
    state_dir: PathBuf,
    container_home: String,
    cancel: Cancellation,
}

impl ContainerInitializer {
    pub fn new(config: &ProjectConfig, project: &Project, cancel: Cancellation) -> Self {
        Self {
            program: config.runtime.program.clone(),
            image: project.image.clone(),
            binary: project.binary.clone(),
            state_dir: project.state_dir(),
            container_home: config.container_home(),
            cancel,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument list passed to the runtime program.
    pub fn command_args(&self, args: &[String]) -> Vec<String> {
        let mut full = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:{}", self.state_dir.display(), self.container_home),
            self.image.clone(),
            self.binary.clone(),
        ];
        full.extend(args.iter().cloned());
        full
    }
}

impl Initializer for ContainerInitializer {
    async fn run(&self, args: &[String]) -> Result<(), NodeprepError> {
        let joined = args.join(" ");
        if self.cancel.is_cancelled() {
            return Err(NodeprepError::Cancelled);
        }

        let full = self.command_args(args);
        tracing::debug!("Running {} {}", self.program, full.join(" "));

        let mut child = Command::new(&self.program)
            .args(&full)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NodeprepError::InitializerFailed {
                args: joined.clone(),
                reason: format!("failed to spawn {}: {}", self.program, e),
            })?;

        let status = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Could not kill {}: {}", self.program, e);
                }
                return Err(NodeprepError::Cancelled);
            }
            status = child.wait() => status.map_err(|e| NodeprepError::InitializerFailed {
                args: joined.clone(),
                reason: e.to_string(),
            })?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(NodeprepError::InitializerFailed {
                args: joined,
                reason: status.to_string(),
            })
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
