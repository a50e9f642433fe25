//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::ProjectConfig;
use crate::runtime::{ContainerInitializer, cancellation, with_deadline};
use nodeprep_core::{
    BootstrapGate, InitAttempt, InitOutcome, NodeState, NodeprepError, PatchReport, Project,
    Reporter, RuleSet, patch_config, probe_state, render_tree,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// SHARED STATE
// =============================================================================

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    /// Print one JSON document instead of text.
    pub json_mode: bool,
    /// Skip the directory tree.
    pub quiet: bool,
}

/// Loaded descriptor plus the project it describes.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub config: ProjectConfig,
    pub project: Project,
}

impl ProjectContext {
    /// Load the descriptor at `config_path` and root the project at `root`.
    pub fn load(config_path: &Path, root: &Path) -> Result<Self, NodeprepError> {
        let config = ProjectConfig::load(config_path)?;
        Ok(Self::new(config, root))
    }

    pub fn new(config: ProjectConfig, root: &Path) -> Self {
        let project = config.project(root);
        Self { config, project }
    }

    /// Node config file targeted by `patch`.
    pub fn config_file(&self) -> PathBuf {
        self.config.config_file(&self.project)
    }
}

/// Prints gate progress to stdout.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleReporter {
    output: Output,
}

impl ConsoleReporter {
    pub fn new(output: Output) -> Self {
        Self { output }
    }
}

impl Reporter for ConsoleReporter {
    fn progress(&self, message: &str) {
        tracing::debug!("{}", message);
        if !self.output.json_mode {
            println!("{}", message);
        }
    }

    fn tree(&self, _root: &Path, rendered: &str) {
        if !self.output.quiet {
            print!("{}", rendered);
        }
    }
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Generate node state unless it exists, honouring Ctrl+C and the deadline.
pub async fn bootstrap(
    ctx: &ProjectContext,
    timeout: Option<u64>,
    lock: bool,
    output: Output,
) -> Result<InitOutcome, NodeprepError> {
    let (handle, cancel) = cancellation();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping initializer");
            handle.cancel();
        }
    });

    let gate = BootstrapGate::new(ContainerInitializer::new(&ctx.config, &ctx.project, cancel))
        .with_reporter(ConsoleReporter::new(output))
        .with_lock(lock);

    let deadline = timeout
        .map(Duration::from_secs)
        .or_else(|| ctx.config.init_timeout());

    let result = with_deadline(deadline, gate.ensure_initialized(&ctx.project)).await;
    // The SIGINT handler stays installed after this; a Ctrl+C during the
    // short patch or print steps that follow is ignored.
    ctrl_c.abort();

    let outcome = result?;
    tracing::info!("Bootstrap of {:?}: {:?}", ctx.project.name, outcome);
    Ok(outcome)
}

/// Run the bootstrap gate.
pub async fn cmd_init(
    ctx: &ProjectContext,
    args: &super::InitArgs,
    output: Output,
) -> Result<InitOutcome, NodeprepError> {
    let outcome = bootstrap(ctx, args.timeout, !args.no_lock, output).await?;

    if output.json_mode {
        print_json(&init_json(&ctx.project, &outcome));
    } else {
        print_outcome(&ctx.project, &outcome);
    }

    Ok(outcome)
}

fn init_json(project: &Project, outcome: &InitOutcome) -> serde_json::Value {
    serde_json::json!({
        "project": project.name,
        "state_dir": project.state_dir().to_string_lossy(),
        "outcome": outcome,
    })
}

fn print_outcome(project: &Project, outcome: &InitOutcome) {
    let state_dir = project.state_dir();
    match outcome {
        InitOutcome::AlreadyInitialized => {
            println!("State directory {:?} already initialized, skipping", state_dir);
        }
        InitOutcome::Initialized(InitAttempt::Default) => {
            println!("Initialized {:?}", state_dir);
        }
        InitOutcome::Initialized(InitAttempt::WithMoniker(moniker)) => {
            println!("Initialized {:?} with moniker {}", state_dir, moniker);
        }
    }
}

// =============================================================================
// PATCH COMMAND
// =============================================================================

/// Merge `--set` assignments over `base` and patch `path`.
///
/// Overlapping keys and keys that matched nothing are reported as warnings;
/// neither is an error.
pub fn apply_patch(
    path: &Path,
    mut rules: RuleSet,
    assignments: &[String],
) -> Result<PatchReport, NodeprepError> {
    for raw in assignments {
        let (key, value) = RuleSet::parse_assignment(raw)?;
        rules.insert(key, value);
    }
    rules.validate()?;

    for (short, long) in rules.overlaps() {
        tracing::warn!(
            "Key '{}' is a prefix of '{}'; which rule applies to a line is unspecified",
            short,
            long
        );
    }

    let report = patch_config(path, &rules)?;

    for key in report.unmatched_keys(&rules) {
        tracing::warn!("No line in {:?} matched key '{}'", path, key);
    }

    Ok(report)
}

/// Patch a config file and print the result.
pub fn cmd_patch(
    path: &Path,
    base: RuleSet,
    assignments: &[String],
    output: Output,
) -> Result<PatchReport, NodeprepError> {
    let report = apply_patch(path, base, assignments)?;

    if output.json_mode {
        print_json(&patch_json(path, &report));
    } else {
        print_report(path, &report);
    }

    Ok(report)
}

fn patch_json(path: &Path, report: &PatchReport) -> serde_json::Value {
    serde_json::json!({
        "file": path.to_string_lossy(),
        "lines": report.lines,
        "replaced": report.replaced,
    })
}

fn print_report(path: &Path, report: &PatchReport) {
    println!(
        "Patched {:?}: {} of {} lines replaced",
        path,
        report.replaced_total(),
        report.lines
    );
    for (key, count) in &report.replaced {
        println!("  {} ({}x)", key, count);
    }
}

// =============================================================================
// PREPARE COMMAND
// =============================================================================

/// Bootstrap, then patch: the usual pre-start sequence.
pub async fn cmd_prepare(
    ctx: &ProjectContext,
    init: &super::InitArgs,
    patch: &super::PatchArgs,
    output: Output,
) -> Result<(), NodeprepError> {
    let outcome = bootstrap(ctx, init.timeout, !init.no_lock, output).await?;

    let target = patch.file.clone().unwrap_or_else(|| ctx.config_file());
    let report = apply_patch(&target, ctx.config.patch.set.clone(), &patch.set)?;

    if output.json_mode {
        let mut doc = init_json(&ctx.project, &outcome);
        doc["patch"] = patch_json(&target, &report);
        print_json(&doc);
    } else {
        print_outcome(&ctx.project, &outcome);
        print_report(&target, &report);
    }

    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show state directory presence and the configured rules.
pub fn cmd_status(ctx: &ProjectContext, output: Output) -> Result<(), NodeprepError> {
    let state_dir = ctx.project.state_dir();
    let state = probe_state(&state_dir)?;
    let config_file = ctx.config_file();
    let rules = &ctx.config.patch.set;
    let overlaps = rules.overlaps();

    if output.json_mode {
        print_json(&serde_json::json!({
            "project": ctx.project.name,
            "image": ctx.project.image,
            "state_dir": state_dir.to_string_lossy(),
            "state": state,
            "config_file": config_file.to_string_lossy(),
            "config_file_exists": config_file.is_file(),
            "rules": rules,
            "overlaps": overlaps,
        }));
        return Ok(());
    }

    println!("nodeprep Status");
    println!("===============");
    println!("Project:     {}", ctx.project.name);
    println!("Image:       {}", ctx.project.image);
    println!("State dir:   {:?}", state_dir);
    println!(
        "State:       {}",
        match state {
            NodeState::Initialized => "initialized",
            NodeState::Uninitialized => "not initialized",
        }
    );
    println!("Config file: {:?}", config_file);
    println!();

    if rules.is_empty() {
        println!("No patch rules configured");
    } else {
        println!("Patch rules:");
        for (key, value) in rules.iter() {
            println!("  {} = {}", key, value);
        }
    }

    for (short, long) in &overlaps {
        println!("Warning: key '{}' is a prefix of '{}'", short, long);
    }

    Ok(())
}

// =============================================================================
// TREE COMMAND
// =============================================================================

/// List the state directory.
pub fn cmd_tree(ctx: &ProjectContext, output: Output) -> Result<(), NodeprepError> {
    let state_dir = ctx.project.state_dir();
    let rendered = match probe_state(&state_dir)? {
        NodeState::Initialized => Some(render_tree(&state_dir)?),
        NodeState::Uninitialized => None,
    };

    if output.json_mode {
        print_json(&serde_json::json!({
            "state_dir": state_dir.to_string_lossy(),
            "tree": rendered,
        }));
        return Ok(());
    }

    match rendered {
        Some(tree) => print!("{}", tree),
        None => println!("State directory {:?} is not initialized", state_dir),
    }

    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}
