//! Integration tests for the nodeprep commands.
//!
//! Commands run against temporary project directories. The initializer
//! tests use `true`/`false` as the container runtime, so they only run on
//! Unix.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use nodeprep::cli::{
    Cli, Commands, InitArgs, Output, ProjectContext, apply_patch, cmd_init, cmd_patch,
    cmd_prepare, cmd_status, cmd_tree,
};
use nodeprep::config::ProjectConfig;
use nodeprep_core::{InitOutcome, NodeprepError, RuleSet};
use std::path::Path;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

const NODE_CONFIG: &str = "\
# This is a TOML config file.
proxy_app = \"tcp://127.0.0.1:26658\"
moniker = \"\"
fast_sync = true

[p2p]
  laddr = \"tcp://0.0.0.0:26656\"
seeds = \"\"
";

fn descriptor(program: &str) -> String {
    format!(
        r#"
[project]
name = "demo"
image = "demo:latest"
binary = "demod"

[runtime]
program = "{program}"

[patch.set]
moniker = '"node-1"'
"#
    )
}

fn context(root: &Path, program: &str) -> ProjectContext {
    let config = ProjectConfig::from_toml_str(&descriptor(program)).unwrap();
    ProjectContext::new(config, root)
}

/// Lay out an already-initialized state directory.
fn seed_state(ctx: &ProjectContext) {
    let config_file = ctx.config_file();
    std::fs::create_dir_all(config_file.parent().unwrap()).unwrap();
    std::fs::write(&config_file, NODE_CONFIG).unwrap();
}

fn quiet() -> Output {
    Output {
        json_mode: false,
        quiet: true,
    }
}

#[cfg(unix)]
fn no_lock() -> InitArgs {
    InitArgs {
        timeout: Some(30),
        no_lock: true,
    }
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

#[test]
fn test_parse_prepare_with_rules() {
    let cli = Cli::try_parse_from([
        "nodeprep",
        "--config",
        "/srv/demo/nodeprep.toml",
        "prepare",
        "--timeout",
        "120",
        "--set",
        "moniker=\"a\"",
        "-s",
        "seeds=\"x@y:26656\"",
    ])
    .unwrap();

    match cli.command {
        Some(Commands::Prepare { init, patch }) => {
            assert_eq!(init.timeout, Some(120));
            assert!(!init.no_lock);
            assert_eq!(patch.set, vec!["moniker=\"a\"", "seeds=\"x@y:26656\""]);
            assert!(patch.file.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_parse_defaults_to_status() {
    let cli = Cli::try_parse_from(["nodeprep", "--json-mode"]).unwrap();
    assert!(cli.command.is_none());
    assert!(cli.json_mode);
    assert_eq!(cli.config, Path::new("nodeprep.toml"));
}

// =============================================================================
// PATCH
// =============================================================================

#[test]
fn test_patch_uses_descriptor_rules_and_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "docker");
    seed_state(&ctx);

    let report = cmd_patch(
        &ctx.config_file(),
        ctx.config.patch.set.clone(),
        &["seeds=\"abc@10.0.0.1:26656\"".to_string()],
        quiet(),
    )
    .unwrap();

    assert_eq!(report.replaced_total(), 2);
    let patched = std::fs::read_to_string(ctx.config_file()).unwrap();
    assert_eq!(
        patched,
        NODE_CONFIG
            .replace("moniker = \"\"", "moniker = \"node-1\"")
            .replace("seeds = \"\"", "seeds = \"abc@10.0.0.1:26656\"")
    );
}

#[test]
fn test_patch_leaves_indented_lines_alone() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "docker");
    seed_state(&ctx);

    let report = apply_patch(
        &ctx.config_file(),
        RuleSet::new(),
        &["laddr=\"tcp://0.0.0.0:1\"".to_string()],
    )
    .unwrap();

    assert_eq!(report.replaced_total(), 0);
    assert_eq!(std::fs::read_to_string(ctx.config_file()).unwrap(), NODE_CONFIG);
}

#[test]
fn test_patch_rejects_malformed_assignment() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "docker");
    seed_state(&ctx);

    let err = apply_patch(&ctx.config_file(), RuleSet::new(), &["moniker".to_string()]);
    assert!(matches!(err, Err(NodeprepError::InvalidRule(_))));
    assert_eq!(std::fs::read_to_string(ctx.config_file()).unwrap(), NODE_CONFIG);
}

#[test]
fn test_patch_rejects_empty_key_from_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "docker");
    seed_state(&ctx);

    // Built directly: the descriptor parser already refuses this rule set.
    let base: RuleSet = [("", "x")].into_iter().collect();
    let err = cmd_patch(&ctx.config_file(), base, &[], quiet());
    assert!(matches!(err, Err(NodeprepError::InvalidRule(_))));
    assert_eq!(std::fs::read_to_string(ctx.config_file()).unwrap(), NODE_CONFIG);

    let text = format!("{}\n\"\" = 'x'\n", descriptor("docker"));
    assert!(matches!(
        ProjectConfig::from_toml_str(&text),
        Err(NodeprepError::InvalidRule(_))
    ));
}

#[test]
fn test_patch_missing_config_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "docker");

    let err = apply_patch(&ctx.config_file(), ctx.config.patch.set.clone(), &[]);
    assert!(matches!(err, Err(NodeprepError::Io(_))));
}

// =============================================================================
// STATUS / TREE
// =============================================================================

#[test]
fn test_status_and_tree_before_and_after_init() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "docker");

    cmd_status(&ctx, quiet()).unwrap();
    cmd_tree(&ctx, quiet()).unwrap();

    seed_state(&ctx);
    cmd_status(&ctx, Output { json_mode: true, quiet: true }).unwrap();
    cmd_tree(&ctx, quiet()).unwrap();
}

// =============================================================================
// INIT / PREPARE
// =============================================================================

#[tokio::test]
async fn test_init_skips_existing_state_without_runtime() {
    let dir = tempfile::tempdir().unwrap();
    // The runtime does not exist: any attempt to run it would fail.
    let ctx = context(dir.path(), "definitely-not-a-runtime");
    seed_state(&ctx);

    let outcome = cmd_init(&ctx, &InitArgs::default(), quiet()).await.unwrap();
    assert_eq!(outcome, InitOutcome::AlreadyInitialized);
}

#[cfg(unix)]
#[tokio::test]
async fn test_init_runs_runtime_once_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "true");

    let outcome = cmd_init(&ctx, &no_lock(), quiet()).await.unwrap();
    assert!(outcome.ran_initializer());
}

#[cfg(unix)]
#[tokio::test]
async fn test_init_failure_surfaces_moniker_retry_error() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "false");

    let err = cmd_init(&ctx, &no_lock(), quiet()).await.unwrap_err();
    match err {
        NodeprepError::InitializerFailed { args, .. } => {
            assert!(args.starts_with("init --moniker "));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_prepare_patches_after_skip() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "definitely-not-a-runtime");
    seed_state(&ctx);

    let patch = nodeprep::cli::PatchArgs {
        set: vec!["fast_sync=false".to_string()],
        file: None,
    };
    cmd_prepare(&ctx, &InitArgs::default(), &patch, quiet())
        .await
        .unwrap();

    let patched = std::fs::read_to_string(ctx.config_file()).unwrap();
    assert!(patched.contains("\nmoniker = \"node-1\"\n"));
    assert!(patched.contains("\nfast_sync = false\n"));
    assert!(patched.contains("\n  laddr = \"tcp://0.0.0.0:26656\"\n"));
}
