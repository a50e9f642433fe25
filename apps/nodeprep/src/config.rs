//! # Project Descriptor
//!
//! Loads `nodeprep.toml`, the file describing which node image to
//! initialize and which config lines to rewrite.
//!
//! ```toml
//! [project]
//! name = "demo"
//! image = "demo:latest"
//! binary = "demod"
//! state_dir = "state"            # optional, relative to the project root
//!
//! [runtime]
//! program = "docker"             # optional
//! container_home = "/root/.demod" # optional, defaults to /root/.<binary>
//! init_timeout_secs = 600        # optional
//!
//! [patch]
//! file = "config/config.toml"    # optional, relative to the state dir
//!
//! [patch.set]
//! moniker = "\"node-1\""
//! ```
//!
//! Values under `[patch.set]` are inserted verbatim after `key = `, so quote
//! them the way the target file expects.

use nodeprep_core::{NodeprepError, Project, RuleSet};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default descriptor file name.
pub const DEFAULT_CONFIG_FILE: &str = "nodeprep.toml";

/// Container runtime used when `[runtime].program` is not set.
pub const DEFAULT_RUNTIME_PROGRAM: &str = "docker";

/// Config file patched when `[patch].file` is not set, relative to the state dir.
pub const DEFAULT_PATCH_FILE: &str = "config/config.toml";

// =============================================================================
// DESCRIPTOR SECTIONS
// =============================================================================

/// Parsed `nodeprep.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub project: ProjectSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub patch: PatchSection,
}

/// `[project]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    pub name: String,
    pub image: String,
    pub binary: String,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// `[runtime]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSection {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub container_home: Option<String>,
    #[serde(default)]
    pub init_timeout_secs: Option<u64>,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            container_home: None,
            init_timeout_secs: None,
        }
    }
}

fn default_program() -> String {
    DEFAULT_RUNTIME_PROGRAM.to_string()
}

/// `[patch]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchSection {
    #[serde(default = "default_patch_file")]
    pub file: PathBuf,
    #[serde(default)]
    pub set: RuleSet,
}

impl Default for PatchSection {
    fn default() -> Self {
        Self {
            file: default_patch_file(),
            set: RuleSet::new(),
        }
    }
}

fn default_patch_file() -> PathBuf {
    PathBuf::from(DEFAULT_PATCH_FILE)
}

// =============================================================================
// LOADING
// =============================================================================

impl ProjectConfig {
    /// Parse a descriptor from TOML text.
    ///
    /// Rules under `[patch.set]` are validated here, so an empty key is an
    /// `InvalidRule` error rather than a rule matching every line.
    pub fn from_toml_str(text: &str) -> Result<Self, NodeprepError> {
        let config: Self =
            toml::from_str(text).map_err(|e| NodeprepError::Config(e.to_string()))?;
        config.patch.set.validate()?;
        Ok(config)
    }

    /// Read and parse the descriptor at `path`.
    pub fn load(path: &Path) -> Result<Self, NodeprepError> {
        Self::load_optional(path)?.ok_or_else(|| {
            NodeprepError::Config(format!("Descriptor {:?} not found", path))
        })
    }

    /// Like [`ProjectConfig::load`], but a missing file is `Ok(None)`.
    pub fn load_optional(path: &Path) -> Result<Option<Self>, NodeprepError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(NodeprepError::Config(format!(
                    "Cannot read {:?}: {}",
                    path, e
                )));
            }
        };

        Self::from_toml_str(&text)
            .map(Some)
            .map_err(|e| NodeprepError::Config(format!("{:?}: {}", path, e)))
    }

    /// Build the core project descriptor rooted at `root`.
    pub fn project(&self, root: &Path) -> Project {
        let project = Project::new(
            &self.project.name,
            root,
            &self.project.binary,
            &self.project.image,
        );
        match &self.project.state_dir {
            Some(dir) => project.with_state_dir(dir),
            None => project,
        }
    }

    /// Where the state directory is mounted inside the container.
    pub fn container_home(&self) -> String {
        self.runtime
            .container_home
            .clone()
            .unwrap_or_else(|| format!("/root/.{}", self.project.binary))
    }

    /// Overall deadline for the bootstrap, if configured.
    pub fn init_timeout(&self) -> Option<Duration> {
        self.runtime.init_timeout_secs.map(Duration::from_secs)
    }

    /// Path of the node config file the patch rules apply to.
    pub fn config_file(&self, project: &Project) -> PathBuf {
        project.state_dir().join(&self.patch.file)
    }
}

/// Project root for a descriptor path: its parent directory, made absolute.
pub fn default_root(config_path: &Path) -> Result<PathBuf, NodeprepError> {
    let parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok(std::path::absolute(parent)?)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[project]
name = "demo"
image = "demo:latest"
binary = "demod"
"#;

    #[test]
    fn minimal_descriptor_uses_defaults() {
        let config = ProjectConfig::from_toml_str(MINIMAL).expect("parse");

        assert_eq!(config.runtime.program, "docker");
        assert_eq!(config.container_home(), "/root/.demod");
        assert_eq!(config.init_timeout(), None);
        assert!(config.patch.set.is_empty());

        let project = config.project(Path::new("/srv/demo"));
        assert_eq!(project.state_dir(), PathBuf::from("/srv/demo/state"));
        assert_eq!(
            config.config_file(&project),
            PathBuf::from("/srv/demo/state/config/config.toml")
        );
    }

    #[test]
    fn full_descriptor_overrides_defaults() {
        let text = r#"
[project]
name = "demo"
image = "demo:1.2"
binary = "demod"
state_dir = "data/node"

[runtime]
program = "podman"
container_home = "/home/node/.demo"
init_timeout_secs = 90

[patch]
file = "config/app.toml"

[patch.set]
moniker = '"node-1"'
minimum-gas-prices = '"0.025stake"'
"#;
        let config = ProjectConfig::from_toml_str(text).expect("parse");

        assert_eq!(config.runtime.program, "podman");
        assert_eq!(config.container_home(), "/home/node/.demo");
        assert_eq!(config.init_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.patch.set.get("moniker"), Some("\"node-1\""));
        assert_eq!(config.patch.set.len(), 2);

        let project = config.project(Path::new("/srv/demo"));
        assert_eq!(
            config.config_file(&project),
            PathBuf::from("/srv/demo/data/node/config/app.toml")
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = format!("{MINIMAL}\n[runtime]\nengine = \"docker\"\n");
        assert!(matches!(
            ProjectConfig::from_toml_str(&text),
            Err(NodeprepError::Config(_))
        ));
    }

    #[test]
    fn empty_patch_key_is_rejected() {
        let text = format!("{MINIMAL}\n[patch.set]\n\"\" = 'x'\n");
        assert!(matches!(
            ProjectConfig::from_toml_str(&text),
            Err(NodeprepError::InvalidRule(_))
        ));
    }

    #[test]
    fn missing_project_section_is_rejected() {
        assert!(ProjectConfig::from_toml_str("[runtime]\nprogram = \"docker\"\n").is_err());
    }

    #[test]
    fn load_optional_treats_missing_file_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG_FILE);

        assert!(ProjectConfig::load_optional(&path).expect("load").is_none());
        assert!(matches!(
            ProjectConfig::load(&path),
            Err(NodeprepError::Config(_))
        ));

        std::fs::write(&path, MINIMAL).expect("write");
        let config = ProjectConfig::load(&path).expect("load");
        assert_eq!(config.project.name, "demo");
    }

    #[test]
    fn default_root_is_descriptor_parent() {
        let root = default_root(Path::new("/srv/demo/nodeprep.toml")).expect("root");
        assert_eq!(root, PathBuf::from("/srv/demo"));

        let root = default_root(Path::new("nodeprep.toml")).expect("root");
        assert!(root.is_absolute());
    }
}
