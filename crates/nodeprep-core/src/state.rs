//! # Node State Directory
//!
//! Probing, locking, and rendering the on-disk state directory.
//!
//! Presence of the directory is the only idempotency signal nodeprep uses;
//! nothing inside it is inspected.

use crate::types::{NodeState, NodeprepError};
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Deepest directory level expanded by [`render_tree`].
pub const MAX_TREE_DEPTH: usize = 16;

// =============================================================================
// PROBE
// =============================================================================

/// Determine whether `state_dir` exists.
///
/// # Errors
///
/// Any metadata failure other than `NotFound` (for example a permission
/// error on a parent directory) is returned unchanged.
pub fn probe_state(state_dir: &Path) -> Result<NodeState, NodeprepError> {
    match fs::metadata(state_dir) {
        Ok(_) => Ok(NodeState::Initialized),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(NodeState::Uninitialized),
        Err(e) => Err(NodeprepError::Io(e)),
    }
}

// =============================================================================
// LOCK
// =============================================================================

/// Exclusive claim on bootstrapping one state directory.
///
/// Backed by a `<state_dir>.lock` sibling file. On Unix the claim is a
/// `flock(2)` on that file, so the kernel releases it when the holder dies
/// and a leftover file from a killed process does not block later runs.
/// Elsewhere the file is created with `create_new` and its presence is the
/// claim. The file is removed when the lock is dropped.
#[derive(Debug)]
pub struct BootstrapLock {
    path: PathBuf,
    // Closed after `Drop::drop` unlinks the path, releasing the flock last.
    _file: File,
}

impl BootstrapLock {
    /// Path of the lock file guarding `state_dir`.
    pub fn lock_path(state_dir: &Path) -> PathBuf {
        let mut name = state_dir
            .file_name()
            .unwrap_or_else(|| OsStr::new("state"))
            .to_os_string();
        name.push(".lock");
        state_dir.with_file_name(name)
    }

    /// Take the lock for `state_dir`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns `NodeprepError::Locked` when another holder owns the lock, or
    /// `NodeprepError::Io` if the lock file cannot be created.
    pub fn acquire(state_dir: &Path) -> Result<Self, NodeprepError> {
        let path = Self::lock_path(state_dir);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = open_exclusive(&path)?;

        // Holder pid, for whoever inspects the lock file.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BootstrapLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Could not remove bootstrap lock {:?}: {}", self.path, e);
        }
    }
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> Result<File, NodeprepError> {
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::AsRawFd;

    loop {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        // SAFETY: the descriptor belongs to `file`, which outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::WouldBlock {
                return Err(NodeprepError::Locked(path.to_path_buf()));
            }
            return Err(NodeprepError::Io(err));
        }

        // A releasing holder may have unlinked the file between our open and
        // flock; the lock only counts if it is on the file at `path`.
        let held = file.metadata()?;
        match fs::metadata(path) {
            Ok(current) if current.dev() == held.dev() && current.ino() == held.ino() => {
                return Ok(file);
            }
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(NodeprepError::Io(e)),
        }
    }
}

#[cfg(not(unix))]
fn open_exclusive(path: &Path) -> Result<File, NodeprepError> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(NodeprepError::Locked(path.to_path_buf()))
        }
        Err(e) => Err(NodeprepError::Io(e)),
    }
}

// =============================================================================
// TREE
// =============================================================================

/// Render the directory tree rooted at `root`.
///
/// Entries are sorted by name, directories carry a trailing `/`, and
/// symlinks are listed but not followed.
///
/// ```text
/// state
/// ├── config/
/// │   ├── config.toml
/// │   └── genesis.json
/// └── data/
/// ```
pub fn render_tree(root: &Path) -> Result<String, NodeprepError> {
    let mut out = format!("{}\n", root.display());
    render_dir(root, "", 0, &mut out)?;
    Ok(out)
}

fn render_dir(
    dir: &Path,
    prefix: &str,
    depth: usize,
    out: &mut String,
) -> Result<(), NodeprepError> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    let count = entries.len();
    for (i, entry) in entries.into_iter().enumerate() {
        let last = i + 1 == count;
        let is_dir = entry.file_type()?.is_dir();
        let name = entry.file_name();

        out.push_str(prefix);
        out.push_str(if last { "└── " } else { "├── " });
        out.push_str(&name.to_string_lossy());
        if is_dir {
            out.push('/');
        }
        out.push('\n');

        if is_dir && depth + 1 < MAX_TREE_DEPTH {
            let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
            render_dir(&entry.path(), &child_prefix, depth + 1, out)?;
        }
    }

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reports_missing_dir_as_uninitialized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = probe_state(&dir.path().join("state")).expect("probe");
        assert_eq!(state, NodeState::Uninitialized);
    }

    #[test]
    fn probe_reports_existing_dir_as_initialized() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(probe_state(dir.path()).expect("probe"), NodeState::Initialized);
    }

    #[cfg(unix)]
    #[test]
    fn probe_propagates_not_a_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("plain");
        fs::write(&file, "x").expect("write");

        // A path through a regular file fails with ENOTDIR, not ENOENT.
        let err = probe_state(&file.join("state")).expect_err("not a directory");
        assert!(matches!(err, NodeprepError::Io(ref e) if e.kind() != ErrorKind::NotFound));
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state_dir = dir.path().join("state");

        let lock = BootstrapLock::acquire(&state_dir).expect("acquire");
        assert_eq!(lock.path(), dir.path().join("state.lock"));
        assert!(matches!(
            BootstrapLock::acquire(&state_dir),
            Err(NodeprepError::Locked(_))
        ));

        drop(lock);
        assert!(!dir.path().join("state.lock").exists());
        let _again = BootstrapLock::acquire(&state_dir).expect("reacquire");
    }

    #[cfg(unix)]
    #[test]
    fn leftover_lock_file_from_dead_holder_is_reclaimed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state_dir = dir.path().join("state");
        let lock_path = BootstrapLock::lock_path(&state_dir);

        // What a SIGKILLed holder leaves behind: the file, but no flock.
        fs::write(&lock_path, "999999\n").expect("seed");

        let lock = BootstrapLock::acquire(&state_dir).expect("reclaim");
        let pid = fs::read_to_string(&lock_path).expect("read");
        assert_eq!(pid.trim(), std::process::id().to_string());
        assert!(matches!(
            BootstrapLock::acquire(&state_dir),
            Err(NodeprepError::Locked(_))
        ));

        drop(lock);
        assert!(!lock_path.exists());
    }

    #[test]
    fn tree_is_sorted_and_nested() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("state");
        fs::create_dir_all(root.join("config")).expect("mkdir");
        fs::create_dir_all(root.join("data")).expect("mkdir");
        fs::write(root.join("config/genesis.json"), "{}").expect("write");
        fs::write(root.join("config/config.toml"), "").expect("write");

        let tree = render_tree(&root).expect("tree");
        let expected = format!(
            "{}\n├── config/\n│   ├── config.toml\n│   └── genesis.json\n└── data/\n",
            root.display()
        );
        assert_eq!(tree, expected);
    }

    #[test]
    fn tree_of_missing_dir_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(render_tree(&dir.path().join("nope")).is_err());
    }
}
