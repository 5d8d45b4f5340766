// src/workspace.rs

//! Scratch workspace for a single pipeline run
//!
//! Layout under `<parent>/<name>/`:
//! - `old/` - members extracted from the input container
//! - `new/` - files staged for the output container
//! - `decompressed/` - intermediate decoded images
//! - `list` - member order of the input container
//!
//! The tree is removed when the [`Workspace`] is dropped, on success and on
//! every error path, unless it was created with `keep` set.

use crate::error::{IoResultExt, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ORIGINAL_DIR: &str = "old";
const STAGED_DIR: &str = "new";
const DECOMPRESSED_DIR: &str = "decompressed";
const LIST_FILE: &str = "list";

#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    original: PathBuf,
    staged: PathBuf,
    decompressed: PathBuf,
    list_file: PathBuf,
    keep: bool,
    disposed: bool,
}

impl Workspace {
    /// Create a fresh workspace at `parent/name`
    ///
    /// Anything already at that path is removed first.
    pub fn acquire(parent: &Path, name: &str, keep: bool) -> Result<Self> {
        let root = parent.join(name);

        if root.exists() {
            debug!("Removing stale workspace {}", root.display());
            fs::remove_dir_all(&root).at_path(&root)?;
        }

        let workspace = Self {
            original: root.join(ORIGINAL_DIR),
            staged: root.join(STAGED_DIR),
            decompressed: root.join(DECOMPRESSED_DIR),
            list_file: root.join(LIST_FILE),
            root,
            keep,
            disposed: false,
        };

        for dir in [&workspace.original, &workspace.staged, &workspace.decompressed] {
            fs::create_dir_all(dir).at_path(dir)?;
        }
        fs::write(&workspace.list_file, "").at_path(&workspace.list_file)?;

        debug!("Workspace ready at {}", workspace.root.display());
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the extracted input members
    pub fn original_dir(&self) -> &Path {
        &self.original
    }

    /// Directory holding the files of the output container
    pub fn staged_dir(&self) -> &Path {
        &self.staged
    }

    pub fn decompressed_dir(&self) -> &Path {
        &self.decompressed
    }

    /// File recording the member order
    pub fn list_file(&self) -> &Path {
        &self.list_file
    }

    /// Remove the workspace now, reporting failure
    ///
    /// With `keep` set the tree is left in place for inspection.
    pub fn dispose(mut self) -> Result<()> {
        self.disposed = true;
        if self.keep {
            info!("Keeping workspace at {}", self.root.display());
            return Ok(());
        }
        fs::remove_dir_all(&self.root).at_path(&self.root)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        if self.keep {
            info!("Keeping workspace at {}", self.root.display());
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.root) {
            warn!("Failed to remove workspace {}: {}", self.root.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_layout() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = Workspace::acquire(temp_dir.path(), "working", false).unwrap();

        assert!(workspace.original_dir().is_dir());
        assert!(workspace.staged_dir().is_dir());
        assert!(workspace.decompressed_dir().is_dir());
        assert_eq!(fs::read_to_string(workspace.list_file()).unwrap(), "");
    }

    #[test]
    fn test_acquire_replaces_stale_workspace() {
        let temp_dir = TempDir::new().unwrap();
        let stale = temp_dir.path().join("working").join("new");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("leftover.zst"), b"old").unwrap();

        let workspace = Workspace::acquire(temp_dir.path(), "working", false).unwrap();
        assert!(!workspace.staged_dir().join("leftover.zst").exists());
    }

    #[test]
    fn test_drop_removes_tree() {
        let temp_dir = TempDir::new().unwrap();
        let root = {
            let workspace = Workspace::acquire(temp_dir.path(), "working", false).unwrap();
            fs::write(workspace.staged_dir().join("file"), b"x").unwrap();
            workspace.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn test_keep_leaves_tree() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = Workspace::acquire(temp_dir.path(), "working", true).unwrap();
        let root = workspace.root().to_path_buf();

        workspace.dispose().unwrap();
        assert!(root.join("old").is_dir());
    }

    #[test]
    fn test_dispose_removes_tree() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = Workspace::acquire(temp_dir.path(), "working", false).unwrap();
        let root = workspace.root().to_path_buf();

        workspace.dispose().unwrap();
        assert!(!root.exists());
    }
}
