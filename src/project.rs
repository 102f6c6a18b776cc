//! Project root discovery and the project-level descriptor: `fst.json`,
//! `.fst/export/git-map.json`.
//!
//! A project is the container of workspaces and the shared object store.
//! There is exactly one `fst.json` per project, at the root the caller
//! discovers by walking upward from the current
//! directory — nothing here holds a hidden global singleton; the root is
//! always passed explicitly.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FstError, Result};
use crate::ids::SnapshotId;

/// Name of the project descriptor file at the project root.
pub const PROJECT_FILE: &str = "fst.json";

/// Kind of backend a project is bound to, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A local Git repository, accessed by shelling out to `git`.
    Git,
    /// A GitHub-hosted repository (same local Git mechanics, plus a known
    /// remote/repo pair for push/pull).
    Github,
}

/// Optional backend binding recorded on a [`Project`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    /// Which kind of backend this is.
    pub kind: BackendKind,
    /// Remote URL, if the backend has one configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    /// `owner/repo` slug, for GitHub backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

/// The project-level descriptor persisted at `<project>/fst.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Opaque, stable project identifier.
    pub project_id: String,
    /// Human-readable project name.
    pub project_name: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// The workspace designated "main", if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_workspace_id: Option<String>,
    /// Git/GitHub backend binding, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
}

impl Project {
    /// Create a brand new project descriptor with a freshly generated ID.
    #[must_use]
    pub fn new(project_name: String, created_at: String) -> Self {
        Self {
            project_id: crate::ids::generate_opaque_id(),
            project_name,
            created_at,
            main_workspace_id: None,
            backend: None,
        }
    }

    /// Path to `fst.json` under `root`.
    #[must_use]
    pub fn descriptor_path(root: &Path) -> PathBuf {
        root.join(PROJECT_FILE)
    }

    /// Path to the project's shared blob store.
    #[must_use]
    pub fn blobs_dir(root: &Path) -> PathBuf {
        root.join(".fst").join("blobs")
    }

    /// Path to the project's snapshot metadata store.
    #[must_use]
    pub fn snapshots_dir(root: &Path) -> PathBuf {
        root.join(".fst").join("snapshots")
    }

    /// Path to the project's workspace registry directory.
    #[must_use]
    pub fn workspaces_dir(root: &Path) -> PathBuf {
        root.join(".fst").join("workspaces")
    }

    /// Path to the project's `GitMapping` artifact.
    #[must_use]
    pub fn git_map_path(root: &Path) -> PathBuf {
        root.join(".fst").join("export").join("git-map.json")
    }

    /// Persist this descriptor to `<root>/fst.json`, atomically.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure.
    pub fn save(&self, root: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| FstError::Storage(std::io::Error::other(e)))?;
        let path = Self::descriptor_path(root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)?;
        let file = fs::File::open(&tmp)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load the descriptor at `<root>/fst.json`.
    ///
    /// # Errors
    /// Returns [`FstError::NotFound`] if no descriptor exists at `root`, or
    /// [`FstError::Storage`] if it exists but isn't valid JSON.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::descriptor_path(root);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FstError::NotFound {
                    what: "project".to_owned(),
                    id: path.display().to_string(),
                }
            } else {
                FstError::Storage(e)
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| FstError::Storage(std::io::Error::other(e)))
    }

    /// Walk upward from `start` looking for a directory containing
    /// `fst.json`, the same way a VCS client locates its repository root.
    ///
    /// # Errors
    /// Returns [`FstError::NotFound`] if no ancestor of `start` (including
    /// `start` itself) contains `fst.json`.
    pub fn discover(start: &Path) -> Result<PathBuf> {
        let mut dir = start
            .canonicalize()
            .unwrap_or_else(|_| start.to_path_buf());
        loop {
            if Self::descriptor_path(&dir).is_file() {
                return Ok(dir);
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => {
                    return Err(FstError::NotFound {
                        what: "project root".to_owned(),
                        id: start.display().to_string(),
                    })
                }
            }
        }
    }
}

/// Bijective (modulo absent entries) mapping between snapshot IDs and the
/// Git commit SHAs they were exported to or imported from. Persisted under
/// `<project>/.fst/export/git-map.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitMapping {
    /// Path to the Git repository this mapping describes, relative to the
    /// project root (usually `.git`).
    pub repo_path: String,
    /// `snapshot_id -> git_commit_sha`.
    pub snapshots: BTreeMap<SnapshotId, String>,
}

impl GitMapping {
    /// An empty mapping pointing at `repo_path`.
    #[must_use]
    pub fn new(repo_path: String) -> Self {
        Self {
            repo_path,
            snapshots: BTreeMap::new(),
        }
    }

    /// Look up the Git commit SHA a snapshot was translated to, if any.
    #[must_use]
    pub fn sha_for(&self, id: &SnapshotId) -> Option<&str> {
        self.snapshots.get(id).map(String::as_str)
    }

    /// Look up the snapshot a Git commit SHA was translated from, if any.
    #[must_use]
    pub fn snapshot_for_sha(&self, sha: &str) -> Option<&SnapshotId> {
        self.snapshots
            .iter()
            .find(|(_, s)| s.as_str() == sha)
            .map(|(id, _)| id)
    }

    /// Record a new translation. Overwrites any existing entry for `id`.
    pub fn record(&mut self, id: SnapshotId, sha: String) {
        self.snapshots.insert(id, sha);
    }

    /// Persist to `path`, atomically.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| FstError::Storage(std::io::Error::other(e)))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)?;
        let file = fs::File::open(&tmp)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load from `path`, or return an empty mapping pointing at `repo_path`
    /// if the file does not exist yet (a fresh project has no export
    /// history).
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] if the file exists but isn't valid
    /// JSON.
    pub fn load_or_default(path: &Path, repo_path: &str) -> Result<Self> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| FstError::Storage(std::io::Error::other(e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::new(repo_path.to_owned()))
            }
            Err(e) => Err(FstError::Storage(e)),
        }
    }
}
