//! Manifest: the canonical, hash-stable description of a file tree.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::blob::BlobStore;
use crate::error::{FstError, Result};
use crate::ids::{BlobHash, ManifestHash};
use crate::ignore::IgnoreMatcher;

// ---------------------------------------------------------------------------
// FileEntry
// ---------------------------------------------------------------------------

/// A single tracked file within a [`Manifest`].
///
/// `path` always uses forward-slash separators regardless of host OS, and
/// must not contain `.`, `..`, or a `.fst`/`.git` path component.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileEntry {
    /// Forward-slash-separated path relative to the workspace root.
    pub path: String,
    /// Content hash of the file.
    pub blob_hash: BlobHash,
    /// File size in bytes.
    pub size: u64,
    /// POSIX permission bits only.
    pub mode: u32,
}

/// Reject a path that uses `.`, `..`, or a `.fst`/`.git` component.
///
/// # Errors
/// Returns [`FstError::InvalidInput`] if the path is disallowed.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(FstError::InvalidInput {
            detail: "file path must not be empty".to_owned(),
        });
    }
    for component in path.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(FstError::InvalidInput {
                detail: format!("file path {path:?} contains an illegal component"),
            });
        }
        if component == ".fst" || component == ".git" {
            return Err(FstError::InvalidInput {
                detail: format!("file path {path:?} may not contain a {component:?} component"),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// An ordered, canonical description of a file tree.
///
/// `files` is always kept sorted lexicographically by path; identical file
/// sets always yield identical manifest hashes regardless of the order in
/// which entries were produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version, currently always `"1"`.
    pub version: String,
    /// Files, sorted by path.
    pub files: Vec<FileEntry>,
}

impl Manifest {
    /// An empty manifest.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: "1".to_owned(),
            files: Vec::new(),
        }
    }

    /// Build a manifest from an arbitrary (possibly unsorted, possibly
    /// duplicated) set of entries, sorting by path and keeping the order
    /// canonical.
    #[must_use]
    pub fn from_entries(mut files: Vec<FileEntry>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            version: "1".to_owned(),
            files,
        }
    }

    /// Canonical JSON serialization: sorted keys, files already in path
    /// order. The manifest hash is SHA-256 over these bytes.
    ///
    /// # Errors
    /// Returns an error only if serialization itself fails, which does not
    /// happen for valid manifests.
    pub fn canonical_json(&self) -> serde_json::Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            files: &'a [FileEntry],
            version: &'a str,
        }
        serde_json::to_vec(&Canonical {
            files: &self.files,
            version: &self.version,
        })
    }

    /// Compute this manifest's content hash.
    #[must_use]
    pub fn hash(&self) -> ManifestHash {
        let bytes = self
            .canonical_json()
            .expect("Manifest serialization is infallible for valid data");
        ManifestHash::from_digest(&Sha256::digest(&bytes).into())
    }

    /// Total number of files.
    #[must_use]
    pub fn file_count(&self) -> u32 {
        self.files.len() as u32
    }

    /// Sum of all file sizes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Persist this manifest as a blob, keyed by its own content hash. The
    /// returned hash always equals [`Manifest::hash`].
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure.
    pub fn store(&self, blobs: &BlobStore) -> Result<ManifestHash> {
        let bytes = self
            .canonical_json()
            .expect("Manifest serialization is infallible for valid data");
        blobs.put(&bytes)
    }

    /// Load a previously stored manifest by its hash.
    ///
    /// # Errors
    /// Returns [`FstError::NotFound`] if absent, or [`FstError::Storage`] if
    /// the stored bytes are not a valid manifest.
    pub fn load(blobs: &BlobStore, hash: &ManifestHash) -> Result<Self> {
        let bytes = blobs.get(hash)?;
        serde_json::from_slice(&bytes).map_err(|e| FstError::Storage(std::io::Error::other(e)))
    }

    /// Look up a file entry by path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files
            .binary_search_by(|f| f.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.files[i])
    }

    /// Walk `root`, skipping paths the ignore matcher rejects (and always
    /// skipping `.fst`/`.git`), hashing each regular file into `blobs` and
    /// recording a [`FileEntry`] for it.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure reading the tree or
    /// writing blobs.
    pub fn generate(root: &Path, ignore: &IgnoreMatcher, blobs: &BlobStore) -> Result<Self> {
        let mut entries = Vec::new();
        walk(root, root, ignore, blobs, &mut entries)?;
        Ok(Self::from_entries(entries))
    }

    /// Simple two-way diff against `current`: classify every path as added
    /// (in `current` not `self`), deleted (in `self` not `current`), or
    /// modified (in both with a different blob hash or mode).
    #[must_use]
    pub fn diff(&self, current: &Self) -> TwoWayDiff {
        let base_paths: BTreeSet<&str> = self.files.iter().map(|f| f.path.as_str()).collect();
        let cur_paths: BTreeSet<&str> = current.files.iter().map(|f| f.path.as_str()).collect();

        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut deleted = Vec::new();

        for path in cur_paths.iter().chain(base_paths.iter()).collect::<BTreeSet<_>>() {
            let in_base = base_paths.contains(*path);
            let in_cur = cur_paths.contains(*path);
            match (in_base, in_cur) {
                (false, true) => added.push((*path).to_owned()),
                (true, false) => deleted.push((*path).to_owned()),
                (true, true) => {
                    let b = self.get(path).expect("path known to be present");
                    let c = current.get(path).expect("path known to be present");
                    if b.blob_hash != c.blob_hash || b.mode != c.mode {
                        modified.push((*path).to_owned());
                    }
                }
                (false, false) => unreachable!("path must be in at least one side"),
            }
        }

        added.sort();
        modified.sort();
        deleted.sort();
        TwoWayDiff {
            added,
            modified,
            deleted,
        }
    }
}

/// Result of [`Manifest::diff`]: added/modified/deleted path lists, each
/// sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TwoWayDiff {
    /// Paths present in current but not base.
    pub added: Vec<String>,
    /// Paths present in both with differing content or mode.
    pub modified: Vec<String>,
    /// Paths present in base but not current.
    pub deleted: Vec<String>,
}

fn walk(
    root: &Path,
    dir: &Path,
    ignore: &IgnoreMatcher,
    blobs: &BlobStore,
    entries: &mut Vec<FileEntry>,
) -> Result<()> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(FstError::Storage(e)),
    };
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name == ".fst" || file_name == ".git" {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if ignore.is_ignored(root, &path, true) {
                continue;
            }
            walk(root, &path, ignore, blobs, entries)?;
        } else if file_type.is_file() {
            if ignore.is_ignored(root, &path, false) {
                continue;
            }
            let rel = relative_unix_path(root, &path);
            validate_path(&rel)?;
            let (blob_hash, size) = blobs.put_file(&path)?;
            let mode = posix_mode(&path)?;
            entries.push(FileEntry {
                path: rel,
                blob_hash,
                size,
                mode,
            });
        }
        // Symlinks and other special file types are not tracked.
    }
    Ok(())
}

fn relative_unix_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn posix_mode(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(path)?;
    Ok(meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn posix_mode(_path: &Path) -> Result<u32> {
    Ok(0o644)
}
