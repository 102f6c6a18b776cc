//! Three-way merge engine: plan, resolve, and apply.
//!
//! A merge takes two snapshots (`ours`, `theirs`), finds their merge base
//! via [`crate::dag::merge_base`], classifies every touched path with
//! [`crate::drift::classify`], and either auto-resolves or hands the path to
//! a pluggable [`MergeResolver`]. A clean merge produces a new snapshot with
//! both sides as parents; a conflicted merge writes conflict-marked content
//! into the working tree and records the still-pending paths so the
//! operation can be resumed after manual resolution.

pub mod linemerge;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::blob::BlobStore;
use crate::dag;
use crate::drift::{self, SideChange};
use crate::error::{FstError, Result};
use crate::ids::SnapshotId;
use crate::manifest::{FileEntry, Manifest};
use crate::snapshot::{Author, SnapshotMeta, SnapshotStore};

pub use linemerge::{compute_conflict_hunks, diff3_merge, Hunk, LineMergeOutcome};

/// How to handle paths the resolver cannot cleanly reconcile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Abort the merge as soon as any path conflicts; nothing is written.
    Fail,
    /// Write conflict-marked content for unresolved paths and continue; the
    /// resulting [`MergePlan`] lists every path still pending.
    MarkAndContinue,
}

/// Outcome of resolving a single conflicting path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The resolver produced final content for the path.
    Resolved(Vec<u8>),
    /// The resolver could not reconcile the sides; contains best-effort
    /// conflict-marked content suitable for writing into the working tree.
    Conflict(Vec<u8>),
}

/// Pluggable strategy for resolving one conflicting path's content.
///
/// The default [`LineResolver`] runs `git merge-file --diff3`; a caller may
/// substitute a different resolver for specific file types (e.g. a
/// structured merge for lockfiles).
pub trait MergeResolver {
    /// Resolve `path` given its content on the base, ours, and theirs sides.
    /// `base` is `None` when the path did not exist at the merge base (an
    /// add/add case).
    ///
    /// # Errors
    /// Returns an error if resolution fails outright — not merely produces
    /// a conflict, which is represented by `ResolveOutcome::Conflict`.
    fn resolve(
        &self,
        path: &str,
        base: Option<&[u8]>,
        ours: &[u8],
        theirs: &[u8],
    ) -> Result<ResolveOutcome>;
}

/// Default resolver: diff3 line merge when a base exists; an unresolvable
/// conflict otherwise (there is no common ancestor content to diff3
/// against for an add/add with no base).
///
/// `git merge-file --diff3` is used only to decide whether a file's hunks
/// collide and, when they don't, to produce the auto-merged content — its
/// own hunk-level `<<<<<<<`/`|||||||`/`=======`/`>>>>>>>` output is never
/// written out. A genuine conflict is instead rendered as exactly three
/// marker lines enclosing the two sides' full file bodies, labeled with
/// `ours_label`/`theirs_label` so a workspace-aware caller can
/// substitute the real workspace names.
#[derive(Clone, Debug)]
pub struct LineResolver {
    /// Label for the `<<<<<<<` side, e.g. `"CURRENT (main)"`.
    pub ours_label: String,
    /// Label for the `>>>>>>>` side, e.g. `"SOURCE (feature-x)"`.
    pub theirs_label: String,
}

impl LineResolver {
    /// A resolver with explicit conflict-marker labels.
    #[must_use]
    pub fn new(ours_label: impl Into<String>, theirs_label: impl Into<String>) -> Self {
        Self {
            ours_label: ours_label.into(),
            theirs_label: theirs_label.into(),
        }
    }
}

impl Default for LineResolver {
    fn default() -> Self {
        Self::new("CURRENT", "SOURCE")
    }
}

impl MergeResolver for LineResolver {
    fn resolve(
        &self,
        _path: &str,
        base: Option<&[u8]>,
        ours: &[u8],
        theirs: &[u8],
    ) -> Result<ResolveOutcome> {
        let Some(base) = base else {
            return Ok(ResolveOutcome::Conflict(whole_file_markers(
                ours,
                theirs,
                &self.ours_label,
                &self.theirs_label,
            )));
        };
        match linemerge::diff3_merge(base, ours, theirs)? {
            LineMergeOutcome::Clean(bytes) => Ok(ResolveOutcome::Resolved(bytes)),
            LineMergeOutcome::Conflict(_) => Ok(ResolveOutcome::Conflict(whole_file_markers(
                ours,
                theirs,
                &self.ours_label,
                &self.theirs_label,
            ))),
        }
    }
}

/// Render a conflict as exactly three marker lines enclosing the two sides'
/// full file bodies.
fn whole_file_markers(ours: &[u8], theirs: &[u8], ours_label: &str, theirs_label: &str) -> Vec<u8> {
    let mut marked = Vec::with_capacity(ours.len() + theirs.len() + 32);
    marked.extend_from_slice(format!("<<<<<<< {ours_label}\n").as_bytes());
    marked.extend_from_slice(ours);
    if !ours.ends_with(b"\n") {
        marked.push(b'\n');
    }
    marked.extend_from_slice(b"=======\n");
    marked.extend_from_slice(theirs);
    if !theirs.ends_with(b"\n") {
        marked.push(b'\n');
    }
    marked.extend_from_slice(format!(">>>>>>> {theirs_label}\n").as_bytes());
    marked
}

/// Crude binary sniff: a NUL byte anywhere means don't try to diagnose this
/// content as text. Good enough for deciding whether a conflict is worth a
/// line-level overlap report, not a general-purpose content-type detector.
fn looks_textual(bytes: &[u8]) -> bool {
    !bytes.contains(&0)
}

/// One path's planned outcome within a [`MergePlan`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlannedEntry {
    /// Deleted on both sides, or present unchanged.
    Absent,
    /// Final entry to write, whether untouched, one-sided, or auto-resolved.
    Present(FileEntry),
    /// Still conflicting after resolution.
    Conflicted {
        /// Ours-side entry, if the path existed there.
        ours: Option<FileEntry>,
        /// Theirs-side entry, if the path existed there.
        theirs: Option<FileEntry>,
        /// Conflict-marked content staged for [`apply_to_working_tree`],
        /// present whenever the policy permits continuing past the
        /// conflict.
        marker: Option<FileEntry>,
        /// Line-level overlap report, populated when both
        /// sides modified the path relative to a present base and the
        /// content on both sides decodes as text. Empty for add/add or
        /// modify/delete conflicts, and for binary content.
        hunks: Vec<Hunk>,
    },
}

/// The full plan for merging `ours` into `theirs` (or vice versa — merge is
/// symmetric except for tie-breaking authorship).
#[derive(Clone, Debug)]
pub struct MergePlan {
    /// Merge base snapshot IDs (may be empty, one, or, for criss-cross
    /// histories, several).
    pub base_ids: Vec<SnapshotId>,
    /// The "ours" snapshot.
    pub ours: SnapshotId,
    /// The "theirs" snapshot.
    pub theirs: SnapshotId,
    /// Per-path planned outcome, keyed by path.
    pub entries: BTreeMap<String, PlannedEntry>,
    /// Paths still conflicting, sorted.
    pub conflicts: Vec<String>,
}

impl MergePlan {
    /// Returns `true` if every path resolved without conflict.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Build the resulting manifest from the plan's resolved entries.
    /// Conflicted paths keep their "ours" content (or theirs, if ours is
    /// absent) so the working tree has *something* checked out alongside
    /// the conflict markers written by [`apply_to_working_tree`].
    #[must_use]
    pub fn resulting_manifest(&self) -> Manifest {
        let mut files = Vec::new();
        for entry in self.entries.values() {
            match entry {
                PlannedEntry::Present(f) => files.push(f.clone()),
                PlannedEntry::Conflicted { ours, theirs, .. } => {
                    if let Some(f) = ours.clone().or_else(|| theirs.clone()) {
                        files.push(f);
                    }
                }
                PlannedEntry::Absent => {}
            }
        }
        Manifest::from_entries(files)
    }
}

/// Compute a merge plan for `ours` and `theirs` without touching the
/// filesystem working tree.
///
/// Uses the DAG-derived lowest common ancestor(s) as the merge base. Callers
/// that need to override the base — e.g. [`crate::workspace`]'s
/// merge-base inheritance, which prefers the last snapshot actually merged
/// from a source over the full DAG computation — should call
/// [`plan_merge_with_base`] directly.
///
/// # Errors
/// Returns [`FstError::NotFound`] if either snapshot is missing, or
/// propagates DAG/resolver errors.
pub fn plan_merge(
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    resolver: &dyn MergeResolver,
    policy: ConflictPolicy,
    ours: &SnapshotId,
    theirs: &SnapshotId,
) -> Result<MergePlan> {
    let base_ids = dag::merge_base(snapshots, ours, theirs)?;
    plan_merge_with_base(snapshots, blobs, resolver, policy, ours, theirs, base_ids)
}

/// As [`plan_merge`], but with an explicit merge base instead of the
/// DAG-derived lowest common ancestor(s).
///
/// # Errors
/// Returns [`FstError::NotFound`] if either snapshot or any base ID is
/// missing, or propagates resolver errors.
pub fn plan_merge_with_base(
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    resolver: &dyn MergeResolver,
    policy: ConflictPolicy,
    ours: &SnapshotId,
    theirs: &SnapshotId,
    base_ids: Vec<SnapshotId>,
) -> Result<MergePlan> {
    let ours_meta = snapshots.load(ours)?;
    let theirs_meta = snapshots.load(theirs)?;

    let base_manifest = match base_ids.first() {
        Some(id) => {
            let meta = snapshots.load(id)?;
            Manifest::load(blobs, &meta.manifest_hash)?
        }
        None => Manifest::empty(),
    };
    let ours_manifest = Manifest::load(blobs, &ours_meta.manifest_hash)?;
    let theirs_manifest = Manifest::load(blobs, &theirs_meta.manifest_hash)?;

    let drifts = drift::classify(&base_manifest, &ours_manifest, &theirs_manifest);

    let mut entries = BTreeMap::new();
    let mut conflicts = Vec::new();

    for d in drifts {
        // deleted-in-a: ours/target deleted the path while theirs/source
        // left it untouched. The source still retains the file, so this is
        // a conflict (spec: "deleted-in-a (when S retains the file):
        // conflict") rather than the one-sided "no action" shape below —
        // route it into the general conflict-resolution branch instead.
        let is_delete_keep_conflict =
            d.side_a == SideChange::Deleted && d.side_b == SideChange::Unchanged;

        let planned = if d.is_quiet() {
            d.base_entry
                .clone()
                .map_or(PlannedEntry::Absent, PlannedEntry::Present)
        } else if d.side_a == SideChange::Unchanged && d.side_b == SideChange::Deleted {
            // deleted-in-b: source deleted the path, target left it alone —
            // in-sync, no action. Target keeps its (unchanged) file.
            d.a_entry.clone().map_or(PlannedEntry::Absent, PlannedEntry::Present)
        } else if d.is_one_sided() && !is_delete_keep_conflict {
            match (&d.a_entry, &d.b_entry) {
                (Some(f), _) if d.side_a != SideChange::Unchanged => PlannedEntry::Present(f.clone()),
                (_, Some(f)) => PlannedEntry::Present(f.clone()),
                _ => PlannedEntry::Absent,
            }
        } else if d.changes_agree() {
            d.a_entry.clone().map_or(PlannedEntry::Absent, PlannedEntry::Present)
        } else {
            let base_bytes = match &d.base_entry {
                Some(f) => Some(blobs.get(&f.blob_hash)?),
                None => None,
            };
            let ours_bytes = match &d.a_entry {
                Some(f) => blobs.get(&f.blob_hash)?,
                None => Vec::new(),
            };
            let theirs_bytes = match &d.b_entry {
                Some(f) => blobs.get(&f.blob_hash)?,
                None => Vec::new(),
            };
            let mode = d
                .a_entry
                .as_ref()
                .or(d.b_entry.as_ref())
                .map_or(0o644, |f| f.mode);

            // modify/delete (including the one-sided deleted-in-a shape
            // above): deleting one side leaves nothing to diff3 against, so
            // the default line resolver's three-way merge naturally
            // conflicts here (an explicit side-taking resolver, e.g.
            // `Theirs`/`Ours`, still resolves it directly).
            match resolver.resolve(&d.path, base_bytes.as_deref(), &ours_bytes, &theirs_bytes)? {
                ResolveOutcome::Resolved(bytes) => {
                    let hash = blobs.put(&bytes)?;
                    PlannedEntry::Present(FileEntry {
                        path: d.path.clone(),
                        blob_hash: hash,
                        size: bytes.len() as u64,
                        mode,
                    })
                }
                ResolveOutcome::Conflict(marked) => {
                    let marker = if matches!(policy, ConflictPolicy::Fail) {
                        None
                    } else {
                        let hash = blobs.put(&marked)?;
                        Some(FileEntry {
                            path: d.path.clone(),
                            blob_hash: hash,
                            size: marked.len() as u64,
                            mode,
                        })
                    };
                    // Both-sides-modified-relative-to-a-present-base is the
                    // only shape a line-level overlap report makes sense
                    // for; add/add and modify/delete conflicts leave one
                    // side with nothing to diff against.
                    let hunks = match &base_bytes {
                        Some(base) if looks_textual(base) && looks_textual(&ours_bytes) && looks_textual(&theirs_bytes) => {
                            linemerge::compute_conflict_hunks(base, &ours_bytes, &theirs_bytes)
                        }
                        _ => Vec::new(),
                    };
                    conflicts.push(d.path.clone());
                    PlannedEntry::Conflicted {
                        ours: d.a_entry.clone(),
                        theirs: d.b_entry.clone(),
                        marker,
                        hunks,
                    }
                }
            }
        };
        entries.insert(d.path.clone(), planned);
    }

    if matches!(policy, ConflictPolicy::Fail) && !conflicts.is_empty() {
        return Err(FstError::Conflict {
            paths: conflicts.iter().map(PathBuf::from).collect(),
        });
    }

    conflicts.sort();
    conflicts.dedup();
    Ok(MergePlan {
        base_ids,
        ours: ours.clone(),
        theirs: theirs.clone(),
        entries,
        conflicts,
    })
}

/// Materialize a merge plan's resulting manifest into a new snapshot.
///
/// Only valid for a clean plan ([`MergePlan::is_clean`]); a conflicted plan
/// must be resolved (e.g. via [`crate::workspace`] conflict-resolution
/// flow) before it can be committed.
///
/// # Errors
/// Returns [`FstError::Conflict`] if the plan is not clean, or propagates
/// storage errors.
pub fn apply(
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    plan: &MergePlan,
    author: Author,
    created_at: String,
    message: Option<String>,
) -> Result<SnapshotMeta> {
    if !plan.is_clean() {
        return Err(FstError::Conflict {
            paths: plan.conflicts.iter().map(PathBuf::from).collect(),
        });
    }
    let manifest = plan.resulting_manifest();
    let manifest_hash = manifest.store(blobs)?;
    let mut parents = vec![plan.ours.clone(), plan.theirs.clone()];
    parents.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    parents.dedup();
    let ours_meta = snapshots.load(&plan.ours)?;
    let meta = SnapshotMeta::new(
        manifest_hash,
        parents,
        author,
        created_at,
        message,
        ours_meta.workspace_id,
        ours_meta.workspace_name,
        ours_meta.agent,
        manifest.file_count(),
        manifest.total_size(),
    );
    snapshots.create(&meta)?;
    Ok(meta)
}

/// Write a conflicted plan's entries (including conflict-marked content for
/// still-pending paths) into a working tree directory, for manual
/// resolution.
///
/// # Errors
/// Returns [`FstError::Storage`] on I/O failure.
pub fn apply_to_working_tree(root: &Path, blobs: &BlobStore, plan: &MergePlan) -> Result<()> {
    for entry in plan.entries.values() {
        let marked = match entry {
            PlannedEntry::Present(f) => Some(f),
            PlannedEntry::Conflicted { marker, .. } => marker.as_ref(),
            PlannedEntry::Absent => None,
        };
        if let Some(f) = marked {
            let target = root.join(&f.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let bytes = blobs.get(&f.blob_hash)?;
            std::fs::write(&target, bytes)?;
            set_mode(&target, f.mode)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Resumable state for a merge with unresolved conflicts, persisted so a
/// conflict-resolution session can span multiple process invocations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeState {
    /// The "ours" snapshot this merge started from.
    pub ours: SnapshotId,
    /// The "theirs" snapshot being merged in.
    pub theirs: SnapshotId,
    /// Merge base snapshot IDs at the time the merge began.
    pub base_ids: Vec<SnapshotId>,
    /// Paths still awaiting manual resolution.
    pub pending: Vec<String>,
}

impl MergeState {
    /// Build resumable state from a conflicted plan.
    #[must_use]
    pub fn from_plan(plan: &MergePlan) -> Self {
        Self {
            ours: plan.ours.clone(),
            theirs: plan.theirs.clone(),
            base_ids: plan.base_ids.clone(),
            pending: plan.conflicts.clone(),
        }
    }

    /// Returns `true` once every path has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.pending.is_empty()
    }

    /// Mark a path as resolved, removing it from the pending list.
    pub fn mark_resolved(&mut self, path: &str) {
        self.pending.retain(|p| p != path);
    }

    /// Persist state as pretty JSON to `path`, atomically.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| FstError::Storage(std::io::Error::other(e)))?;
        let tmp = path.with_extension("tmp");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load state from `path`.
    ///
    /// # Errors
    /// Returns [`FstError::NotFound`] if absent, [`FstError::Storage`]
    /// otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FstError::NotFound {
                    what: "merge state".to_owned(),
                    id: path.display().to_string(),
                }
            } else {
                FstError::Storage(e)
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| FstError::Storage(std::io::Error::other(e)))
    }
}
