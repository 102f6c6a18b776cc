//! Workspace registry and the merge/snapshot orchestration that ties the
//! object store, snapshot store, DAG engine, and merge engine together into
//! the project's workspace-facing operations.
//!
//! The merge engine in [`crate::merge`] works in terms of a single
//! mechanical policy (`Fail` or `MarkAndContinue`): it has no concept of a
//! workspace, a pending merge, or an external agent. This module adds that
//! layer — `ConflictPolicy::{Agent, Manual, Theirs, Ours}`, per-source
//! merge-base inheritance, the pending-parents/
//! auto-snapshot atomicity dance, and rollback — on top of
//! [`crate::merge::plan_merge_with_base`] and [`crate::merge::apply`]
//! rather than duplicating their logic.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use std::time::Duration;

use crate::blob::BlobStore;
use crate::dag;
use crate::error::{FstError, Result};
use crate::ids::SnapshotId;
use crate::ignore::IgnoreMatcher;
use crate::lock::WorkspaceLock;
use crate::manifest::Manifest;
use crate::merge::{self, MergeResolver, ResolveOutcome};
use crate::snapshot::{Author, SnapshotMeta, SnapshotStore};

/// Default timeout for the per-workspace advisory lock taken by
/// [`snapshot_create`], [`merge_into`], and [`rollback`]: a second
/// concurrent attempt blocks up to this timeout, then fails with
/// [`FstError::LockBusy`]. The CLI surface does not currently expose tuning this;
/// callers needing a different timeout can acquire
/// [`crate::lock::WorkspaceLock`] themselves before calling the
/// lock-free primitives this module builds on. Shortened under `cfg(test)`
/// so contention tests don't block for real wall-clock seconds.
#[cfg(not(test))]
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
#[cfg(test)]
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

fn workspace_lock_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".fst").join("workspace.lock")
}

// ---------------------------------------------------------------------------
// WorkspaceMode
// ---------------------------------------------------------------------------

/// Lifetime/role designation for a workspace. Forward-compatible via
/// `#[serde(default)]` so older workspace configs missing the field still
/// load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceMode {
    /// An ordinary workspace.
    #[default]
    Normal,
    /// The project's designated main workspace (`Project.main_workspace_id`).
    Main,
}

// ---------------------------------------------------------------------------
// MergeRecord / merge-base inheritance
// ---------------------------------------------------------------------------

/// A workspace's record of the last successful merge from one particular
/// source workspace.
///
/// On a later merge from the same source, this snapshot is preferred over
/// the DAG-derived lowest common ancestor, so already-merged content is not
/// reapplied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// The source workspace's head at the time of the last merge.
    pub last_merged_snapshot: SnapshotId,
    /// When that merge completed.
    pub merged_at: String,
}

// ---------------------------------------------------------------------------
// WorkspaceConfig — per-workspace `.fst/config.json`
// ---------------------------------------------------------------------------

/// A workspace's own configuration, persisted at `<workspace>/.fst/config.json`.
/// Owned exclusively by the workspace directory; the shared object store
/// lives at the project root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// The project this workspace belongs to.
    pub project_id: String,
    /// Stable opaque workspace identifier.
    pub workspace_id: String,
    /// Human-readable, renameable workspace name.
    pub workspace_name: String,
    /// Current head snapshot, or `None` for a freshly initialized workspace
    /// with no snapshots yet.
    #[serde(default)]
    pub current_snapshot_id: Option<SnapshotId>,
    /// Fork-point snapshot this workspace was created from, if any.
    #[serde(default)]
    pub base_snapshot_id: Option<SnapshotId>,
    /// Lifetime/role designation.
    #[serde(default)]
    pub mode: WorkspaceMode,
    /// Per-source merge-base inheritance records, keyed by source
    /// `workspace_id`.
    #[serde(default)]
    pub merge_history: BTreeMap<String, MergeRecord>,
}

impl WorkspaceConfig {
    fn path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(".fst").join("config.json")
    }

    /// Persist atomically.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure.
    pub fn save(&self, workspace_root: &Path) -> Result<()> {
        atomic_write_json(&Self::path(workspace_root), self)
    }

    /// Load from `<workspace>/.fst/config.json`.
    ///
    /// # Errors
    /// Returns [`FstError::NotFound`] if absent, [`FstError::Storage`]
    /// otherwise.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        read_json(&Self::path(workspace_root), "workspace config")
    }
}

// ---------------------------------------------------------------------------
// PendingMerge — `<workspace>/.fst/merge-parents.json`
// ---------------------------------------------------------------------------

/// A merge's recorded intent, persisted once at least one path was
/// successfully merged (clean or conflict-marked) and consumed by the next
/// `snapshot_create` on this workspace.
///
/// Absence of this file means there is no pending merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMerge {
    /// Parents the next snapshot on this workspace must carry.
    pub parents: Vec<SnapshotId>,
    /// The auto-snapshot taken of the workspace tree immediately before the
    /// merge was applied, so [`rollback`] can restore it byte-for-byte.
    pub pre_merge_snapshot: SnapshotId,
    /// Paths still in conflict when the merge completed, if any.
    pub conflicts: Vec<String>,
}

impl PendingMerge {
    fn path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(".fst").join("merge-parents.json")
    }

    /// Persist atomically.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure.
    pub fn save(&self, workspace_root: &Path) -> Result<()> {
        atomic_write_json(&Self::path(workspace_root), self)
    }

    /// Load the pending merge for `workspace_root`, if any.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] if the file exists but isn't valid
    /// JSON.
    pub fn load(workspace_root: &Path) -> Result<Option<Self>> {
        match fs::read(Self::path(workspace_root)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| FstError::Storage(std::io::Error::other(e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FstError::Storage(e)),
        }
    }

    /// Clear any pending merge for `workspace_root`. Not an error if there
    /// was none.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure other than not-found.
    pub fn clear(workspace_root: &Path) -> Result<()> {
        match fs::remove_file(Self::path(workspace_root)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FstError::Storage(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkspaceInfo / registry — project-level `.fst/workspaces/<id>.json`
// ---------------------------------------------------------------------------

/// Project-level record of one workspace: its identity, path, and head
/// pointers. One entry per workspace-id lives in the
/// project's registry; the workspace's own `.fst/config.json` is the
/// authoritative copy the workspace directory carries with it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    /// Stable opaque workspace identifier.
    pub workspace_id: String,
    /// Human-readable, renameable workspace name.
    pub workspace_name: String,
    /// Absolute path to the workspace's working-tree root.
    pub path: PathBuf,
    /// Current head snapshot.
    pub current_snapshot_id: Option<SnapshotId>,
    /// Fork-point snapshot.
    pub base_snapshot_id: Option<SnapshotId>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Per-project map of workspace-id to [`WorkspaceInfo`], persisted as one
/// JSON file per ID under `<project>/.fst/workspaces/`.
#[derive(Clone, Debug)]
pub struct WorkspaceRegistry {
    root: PathBuf,
}

impl WorkspaceRegistry {
    /// Open (or prepare to create) a registry rooted at
    /// `<project>/.fst/workspaces`.
    #[must_use]
    pub fn new(workspaces_dir: PathBuf) -> Self {
        Self { root: workspaces_dir }
    }

    fn path_for(&self, workspace_id: &str) -> PathBuf {
        self.root.join(format!("{workspace_id}.json"))
    }

    /// Persist (insert or update) a workspace's info.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure.
    pub fn put(&self, info: &WorkspaceInfo) -> Result<()> {
        atomic_write_json(&self.path_for(&info.workspace_id), info)
    }

    /// Look up a workspace by its opaque ID.
    ///
    /// # Errors
    /// Returns [`FstError::NotFound`] if absent.
    pub fn get(&self, workspace_id: &str) -> Result<WorkspaceInfo> {
        read_json(&self.path_for(workspace_id), "workspace")
    }

    /// Find a workspace by its human-readable name.
    ///
    /// # Errors
    /// Returns [`FstError::NotFound`] if no registered workspace has that
    /// name.
    pub fn find_by_name(&self, name: &str) -> Result<WorkspaceInfo> {
        self.list()?
            .into_iter()
            .find(|w| w.workspace_name == name)
            .ok_or_else(|| FstError::NotFound {
                what: "workspace".to_owned(),
                id: name.to_owned(),
            })
    }

    /// List every registered workspace.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure.
    pub fn list(&self) -> Result<Vec<WorkspaceInfo>> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FstError::Storage(e)),
        };
        let mut out = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if entry.path().extension().is_some_and(|e| e == "json") {
                let bytes = fs::read(entry.path())?;
                if let Ok(info) = serde_json::from_slice::<WorkspaceInfo>(&bytes) {
                    out.push(info);
                }
            }
        }
        out.sort_by(|a, b| a.workspace_name.cmp(&b.workspace_name));
        Ok(out)
    }

    /// Remove a workspace's registry entry (the working tree itself is left
    /// alone; callers delete it separately if desired).
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure other than not-found.
    pub fn remove(&self, workspace_id: &str) -> Result<()> {
        match fs::remove_file(self.path_for(workspace_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FstError::Storage(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle: init / clone / open / close
// ---------------------------------------------------------------------------

/// Initialize a brand new, empty workspace at `workspace_root`, registering
/// it in `registry` under `workspace_name`.
///
/// # Errors
/// Returns [`FstError::Storage`] on I/O failure.
pub fn init(
    registry: &WorkspaceRegistry,
    project_id: &str,
    workspace_root: &Path,
    workspace_name: &crate::ids::WorkspaceName,
    created_at: String,
) -> Result<WorkspaceInfo> {
    fs::create_dir_all(workspace_root)?;
    let workspace_id = crate::ids::generate_opaque_id();
    let config = WorkspaceConfig {
        project_id: project_id.to_owned(),
        workspace_id: workspace_id.clone(),
        workspace_name: workspace_name.as_str().to_owned(),
        current_snapshot_id: None,
        base_snapshot_id: None,
        mode: WorkspaceMode::Normal,
        merge_history: BTreeMap::new(),
    };
    config.save(workspace_root)?;

    let info = WorkspaceInfo {
        workspace_id,
        workspace_name: workspace_name.as_str().to_owned(),
        path: workspace_root.to_path_buf(),
        current_snapshot_id: None,
        base_snapshot_id: None,
        created_at,
    };
    registry.put(&info)?;
    info!(workspace = %info.workspace_name, "initialized workspace");
    Ok(info)
}

/// Fork a new workspace from `source`'s current head, materializing its
/// working tree into `workspace_root`.
///
/// # Errors
/// Returns [`FstError::NotFound`] if `source`'s head snapshot is set but not
/// present in `snapshots`, or [`FstError::Storage`] on I/O failure.
pub fn clone_from(
    registry: &WorkspaceRegistry,
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    project_id: &str,
    source: &WorkspaceInfo,
    workspace_root: &Path,
    workspace_name: &crate::ids::WorkspaceName,
    created_at: String,
) -> Result<WorkspaceInfo> {
    fs::create_dir_all(workspace_root)?;
    let workspace_id = crate::ids::generate_opaque_id();

    let config = WorkspaceConfig {
        project_id: project_id.to_owned(),
        workspace_id: workspace_id.clone(),
        workspace_name: workspace_name.as_str().to_owned(),
        current_snapshot_id: source.current_snapshot_id.clone(),
        base_snapshot_id: source.current_snapshot_id.clone(),
        mode: WorkspaceMode::Normal,
        merge_history: BTreeMap::new(),
    };
    config.save(workspace_root)?;

    let info = WorkspaceInfo {
        workspace_id,
        workspace_name: workspace_name.as_str().to_owned(),
        path: workspace_root.to_path_buf(),
        current_snapshot_id: source.current_snapshot_id.clone(),
        base_snapshot_id: source.current_snapshot_id.clone(),
        created_at,
    };
    registry.put(&info)?;

    if let Some(id) = &info.current_snapshot_id {
        let head_meta = snapshots.load(id)?;
        restore_snapshot_tree(blobs, &head_meta.manifest_hash, workspace_root)?;
    }
    info!(
        workspace = %info.workspace_name,
        forked_from = %source.workspace_name,
        "cloned workspace"
    );
    Ok(info)
}

/// Write every file in the manifest at `manifest_hash` into `root`, and
/// remove any tracked file present on disk but absent from the manifest
/// (mirrors `git checkout`'s tree replacement, and the same "extraneous
/// files removed" step the Git Bridge performs on export).
///
/// # Errors
/// Returns [`FstError::Storage`] on I/O failure.
pub fn restore_snapshot_tree(
    blobs: &BlobStore,
    manifest_hash: &crate::ids::ManifestHash,
    root: &Path,
) -> Result<()> {
    let manifest = Manifest::load(blobs, manifest_hash)?;
    let ignore = IgnoreMatcher::empty();
    let current = Manifest::generate(root, &ignore, blobs)?;
    let diff = current.diff(&manifest);

    for entry in &manifest.files {
        let target = root.join(&entry.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = blobs.get(&entry.blob_hash)?;
        fs::write(&target, bytes)?;
        set_mode(&target, entry.mode)?;
    }
    for path in &diff.deleted {
        let target = root.join(path);
        let _ = fs::remove_file(target);
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Snapshot creation
// ---------------------------------------------------------------------------

/// Scan `workspace_root`'s working tree and create a new snapshot on top of
/// its current head (or on top of a pending merge's parents, if one is
/// outstanding). Advances the workspace's head and clears any consumed
/// pending merge.
///
/// # Errors
/// Propagates storage/DAG errors. Returns [`FstError::MissingParent`] if the
/// current head is set but not present in `snapshots` (a corrupt registry).
#[allow(clippy::too_many_arguments)]
pub fn snapshot_create(
    registry: &WorkspaceRegistry,
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    workspace_root: &Path,
    mut config: WorkspaceConfig,
    mut info: WorkspaceInfo,
    author: Author,
    message: Option<String>,
    agent: Option<String>,
    created_at: String,
) -> Result<SnapshotMeta> {
    let _lock = WorkspaceLock::acquire(&workspace_lock_path(workspace_root), DEFAULT_LOCK_TIMEOUT)?;

    let ignore = IgnoreMatcher::new(workspace_root);
    let manifest = Manifest::generate(workspace_root, &ignore, blobs)?;
    let manifest_hash = manifest.store(blobs)?;

    let pending = PendingMerge::load(workspace_root)?;
    let parents = match &pending {
        Some(p) => p.parents.clone(),
        None => config.current_snapshot_id.clone().into_iter().collect(),
    };

    let meta = SnapshotMeta::new(
        manifest_hash,
        parents,
        author,
        created_at,
        message,
        config.workspace_id.clone(),
        config.workspace_name.clone(),
        agent,
        manifest.file_count(),
        manifest.total_size(),
    );
    snapshots.create(&meta)?;

    if pending.is_some() {
        PendingMerge::clear(workspace_root)?;
        debug!(workspace = %info.workspace_name, "consumed pending merge parents into new snapshot");
    }

    config.current_snapshot_id = Some(meta.id.clone());
    config.save(workspace_root)?;
    info.current_snapshot_id = Some(meta.id.clone());
    registry.put(&info)?;

    info!(workspace = %info.workspace_name, snapshot = %meta.id, "created snapshot");
    Ok(meta)
}

// ---------------------------------------------------------------------------
// ConflictPolicy (spec vocabulary) and merge orchestration
// ---------------------------------------------------------------------------

/// How to resolve a path both sides changed incompatibly.
///
/// This is the caller-facing vocabulary; it's translated into a resolver
/// choice over [`crate::merge::plan_merge_with_base`]'s mechanical
/// `Fail`/`MarkAndContinue` policy rather than re-implementing conflict
/// handling here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Defer to an external [`MergeResolver`] (e.g. an AI coding agent);
    /// falls back to `Manual` per-file on resolver failure.
    Agent,
    /// Write standard three-section conflict markers for manual resolution.
    Manual,
    /// Always prefer the source side's content.
    Theirs,
    /// Always keep the target side's content.
    Ours,
}

/// Trivial resolver that always takes one side, used to implement
/// [`ConflictPolicy::Theirs`]/[`ConflictPolicy::Ours`] on top of the
/// generic merge engine instead of special-casing them in the plan loop.
struct TakeSideResolver {
    take_theirs: bool,
}

impl MergeResolver for TakeSideResolver {
    fn resolve(
        &self,
        _path: &str,
        _base: Option<&[u8]>,
        ours: &[u8],
        theirs: &[u8],
    ) -> Result<ResolveOutcome> {
        Ok(ResolveOutcome::Resolved(if self.take_theirs {
            theirs.to_vec()
        } else {
            ours.to_vec()
        }))
    }
}

/// Wraps an external [`MergeResolver`] so a failure on one path falls back
/// to `manual`'s markers for that path instead of aborting the whole merge
/// — `ConflictPolicy::Agent`'s contract ("on failure fall through to
/// Manual for that file").
struct AgentWithManualFallback<'a> {
    agent: &'a dyn MergeResolver,
    manual: &'a merge::LineResolver,
}

impl MergeResolver for AgentWithManualFallback<'_> {
    fn resolve(
        &self,
        path: &str,
        base: Option<&[u8]>,
        ours: &[u8],
        theirs: &[u8],
    ) -> Result<ResolveOutcome> {
        match self.agent.resolve(path, base, ours, theirs) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(path, error = %err, "agent resolver failed; falling back to manual markers");
                self.manual.resolve(path, base, ours, theirs)
            }
        }
    }
}

/// Outcome of [`merge_into`].
#[derive(Debug)]
pub struct MergeOutcome {
    /// The computed plan (clean or not).
    pub plan: merge::MergePlan,
    /// Snapshot the workspace tree was auto-snapshotted to before applying,
    /// for [`rollback`].
    pub pre_merge_snapshot: SnapshotId,
}

/// Merge `source`'s head into `target`'s working tree.
///
/// Resolves the merge base via merge-base inheritance
/// ([`MergeRecord`]) when `target` has previously merged from `source`,
/// falling back to the DAG-derived lowest common ancestor otherwise. Writes
/// an auto-snapshot of `target`'s current tree first so [`rollback`] can
/// undo the merge, applies every non-conflicting change, and — if anything
/// was written at all — records a pending-parents list so the next
/// `snapshot_create` produces a true merge snapshot.
///
/// # Errors
/// Returns [`FstError::NotFound`] if either head is missing, or propagates
/// DAG/resolver/storage errors.
#[allow(clippy::too_many_arguments)]
pub fn merge_into(
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    target_root: &Path,
    mut target_config: WorkspaceConfig,
    source: &WorkspaceInfo,
    policy: ConflictPolicy,
    agent_resolver: Option<&dyn MergeResolver>,
    author: Author,
    created_at: String,
) -> Result<MergeOutcome> {
    let _lock = WorkspaceLock::acquire(&workspace_lock_path(target_root), DEFAULT_LOCK_TIMEOUT)?;

    let target_head = target_config.current_snapshot_id.clone().ok_or_else(|| {
        FstError::InvalidInput {
            detail: "target workspace has no snapshots to merge into yet".to_owned(),
        }
    })?;
    let source_head = source.current_snapshot_id.clone().ok_or_else(|| FstError::InvalidInput {
        detail: "source workspace has no snapshots to merge from".to_owned(),
    })?;

    let base_ids = match target_config.merge_history.get(&source.workspace_id) {
        Some(record) => {
            debug!(
                source = %source.workspace_name,
                base = %record.last_merged_snapshot,
                "using inherited merge base"
            );
            vec![record.last_merged_snapshot.clone()]
        }
        None => {
            let computed = dag::merge_base(snapshots, &target_head, &source_head)?;
            if computed.is_empty() {
                warn!(
                    target = %target_head,
                    source = %source_head,
                    "no common ancestor; merging against an empty base"
                );
            }
            computed
        }
    };

    // Bring the source's own merge history forward transitively: if source
    // previously merged from some C, target should prefer that recorded base
    // over the DAG LCA on a later direct merge from C too, rather than
    // reapplying content C and source already reconciled. Source's own
    // record for target itself is skipped to avoid resurrecting a stale
    // self-referential base.
    if let Ok(source_config) = WorkspaceConfig::load(&source.path) {
        for (source_id, record) in source_config.merge_history {
            if source_id == target_config.workspace_id {
                continue;
            }
            let should_insert = match target_config.merge_history.get(&source_id) {
                Some(existing) => existing.merged_at < record.merged_at,
                None => true,
            };
            if should_insert {
                target_config.merge_history.insert(source_id, record);
            }
        }
    }

    let theirs_resolver = TakeSideResolver { take_theirs: true };
    let ours_resolver = TakeSideResolver { take_theirs: false };
    let line_resolver = merge::LineResolver::new(
        format!("CURRENT ({})", target_config.workspace_name),
        format!("SOURCE ({})", source.workspace_name),
    );
    let agent_fallback = agent_resolver.map(|agent| AgentWithManualFallback {
        agent,
        manual: &line_resolver,
    });
    let resolver: &dyn MergeResolver = match policy {
        ConflictPolicy::Theirs => &theirs_resolver,
        ConflictPolicy::Ours => &ours_resolver,
        ConflictPolicy::Agent => match &agent_fallback {
            Some(fallback) => fallback,
            None => &line_resolver,
        },
        ConflictPolicy::Manual => &line_resolver,
    };

    let plan = merge::plan_merge_with_base(
        snapshots,
        blobs,
        resolver,
        merge::ConflictPolicy::MarkAndContinue,
        &target_head,
        &source_head,
        base_ids,
    )?;

    let ignore = IgnoreMatcher::new(target_root);
    let pre_merge_manifest = Manifest::generate(target_root, &ignore, blobs)?;
    let pre_merge_manifest_hash = pre_merge_manifest.store(blobs)?;
    let pre_merge_snapshot = SnapshotMeta::new(
        pre_merge_manifest_hash,
        vec![target_head.clone()],
        author.clone(),
        created_at.clone(),
        Some("auto-snapshot before merge".to_owned()),
        target_config.workspace_id.clone(),
        target_config.workspace_name.clone(),
        None,
        pre_merge_manifest.file_count(),
        pre_merge_manifest.total_size(),
    );
    snapshots.create(&pre_merge_snapshot)?;

    merge::apply_to_working_tree(target_root, blobs, &plan)?;

    if !plan.entries.is_empty() {
        let pending = PendingMerge {
            parents: {
                let mut p = vec![target_head.clone(), source_head.clone()];
                p.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                p.dedup();
                p
            },
            pre_merge_snapshot: pre_merge_snapshot.id.clone(),
            conflicts: plan.conflicts.clone(),
        };
        pending.save(target_root)?;
    }

    target_config.merge_history.insert(
        source.workspace_id.clone(),
        MergeRecord {
            last_merged_snapshot: source_head,
            merged_at: created_at,
        },
    );
    target_config.save(target_root)?;

    info!(
        conflicts = plan.conflicts.len(),
        clean = plan.is_clean(),
        "merge applied"
    );
    Ok(MergeOutcome {
        plan,
        pre_merge_snapshot: pre_merge_snapshot.id,
    })
}

/// Undo a merge by restoring `target_root`'s tree to `pre_merge_snapshot`
/// byte-for-byte and clearing any pending merge.
///
/// # Errors
/// Returns [`FstError::NotFound`] if `pre_merge_snapshot` is missing, or
/// propagates storage errors.
pub fn rollback(
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    target_root: &Path,
    pre_merge_snapshot: &SnapshotId,
) -> Result<()> {
    let _lock = WorkspaceLock::acquire(&workspace_lock_path(target_root), DEFAULT_LOCK_TIMEOUT)?;

    let meta = snapshots.load(pre_merge_snapshot)?;
    restore_snapshot_tree(blobs, &meta.manifest_hash, target_root)?;
    PendingMerge::clear(target_root)?;
    info!(snapshot = %pre_merge_snapshot, "rolled back to pre-merge snapshot");
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON persistence helpers
// ---------------------------------------------------------------------------

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| FstError::Storage(std::io::Error::other(e)))?;
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

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, what: &str) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FstError::NotFound {
                what: what.to_owned(),
                id: path.display().to_string(),
            }
        } else {
            FstError::Storage(e)
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|e| FstError::Storage(std::io::Error::other(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author {
            name: "T".to_owned(),
            email: "t@example.com".to_owned(),
        }
    }

    struct Env {
        _dir: tempfile::TempDir,
        project_root: PathBuf,
        blobs: BlobStore,
        snapshots: SnapshotStore,
        registry: WorkspaceRegistry,
    }

    fn env() -> Env {
        let dir = tempfile::tempdir().unwrap();
        let project_root = dir.path().to_path_buf();
        let blobs = BlobStore::new(project_root.join(".fst/blobs"));
        let snapshots = SnapshotStore::new(project_root.join(".fst/snapshots"));
        let registry = WorkspaceRegistry::new(project_root.join(".fst/workspaces"));
        Env {
            _dir: dir,
            project_root,
            blobs,
            snapshots,
            registry,
        }
    }

    #[test]
    fn init_creates_empty_workspace_with_no_head() {
        let env = env();
        let ws_root = env.project_root.join("ws-a");
        let name = crate::ids::WorkspaceName::new("ws-a").unwrap();
        let info = init(&env.registry, "proj1", &ws_root, &name, "t0".to_owned()).unwrap();
        assert!(info.current_snapshot_id.is_none());
        assert_eq!(env.registry.get(&info.workspace_id).unwrap(), info);
    }

    #[test]
    fn snapshot_create_scenario_one_file_counts_match_spec() {
        let env = env();
        let ws_root = env.project_root.join("ws-a");
        let name = crate::ids::WorkspaceName::new("ws-a").unwrap();
        let info = init(&env.registry, "proj1", &ws_root, &name, "t0".to_owned()).unwrap();
        let config = WorkspaceConfig::load(&ws_root).unwrap();

        fs::create_dir_all(&ws_root).unwrap();
        fs::write(ws_root.join("a.txt"), b"hello\n").unwrap();

        let meta = snapshot_create(
            &env.registry,
            &env.snapshots,
            &env.blobs,
            &ws_root,
            config,
            info,
            author(),
            None,
            None,
            "t1".to_owned(),
        )
        .unwrap();

        assert_eq!(meta.files, 1);
        assert_eq!(meta.size, 6);
        let manifest = Manifest::load(&env.blobs, &meta.manifest_hash).unwrap();
        assert_eq!(manifest.file_count(), 1);
        assert_eq!(manifest.total_size(), 6);
        assert_eq!(meta.id.as_str().len(), 64);
        assert!(meta.verify_integrity());

        let expected_hash = crate::ids::BlobHash::from_digest(
            &{
                use sha2::{Digest, Sha256};
                Sha256::digest(b"hello\n").into()
            },
        );
        assert!(env.blobs.exists(&expected_hash));
    }

    #[test]
    fn merge_into_clean_merge_produces_pending_parents() {
        let env = env();

        let ws_a_root = env.project_root.join("ws-a");
        let name_a = crate::ids::WorkspaceName::new("ws-a").unwrap();
        let info_a = init(&env.registry, "proj1", &ws_a_root, &name_a, "t0".to_owned()).unwrap();
        let config_a = WorkspaceConfig::load(&ws_a_root).unwrap();
        fs::write(ws_a_root.join("a.txt"), b"hello\n").unwrap();
        let s1 = snapshot_create(
            &env.registry, &env.snapshots, &env.blobs, &ws_a_root, config_a, info_a,
            author(), None, None, "t1".to_owned(),
        ).unwrap();

        let ws_b_root = env.project_root.join("ws-b");
        let name_b = crate::ids::WorkspaceName::new("ws-b").unwrap();
        let mut info_b = init(&env.registry, "proj1", &ws_b_root, &name_b, "t1".to_owned()).unwrap();
        info_b.current_snapshot_id = Some(s1.id.clone());
        env.registry.put(&info_b).unwrap();
        let mut config_b = WorkspaceConfig::load(&ws_b_root).unwrap();
        config_b.current_snapshot_id = Some(s1.id.clone());
        config_b.base_snapshot_id = Some(s1.id.clone());
        config_b.save(&ws_b_root).unwrap();
        fs::write(ws_a_root.join("a.txt"), b"world\n").unwrap();

        fs::write(ws_b_root.join("b.txt"), b"new\n").unwrap();
        let info_a_reload = env.registry.find_by_name("ws-a").unwrap();
        let config_a_reload = WorkspaceConfig::load(&ws_a_root).unwrap();
        let mut config_a_for_a = config_a_reload.clone();
        config_a_for_a.current_snapshot_id = Some(s1.id.clone());
        let s2a = snapshot_create(
            &env.registry, &env.snapshots, &env.blobs, &ws_a_root,
            config_a_for_a, info_a_reload,
            author(), None, None, "t2".to_owned(),
        ).unwrap();

        let s3 = snapshot_create(
            &env.registry, &env.snapshots, &env.blobs, &ws_b_root,
            config_b, env.registry.get(&info_b.workspace_id).unwrap(),
            author(), None, None, "t3".to_owned(),
        ).unwrap();

        let info_b_final = env.registry.find_by_name("ws-b").unwrap();
        let config_a_final = WorkspaceConfig::load(&ws_a_root).unwrap();
        let outcome = merge_into(
            &env.snapshots,
            &env.blobs,
            &ws_a_root,
            config_a_final,
            &info_b_final,
            ConflictPolicy::Manual,
            None,
            author(),
            "t4".to_owned(),
        )
        .unwrap();

        assert!(outcome.plan.is_clean());
        assert_eq!(fs::read(ws_a_root.join("a.txt")).unwrap(), b"world\n");
        assert_eq!(fs::read(ws_a_root.join("b.txt")).unwrap(), b"new\n");

        let pending = PendingMerge::load(&ws_a_root).unwrap().unwrap();
        let mut expected = vec![s2a.id.clone(), s3.id.clone()];
        expected.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(pending.parents, expected);
    }

    #[test]
    fn snapshot_create_fails_with_lock_busy_while_another_holder_has_the_lock() {
        let env = env();
        let ws_root = env.project_root.join("ws-a");
        let name = crate::ids::WorkspaceName::new("ws-a").unwrap();
        let info = init(&env.registry, "proj1", &ws_root, &name, "t0".to_owned()).unwrap();
        let config = WorkspaceConfig::load(&ws_root).unwrap();
        fs::write(ws_root.join("a.txt"), b"hello\n").unwrap();

        let _held = crate::lock::WorkspaceLock::acquire(
            &workspace_lock_path(&ws_root),
            std::time::Duration::from_millis(50),
        )
        .unwrap();

        let err = snapshot_create(
            &env.registry,
            &env.snapshots,
            &env.blobs,
            &ws_root,
            config,
            info,
            author(),
            None,
            None,
            "t1".to_owned(),
        )
        .unwrap_err();
        assert!(matches!(err, FstError::LockBusy { .. }));
    }

    #[test]
    fn agent_policy_falls_back_to_manual_markers_when_resolver_fails() {
        struct AlwaysFailResolver;
        impl MergeResolver for AlwaysFailResolver {
            fn resolve(
                &self,
                path: &str,
                _base: Option<&[u8]>,
                _ours: &[u8],
                _theirs: &[u8],
            ) -> Result<ResolveOutcome> {
                Err(FstError::ResolverFailed {
                    path: PathBuf::from(path),
                    detail: "simulated agent failure".to_owned(),
                })
            }
        }

        let env = env();

        let ws_a_root = env.project_root.join("ws-a");
        let name_a = crate::ids::WorkspaceName::new("ws-a").unwrap();
        let info_a = init(&env.registry, "proj1", &ws_a_root, &name_a, "t0".to_owned()).unwrap();
        let config_a = WorkspaceConfig::load(&ws_a_root).unwrap();
        fs::write(ws_a_root.join("a.txt"), b"shared\n").unwrap();
        let s1 = snapshot_create(
            &env.registry, &env.snapshots, &env.blobs, &ws_a_root, config_a, info_a,
            author(), None, None, "t1".to_owned(),
        ).unwrap();

        let ws_b_root = env.project_root.join("ws-b");
        let name_b = crate::ids::WorkspaceName::new("ws-b").unwrap();
        let mut info_b = init(&env.registry, "proj1", &ws_b_root, &name_b, "t1".to_owned()).unwrap();
        info_b.current_snapshot_id = Some(s1.id.clone());
        env.registry.put(&info_b).unwrap();
        let mut config_b = WorkspaceConfig::load(&ws_b_root).unwrap();
        config_b.current_snapshot_id = Some(s1.id.clone());
        config_b.base_snapshot_id = Some(s1.id.clone());
        config_b.save(&ws_b_root).unwrap();
        fs::write(ws_b_root.join("a.txt"), b"theirs-version\n").unwrap();
        let _s2b = snapshot_create(
            &env.registry, &env.snapshots, &env.blobs, &ws_b_root,
            config_b, env.registry.get(&info_b.workspace_id).unwrap(),
            author(), None, None, "t2".to_owned(),
        ).unwrap();

        fs::write(ws_a_root.join("a.txt"), b"ours-version\n").unwrap();
        let info_a_reload = env.registry.find_by_name("ws-a").unwrap();
        let mut config_a_for_a = WorkspaceConfig::load(&ws_a_root).unwrap();
        config_a_for_a.current_snapshot_id = Some(s1.id.clone());
        let _s2a = snapshot_create(
            &env.registry, &env.snapshots, &env.blobs, &ws_a_root,
            config_a_for_a, info_a_reload,
            author(), None, None, "t3".to_owned(),
        ).unwrap();

        let info_b_final = env.registry.find_by_name("ws-b").unwrap();
        let config_a_final = WorkspaceConfig::load(&ws_a_root).unwrap();
        let outcome = merge_into(
            &env.snapshots,
            &env.blobs,
            &ws_a_root,
            config_a_final,
            &info_b_final,
            ConflictPolicy::Agent,
            Some(&AlwaysFailResolver),
            author(),
            "t4".to_owned(),
        )
        .unwrap();

        assert!(!outcome.plan.is_clean());
        assert_eq!(outcome.plan.conflicts, vec!["a.txt".to_owned()]);
        let marked = fs::read_to_string(ws_a_root.join("a.txt")).unwrap();
        assert_eq!(marked.matches("<<<<<<<").count(), 1);
        assert!(marked.contains("ours-version"));
        assert!(marked.contains("theirs-version"));
    }

    #[test]
    fn merge_history_is_inherited_transitively_through_an_intermediate_workspace() {
        let env = env();

        let ws_a_root = env.project_root.join("ws-a");
        let name_a = crate::ids::WorkspaceName::new("ws-a").unwrap();
        let info_a = init(&env.registry, "proj1", &ws_a_root, &name_a, "t0".to_owned()).unwrap();
        let config_a = WorkspaceConfig::load(&ws_a_root).unwrap();
        fs::write(ws_a_root.join("shared.txt"), b"hello\n").unwrap();
        let s1 = snapshot_create(
            &env.registry, &env.snapshots, &env.blobs, &ws_a_root, config_a, info_a,
            author(), None, None, "t1".to_owned(),
        ).unwrap();

        let ws_b_root = env.project_root.join("ws-b");
        let name_b = crate::ids::WorkspaceName::new("ws-b").unwrap();
        let mut info_b = init(&env.registry, "proj1", &ws_b_root, &name_b, "t1".to_owned()).unwrap();
        info_b.current_snapshot_id = Some(s1.id.clone());
        env.registry.put(&info_b).unwrap();
        let mut config_b = WorkspaceConfig::load(&ws_b_root).unwrap();
        config_b.current_snapshot_id = Some(s1.id.clone());
        config_b.base_snapshot_id = Some(s1.id.clone());
        config_b.save(&ws_b_root).unwrap();

        let ws_c_root = env.project_root.join("ws-c");
        let name_c = crate::ids::WorkspaceName::new("ws-c").unwrap();
        let mut info_c = init(&env.registry, "proj1", &ws_c_root, &name_c, "t1".to_owned()).unwrap();
        info_c.current_snapshot_id = Some(s1.id.clone());
        env.registry.put(&info_c).unwrap();
        let mut config_c = WorkspaceConfig::load(&ws_c_root).unwrap();
        config_c.current_snapshot_id = Some(s1.id.clone());
        config_c.base_snapshot_id = Some(s1.id.clone());
        config_c.save(&ws_c_root).unwrap();
        fs::write(ws_c_root.join("c.txt"), b"from c\n").unwrap();
        let s2c = snapshot_create(
            &env.registry, &env.snapshots, &env.blobs, &ws_c_root,
            config_c, env.registry.get(&info_c.workspace_id).unwrap(),
            author(), None, None, "t2".to_owned(),
        ).unwrap();

        // b merges from c first, recording c's id in b's own merge_history.
        let info_c_final = env.registry.find_by_name("ws-c").unwrap();
        merge_into(
            &env.snapshots, &env.blobs, &ws_b_root, WorkspaceConfig::load(&ws_b_root).unwrap(),
            &info_c_final, ConflictPolicy::Manual, None, author(), "t3".to_owned(),
        )
        .unwrap();
        let config_b_after_c = WorkspaceConfig::load(&ws_b_root).unwrap();
        let c_record = config_b_after_c
            .merge_history
            .get(&info_c_final.workspace_id)
            .cloned()
            .expect("b should have recorded a merge from c");
        assert_eq!(c_record.last_merged_snapshot, s2c.id);

        // a now merges from b, which should carry c's merge record forward
        // even though a never merged from c directly.
        let info_b_final = env.registry.find_by_name("ws-b").unwrap();
        merge_into(
            &env.snapshots, &env.blobs, &ws_a_root, WorkspaceConfig::load(&ws_a_root).unwrap(),
            &info_b_final, ConflictPolicy::Manual, None, author(), "t4".to_owned(),
        )
        .unwrap();
        let config_a_after = WorkspaceConfig::load(&ws_a_root).unwrap();
        let inherited = config_a_after
            .merge_history
            .get(&info_c_final.workspace_id)
            .expect("a should have inherited b's merge record for c transitively");
        assert_eq!(inherited.last_merged_snapshot, c_record.last_merged_snapshot);
    }
}
