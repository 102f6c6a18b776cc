//! Git Bridge: translates the snapshot DAG to and from a Git commit DAG.
//!
//! This module owns no subprocess logic of its own — it composes the
//! generic plumbing in [`fst_git`] (tree/commit writing, refs, revwalk,
//! push) with this crate's own snapshot, manifest, and blob types. Rather
//! than literally checking files out into a temporary worktree and running
//! `git add -A`, export builds trees directly from manifest entries via
//! `fst_git::build_tree`: the manifest already names every blob by hash, so
//! walking a checked-out directory would just reproduce information
//! already on hand. The resulting tree objects are byte-identical to what
//! a literal checkout would produce.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::blob::BlobStore;
use crate::cancel::CancelToken;
use crate::dag;
use crate::error::{FstError, Result};
use crate::ids::SnapshotId;
use crate::manifest::{FileEntry, Manifest};
use crate::project::{GitMapping, Project};
use crate::snapshot::{Author, SnapshotMeta, SnapshotStore};
use crate::workspace::WorkspaceRegistry;

use fst_git::{CommitIdentity, FileObject, GitContext};

/// Suffix appended to an agent slug to form its commit email.
const AGENT_EMAIL_SUFFIX: &str = "@fastest.local";

/// Path, within the `refs/fst/meta` tree, of the export descriptor.
const META_BLOB_PATH: &str = ".fst-export/meta.json";

/// Name of the side ref export updates on every run.
const META_REF: &str = "refs/fst/meta";

/// On-disk schema written to `.fst-export/meta.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportMeta {
    /// Schema version, currently always `1`.
    pub version: u32,
    /// The exporting project's ID.
    pub project_id: String,
    /// RFC 3339 timestamp of this export run.
    pub updated_at: String,
    /// `workspace_id -> { workspace_name, branch }`.
    pub workspaces: BTreeMap<String, ExportedWorkspace>,
}

/// One workspace's entry in [`ExportMeta`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportedWorkspace {
    /// The workspace's human-readable name at export time.
    pub workspace_name: String,
    /// The branch it was exported to (always equal to `workspace_name`).
    pub branch: String,
}

/// Outcome of exporting one workspace's branch.
#[derive(Clone, Debug)]
pub struct BranchExport {
    /// The workspace that was exported.
    pub workspace_name: String,
    /// The branch's new tip commit SHA.
    pub tip_sha: String,
    /// Number of new commits created this run.
    pub new_commits: usize,
}

/// Full result of a `git_export` run.
#[derive(Clone, Debug, Default)]
pub struct ExportReport {
    /// One entry per exported workspace, in workspace-name order.
    pub branches: Vec<BranchExport>,
}

fn open_or_init_repo(project_root: &Path, timeout: Duration) -> Result<GitContext> {
    Ok(GitContext::ensure_bare(project_root.join(".git"), timeout)?)
}

fn file_mode_str(mode: u32) -> &'static str {
    if mode & 0o111 != 0 {
        "100755"
    } else {
        "100644"
    }
}

fn git_mode_to_posix(mode: &str) -> u32 {
    if mode == "100755" {
        0o755
    } else {
        0o644
    }
}

/// Normalize an agent name into the `[a-z0-9]+(-[a-z0-9]+)*` slug required
/// for the `<agent-slug>@fastest.local` commit email.
#[must_use]
pub fn slugify_agent(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn rfc3339_to_git_date(timestamp: &str) -> Result<String> {
    let parsed = DateTime::parse_from_rfc3339(timestamp).map_err(|e| FstError::InvalidInput {
        detail: format!("invalid RFC3339 timestamp {timestamp:?}: {e}"),
    })?;
    let epoch = parsed.timestamp();
    let offset_secs = parsed.offset().local_minus_utc();
    let sign = if offset_secs < 0 { '-' } else { '+' };
    let abs = offset_secs.unsigned_abs();
    let hours = abs / 3600;
    let minutes = (abs % 3600) / 60;
    Ok(format!("{epoch} {sign}{hours:02}{minutes:02}"))
}

fn git_date_to_rfc3339(git_date: &str) -> Result<String> {
    let epoch: i64 = git_date
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FstError::InvalidInput {
            detail: format!("malformed git author date {git_date:?}"),
        })?;
    let dt = Utc.timestamp_opt(epoch, 0).single().ok_or_else(|| FstError::InvalidInput {
        detail: format!("out-of-range git author date {git_date:?}"),
    })?;
    Ok(dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

fn commit_identity(author: &Author, agent: Option<&str>, created_at: &str) -> Result<CommitIdentity> {
    let email = match agent {
        Some(agent) => format!("{}{AGENT_EMAIL_SUFFIX}", slugify_agent(agent)),
        None => author.email.clone(),
    };
    Ok(CommitIdentity {
        name: author.name.clone(),
        email,
        git_date: rfc3339_to_git_date(created_at)?,
    })
}

/// Export every workspace's reachable history into Git commits under
/// `<project_root>/.git`, and update the `refs/fst/meta` side ref.
///
/// Idempotent: a snapshot already present in `git_map` produces no new
/// commit. `rebuild` discards the existing mapping and branch refs first,
/// re-translating every snapshot from scratch.
///
/// # Errors
/// Returns [`FstError::GitFailure`] if a `git` subprocess fails, or
/// [`FstError::Storage`] on I/O failure reading blobs/manifests.
pub fn export(
    project_root: &Path,
    project: &Project,
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    registry: &WorkspaceRegistry,
    rebuild: bool,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<ExportReport> {
    let ctx = open_or_init_repo(project_root, timeout)?;

    let map_path = Project::git_map_path(project_root);
    let mut mapping = if rebuild {
        GitMapping::new(".git".to_owned())
    } else {
        GitMapping::load_or_default(&map_path, ".git")?
    };

    let mut workspaces = registry.list()?;
    workspaces.sort_by(|a, b| a.workspace_name.cmp(&b.workspace_name));

    let mut report = ExportReport::default();
    let mut meta_workspaces = BTreeMap::new();

    for workspace in &workspaces {
        let Some(head) = &workspace.current_snapshot_id else {
            continue;
        };

        if rebuild {
            fst_git::delete_ref(&ctx, &format!("refs/heads/{}", workspace.workspace_name), timeout)?;
        }

        let reachable = dag::collect_reachable(snapshots, head)?;
        let order = dag::topo_sort(snapshots, &reachable)?;

        let mut new_commits = 0usize;
        for id in &order {
            cancel.check()?;
            if mapping.sha_for(id).is_some() {
                continue;
            }
            let Ok(meta) = snapshots.load(id) else {
                // Unreachable/phantom parent placeholder; nothing to export.
                continue;
            };

            let manifest = Manifest::load(blobs, &meta.manifest_hash)?;
            let files = manifest_to_file_objects(&manifest, blobs)?;
            let tree_oid = fst_git::build_tree(&ctx, &files, timeout)?;

            let parent_shas: Vec<String> = meta
                .parents
                .iter()
                .filter_map(|p| mapping.sha_for(p).map(str::to_owned))
                .collect();

            let identity = commit_identity(&meta.author, meta.agent.as_deref(), &meta.created_at)?;
            let message = meta.message.clone().unwrap_or_default();
            let commit_oid = fst_git::commit_tree(&ctx, &tree_oid, &parent_shas, &identity, &message, timeout)?;

            mapping.record(id.clone(), commit_oid);
            new_commits += 1;
        }

        let Some(tip_sha) = mapping.sha_for(head).map(str::to_owned) else {
            continue;
        };
        let branch_ref = format!("refs/heads/{}", workspace.workspace_name);
        fst_git::update_ref(&ctx, &branch_ref, &tip_sha, "fst export", timeout)?;

        info!(workspace = %workspace.workspace_name, commits = new_commits, "exported workspace");
        meta_workspaces.insert(
            workspace.workspace_id.clone(),
            ExportedWorkspace {
                workspace_name: workspace.workspace_name.clone(),
                branch: workspace.workspace_name.clone(),
            },
        );
        report.branches.push(BranchExport {
            workspace_name: workspace.workspace_name.clone(),
            tip_sha,
            new_commits,
        });
    }

    mapping.save(&map_path)?;
    write_meta_ref(&ctx, project, &meta_workspaces, timeout)?;

    Ok(report)
}

fn manifest_to_file_objects(manifest: &Manifest, blobs: &BlobStore) -> Result<Vec<FileObject>> {
    let mut files = Vec::with_capacity(manifest.files.len());
    for entry in &manifest.files {
        let content = blobs.get(&entry.blob_hash)?;
        files.push(FileObject {
            path: entry.path.clone(),
            mode: file_mode_str(entry.mode),
            content,
        });
    }
    Ok(files)
}

fn write_meta_ref(
    ctx: &GitContext,
    project: &Project,
    workspaces: &BTreeMap<String, ExportedWorkspace>,
    timeout: Duration,
) -> Result<()> {
    let previous_meta_commit = fst_git::read_ref(ctx, META_REF, timeout)?;
    let updated_at = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let meta = ExportMeta {
        version: 1,
        project_id: project.project_id.clone(),
        updated_at: updated_at.clone(),
        workspaces: workspaces.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&meta).map_err(|e| FstError::Storage(std::io::Error::other(e)))?;

    let files = vec![FileObject {
        path: META_BLOB_PATH.to_owned(),
        mode: "100644",
        content: bytes,
    }];
    let tree_oid = fst_git::build_tree(ctx, &files, timeout)?;

    let parents: Vec<String> = previous_meta_commit.into_iter().collect();
    let identity = CommitIdentity {
        name: "fst".to_owned(),
        email: "fst@fastest.local".to_owned(),
        git_date: rfc3339_to_git_date(&updated_at)?,
    };
    let commit_oid = fst_git::commit_tree(ctx, &tree_oid, &parents, &identity, "update fst export metadata\n", timeout)?;
    fst_git::update_ref(ctx, META_REF, &commit_oid, "fst export", timeout)?;
    Ok(())
}

/// How an incremental import reconciled one workspace's branch against its
/// local head.
#[derive(Clone, Debug)]
pub enum ImportOutcome {
    /// The local head already covers the branch tip; nothing to do.
    UpToDate,
    /// The branch tip strictly extends the local head; the workspace head
    /// may simply be advanced.
    FastForward {
        /// The snapshot the workspace head should move to.
        new_head: SnapshotId,
    },
    /// Local and remote histories diverged; the caller must merge.
    Diverged(DivergenceInfo),
}

/// Divergence between a workspace's local head and the head of an imported
/// branch.
#[derive(Clone, Debug)]
pub struct DivergenceInfo {
    /// The workspace the divergence was detected in.
    pub workspace: String,
    /// The workspace's local head before this import.
    pub local_head: SnapshotId,
    /// The (now-imported) tip of the remote branch.
    pub remote_head: SnapshotId,
    /// Lowest common ancestor(s) of `local_head` and `remote_head`.
    pub merge_base: Vec<SnapshotId>,
}

/// Per-branch result of [`import_incremental`].
#[derive(Clone, Debug)]
pub struct ImportResult {
    /// The workspace-registry ID this branch maps to.
    pub workspace_id: String,
    /// The workspace's name at export time.
    pub workspace_name: String,
    /// Snapshots newly created by this import run, oldest first.
    pub imported: Vec<SnapshotId>,
    /// How this branch reconciles against `local_heads`.
    pub outcome: ImportOutcome,
}

/// Read `refs/fst/meta` and, for every listed workspace branch, walk new
/// commits in topo order, translating each into a snapshot.
///
/// `local_heads` supplies each workspace's current local head by
/// workspace ID, if a local workspace for it exists; workspaces with no
/// entry are treated as freshly imported (never a divergence, always a
/// fast-forward onto the imported tip).
///
/// # Errors
/// Returns [`FstError::NotFound`] if `refs/fst/meta` does not exist, or
/// [`FstError::GitFailure`] / [`FstError::Storage`] on subprocess or I/O
/// failure.
pub fn import_incremental(
    project_root: &Path,
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    local_heads: &BTreeMap<String, Option<SnapshotId>>,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Vec<ImportResult>> {
    let ctx = open_or_init_repo(project_root, timeout)?;

    let meta_commit = fst_git::read_ref(&ctx, META_REF, timeout)?.ok_or_else(|| FstError::NotFound {
        what: "git export metadata".to_owned(),
        id: META_REF.to_owned(),
    })?;
    let meta = read_export_meta(&ctx, &meta_commit, timeout)?;

    let map_path = Project::git_map_path(project_root);
    let mut mapping = GitMapping::load_or_default(&map_path, ".git")?;

    let mut results = Vec::new();
    for (workspace_id, entry) in &meta.workspaces {
        cancel.check()?;
        let branch_ref = format!("refs/heads/{}", entry.branch);
        let Some(remote_tip_sha) = fst_git::read_ref(&ctx, &branch_ref, timeout)? else {
            warn!(branch = %entry.branch, "branch listed in export metadata has no ref; skipping");
            continue;
        };

        let commit_oids = fst_git::rev_list_topo(&ctx, &remote_tip_sha, timeout)?;
        let mut imported = Vec::new();
        for oid in &commit_oids {
            cancel.check()?;
            if mapping.snapshot_for_sha(oid).is_some() {
                continue;
            }
            let snapshot_id = import_one_commit(&ctx, snapshots, blobs, &mut mapping, oid, workspace_id, &entry.workspace_name, timeout)?;
            imported.push(snapshot_id);
        }

        let remote_head = mapping
            .snapshot_for_sha(&remote_tip_sha)
            .cloned()
            .expect("branch tip was just imported or already mapped");

        let local_head = local_heads.get(workspace_id).cloned().flatten();
        let outcome = match local_head {
            None => ImportOutcome::FastForward { new_head: remote_head.clone() },
            Some(local) if local == remote_head => ImportOutcome::UpToDate,
            Some(local) if dag::is_ancestor(snapshots, &remote_head, &local)? => ImportOutcome::UpToDate,
            Some(local) if dag::is_ancestor(snapshots, &local, &remote_head)? => {
                ImportOutcome::FastForward { new_head: remote_head.clone() }
            }
            Some(local) => {
                let merge_base = dag::merge_base(snapshots, &local, &remote_head)?;
                ImportOutcome::Diverged(DivergenceInfo {
                    workspace: entry.workspace_name.clone(),
                    local_head: local,
                    remote_head: remote_head.clone(),
                    merge_base,
                })
            }
        };

        results.push(ImportResult {
            workspace_id: workspace_id.clone(),
            workspace_name: entry.workspace_name.clone(),
            imported,
            outcome,
        });
    }

    mapping.save(&map_path)?;
    Ok(results)
}

fn read_export_meta(ctx: &GitContext, meta_commit: &str, timeout: Duration) -> Result<ExportMeta> {
    let info = fst_git::read_commit(ctx, meta_commit, timeout)?;
    let entries = fst_git::read_tree_recursive(ctx, &info.tree, timeout)?;
    let (_, blob_oid) = entries
        .into_iter()
        .find(|(path, _)| path == META_BLOB_PATH)
        .ok_or_else(|| FstError::NotFound {
            what: "export metadata blob".to_owned(),
            id: META_BLOB_PATH.to_owned(),
        })?;
    let bytes = fst_git::read_blob(ctx, &blob_oid, timeout)?;
    serde_json::from_slice(&bytes).map_err(|e| FstError::Storage(std::io::Error::other(e)))
}

#[allow(clippy::too_many_arguments)]
fn import_one_commit(
    ctx: &GitContext,
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    mapping: &mut GitMapping,
    commit_oid: &str,
    workspace_id: &str,
    workspace_name: &str,
    timeout: Duration,
) -> Result<SnapshotId> {
    let info = fst_git::read_commit(ctx, commit_oid, timeout)?;
    let tree_entries = fst_git::read_tree_mode_recursive(ctx, &info.tree, timeout)?;

    let mut entries = Vec::with_capacity(tree_entries.len());
    for (path, mode, blob_oid) in tree_entries {
        let content = fst_git::read_blob(ctx, &blob_oid, timeout)?;
        let blob_hash = blobs.put(&content)?;
        entries.push(FileEntry {
            path,
            blob_hash,
            size: content.len() as u64,
            mode: git_mode_to_posix(&mode),
        });
    }
    let manifest = Manifest::from_entries(entries);
    let manifest_hash = manifest.store(blobs)?;

    let parents: Vec<SnapshotId> = info
        .parents
        .iter()
        .filter_map(|p| mapping.snapshot_for_sha(p).cloned())
        .collect();

    let author = Author {
        name: info.author_name.clone(),
        email: info.author_email.clone(),
    };
    let agent = info
        .author_email
        .strip_suffix(AGENT_EMAIL_SUFFIX)
        .map(|_| info.author_name.clone());
    let message = info.message.lines().next().map(str::to_owned);
    let created_at = git_date_to_rfc3339(&info.author_date)?;

    let meta = SnapshotMeta::new(
        manifest_hash,
        parents,
        author,
        created_at,
        message,
        workspace_id.to_owned(),
        workspace_name.to_owned(),
        agent,
        manifest.file_count(),
        manifest.total_size(),
    );
    snapshots.create(&meta)?;
    mapping.record(meta.id.clone(), commit_oid.to_owned());
    Ok(meta.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_agent_normalizes_to_dashed_lowercase() {
        assert_eq!(slugify_agent("Review Bot"), "review-bot");
        assert_eq!(slugify_agent("GPT-4.1"), "gpt-4-1");
        assert_eq!(slugify_agent("  spaced  out  "), "spaced-out");
    }

    #[test]
    fn rfc3339_git_date_roundtrip_preserves_instant() {
        let original = "2026-01-15T10:30:00Z";
        let git_date = rfc3339_to_git_date(original).unwrap();
        let back = git_date_to_rfc3339(&git_date).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn file_mode_str_detects_executable_bit() {
        assert_eq!(file_mode_str(0o644), "100644");
        assert_eq!(file_mode_str(0o755), "100755");
    }

    #[test]
    fn git_mode_to_posix_roundtrips_through_file_mode_str() {
        assert_eq!(git_mode_to_posix(file_mode_str(0o755)), 0o755);
        assert_eq!(git_mode_to_posix(file_mode_str(0o644)), 0o644);
    }
}
