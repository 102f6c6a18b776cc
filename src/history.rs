//! History rewriting primitives: edit, drop, squash, rebase.
//!
//! Every rewrite produces fresh content-addressed snapshots rather than
//! mutating existing ones — a snapshot's ID is derived from its content and
//! parentage, so changing either necessarily yields a new ID. Rewriting a
//! snapshot in the middle of a chain therefore requires re-deriving every
//! descendant on top of the new ancestor, the same way `git rebase`
//! replays commits one at a time.

use std::collections::{HashMap, HashSet};

use crate::blob::BlobStore;
use crate::dag;
use crate::drift::{self, SideChange};
use crate::error::{FstError, Result};
use crate::ids::SnapshotId;
use crate::manifest::{FileEntry, Manifest};
use crate::snapshot::{Author, SnapshotMeta, SnapshotStore};

/// Maps original snapshot IDs to their rewritten replacements, accumulated
/// as a rewrite walks forward through a chain of descendants.
#[derive(Clone, Debug, Default)]
pub struct RewriteMap {
    replacements: HashMap<SnapshotId, SnapshotId>,
}

impl RewriteMap {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `original` has been replaced by `rewritten`.
    pub fn record(&mut self, original: SnapshotId, rewritten: SnapshotId) {
        self.replacements.insert(original, rewritten);
    }

    /// Resolve `id` through the map, following chains, or return `id`
    /// itself if it was never rewritten.
    #[must_use]
    pub fn resolve(&self, id: &SnapshotId) -> SnapshotId {
        let mut current = id.clone();
        let mut seen = HashSet::new();
        while let Some(next) = self.replacements.get(&current) {
            if !seen.insert(current.clone()) {
                break;
            }
            current = next.clone();
        }
        current
    }
}

/// Replace a snapshot's manifest and/or message in place (producing a new
/// ID, since both are hash inputs or both are not — message isn't hashed,
/// but parents are, so an edit at the root of a chain still forces every
/// descendant to be rewritten to point at the new ID).
///
/// Returns the new snapshot and every descendant snapshot transitively
/// rewritten to carry the new ancestry, replayed in topological order.
///
/// # Errors
/// Returns [`FstError::NotFound`] if `target` doesn't exist, or propagates
/// DAG/storage errors.
pub fn edit(
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    target: &SnapshotId,
    new_manifest: Option<Manifest>,
    new_message: Option<Option<String>>,
    author: Author,
    created_at_for_rewrite: impl Fn(&SnapshotId) -> String,
) -> Result<(SnapshotId, RewriteMap)> {
    let original = snapshots.load(target)?;
    let (manifest_hash, files, size) = match &new_manifest {
        Some(m) => (m.store(blobs)?, m.file_count(), m.total_size()),
        None => (original.manifest_hash.clone(), original.files, original.size),
    };
    let message = new_message.unwrap_or_else(|| original.message.clone());

    let rewritten = SnapshotMeta::new(
        manifest_hash,
        original.parents.clone(),
        author.clone(),
        created_at_for_rewrite(target),
        message,
        original.workspace_id.clone(),
        original.workspace_name.clone(),
        original.agent.clone(),
        files,
        size,
    );
    snapshots.create(&rewritten)?;

    let mut map = RewriteMap::new();
    map.record(target.clone(), rewritten.id.clone());

    let final_map = replay_descendants(snapshots, blobs, target, map, &author, &created_at_for_rewrite)?;
    Ok((final_map.resolve(target), final_map))
}

/// Remove a snapshot from history, splicing its children to its parents.
///
/// Every descendant of `target` is replayed with `target` excised from
/// their ancestry.
///
/// # Errors
/// Returns [`FstError::NotFound`] if `target` doesn't exist. Returns
/// [`FstError::InvalidInput`] if `target` does not have exactly one parent
/// (a merge snapshot or the base of the history), or propagates DAG/storage
/// errors.
pub fn drop(
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    target: &SnapshotId,
    author: &Author,
    created_at_for_rewrite: impl Fn(&SnapshotId) -> String,
) -> Result<RewriteMap> {
    let original = snapshots.load(target)?;
    if original.parents.len() != 1 {
        return Err(FstError::InvalidInput {
            detail: format!(
                "cannot drop {}: drop requires exactly one parent (found {}); merge snapshots and the base cannot be dropped",
                target.as_str(),
                original.parents.len()
            ),
        });
    }
    let mut map = RewriteMap::new();
    // Dropping means target's children should point directly at target's
    // sole parent; we don't create a replacement snapshot for target itself.
    map.record(target.clone(), original.parents[0].clone());
    replay_descendants(snapshots, blobs, target, map, author, &created_at_for_rewrite)
}

/// Combine `targets` (a contiguous run, oldest first, each the sole parent
/// of the next) into a single snapshot carrying the combined manifest
/// (equal to the last target's manifest — squash keeps final content, not
/// an automatic merge of intermediate states) and the first target's
/// original parents.
///
/// # Errors
/// Returns [`FstError::InvalidInput`] if `targets` is empty or not a linear
/// chain (each snapshot's sole parent must be the previous target), or
/// propagates DAG/storage errors.
pub fn squash(
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    targets: &[SnapshotId],
    author: Author,
    created_at: String,
    message: Option<String>,
) -> Result<(SnapshotMeta, RewriteMap)> {
    let Some(first) = targets.first() else {
        return Err(FstError::InvalidInput {
            detail: "squash requires at least one snapshot".to_owned(),
        });
    };
    let Some(last) = targets.last() else {
        unreachable!("targets checked non-empty above");
    };

    let mut metas = Vec::with_capacity(targets.len());
    for id in targets {
        metas.push(snapshots.load(id)?);
    }
    for window in metas.windows(2) {
        let (prev, next) = (&window[0], &window[1]);
        if next.parents != vec![prev.id.clone()] {
            return Err(FstError::InvalidInput {
                detail: format!(
                    "squash range must be a linear chain: '{}' is not the sole parent of '{}'",
                    prev.id, next.id
                ),
            });
        }
    }

    let first_meta = &metas[0];
    let last_meta = snapshots.load(last)?;

    let squashed = SnapshotMeta::new(
        last_meta.manifest_hash.clone(),
        first_meta.parents.clone(),
        author,
        created_at,
        message,
        last_meta.workspace_id.clone(),
        last_meta.workspace_name.clone(),
        last_meta.agent.clone(),
        last_meta.files,
        last_meta.size,
    );
    snapshots.create(&squashed)?;

    let mut map = RewriteMap::new();
    for id in targets {
        map.record(id.clone(), squashed.id.clone());
    }
    let final_map = replay_descendants(snapshots, blobs, last, map, &squashed.author.clone(), &|_| {
        squashed.created_at.clone()
    })?;
    Ok((squashed, final_map))
}

/// Replay every descendant of `target` (found by scanning the full reachable
/// set from every known snapshot, since descendants aren't directly
/// indexed) onto the rewritten ancestry recorded in `map`, producing fresh
/// snapshots in topological order.
///
/// # Errors
/// Propagates DAG/storage errors.
fn replay_descendants(
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    target: &SnapshotId,
    mut map: RewriteMap,
    author: &Author,
    created_at_for_rewrite: &impl Fn(&SnapshotId) -> String,
) -> Result<RewriteMap> {
    let all_ids = snapshots.list_all()?;
    let mut descendants = Vec::new();
    for id in &all_ids {
        if id == target {
            continue;
        }
        if dag::is_ancestor(snapshots, target, id)? {
            descendants.push(id.clone());
        }
    }

    let descendant_set: HashSet<SnapshotId> = descendants.iter().cloned().collect();
    let order = dag::topo_sort(snapshots, &descendant_set)?;

    for id in order {
        let meta = snapshots.load(&id)?;
        let new_parents: Vec<SnapshotId> = meta
            .parents
            .iter()
            .map(|p| map.resolve(p))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mut new_parents = new_parents;
        new_parents.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        if new_parents == meta.parents {
            // Nothing upstream changed for this snapshot; no rewrite needed.
            continue;
        }

        let rewritten = SnapshotMeta::new(
            meta.manifest_hash.clone(),
            new_parents,
            author.clone(),
            created_at_for_rewrite(&id),
            meta.message.clone(),
            meta.workspace_id.clone(),
            meta.workspace_name.clone(),
            meta.agent.clone(),
            meta.files,
            meta.size,
        );
        snapshots.create(&rewritten)?;
        map.record(id, rewritten.id);
    }

    Ok(map)
}

/// Replay `target` (and its descendants, via [`replay_descendants`]) onto a
/// new parent, the way `git rebase --onto` moves a branch.
///
/// If the move introduces conflicts between `target`'s own change and the
/// new parent's content, this surfaces them the same way a normal merge
/// would rather than silently dropping data; callers that want conflict
/// resolution should use [`crate::merge::plan_merge`] directly with
/// `target` as "theirs" and `new_parent` as "ours", then persist via
/// [`crate::merge::apply`] before continuing the rebase with
/// [`replay_descendants`] on the result.
///
/// # Errors
/// Returns [`FstError::NotFound`] if either snapshot is missing. Returns
/// [`FstError::InvalidInput`] if `new_parent` is not an ancestor of
/// `target`'s current parent, or if `new_parent` falls within the range
/// being rebased (`target` itself or one of its descendants), or
/// propagates merge/storage errors.
pub fn rebase_onto(
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    target: &SnapshotId,
    new_parent: &SnapshotId,
    resolver: &dyn crate::merge::MergeResolver,
    author: Author,
    created_at: String,
) -> Result<(SnapshotMeta, Vec<String>)> {
    let target_meta = snapshots.load(target)?;
    let old_parent = target_meta.parents.first().cloned();

    match &old_parent {
        Some(p) if dag::is_ancestor(snapshots, new_parent, p)? => {}
        _ => {
            return Err(FstError::InvalidInput {
                detail: format!(
                    "cannot rebase {} onto {}: {} is not an ancestor of {}'s current parent",
                    target.as_str(),
                    new_parent.as_str(),
                    new_parent.as_str(),
                    target.as_str()
                ),
            });
        }
    }
    if dag::is_ancestor(snapshots, target, new_parent)? {
        return Err(FstError::InvalidInput {
            detail: format!(
                "cannot rebase {} onto {}: {} is within the range being rebased",
                target.as_str(),
                new_parent.as_str(),
                new_parent.as_str()
            ),
        });
    }

    let base_manifest = match &old_parent {
        Some(p) => {
            let m = snapshots.load(p)?;
            Manifest::load(blobs, &m.manifest_hash)?
        }
        None => Manifest::empty(),
    };
    let target_manifest = Manifest::load(blobs, &target_meta.manifest_hash)?;
    let new_parent_meta = snapshots.load(new_parent)?;
    let new_parent_manifest = Manifest::load(blobs, &new_parent_meta.manifest_hash)?;

    let drifts = drift::classify(&base_manifest, &target_manifest, &new_parent_manifest);
    let mut files = Vec::new();
    let mut conflicts = Vec::new();

    for d in drifts {
        let resolved: Option<FileEntry> = if d.is_quiet() {
            d.base_entry.clone()
        } else if d.is_one_sided() {
            d.a_entry.clone().or_else(|| d.b_entry.clone())
        } else if d.changes_agree() {
            d.a_entry.clone()
        } else if d.side_a == SideChange::Deleted || d.side_b == SideChange::Deleted {
            conflicts.push(d.path.clone());
            None
        } else {
            let base_bytes = match &d.base_entry {
                Some(f) => Some(blobs.get(&f.blob_hash)?),
                None => None,
            };
            let ours_bytes = d
                .a_entry
                .as_ref()
                .map(|f| blobs.get(&f.blob_hash))
                .transpose()?
                .unwrap_or_default();
            let theirs_bytes = d
                .b_entry
                .as_ref()
                .map(|f| blobs.get(&f.blob_hash))
                .transpose()?
                .unwrap_or_default();
            match resolver.resolve(&d.path, base_bytes.as_deref(), &ours_bytes, &theirs_bytes)? {
                crate::merge::ResolveOutcome::Resolved(bytes) => {
                    let hash = blobs.put(&bytes)?;
                    let mode = d.a_entry.as_ref().or(d.b_entry.as_ref()).map_or(0o644, |f| f.mode);
                    Some(FileEntry {
                        path: d.path.clone(),
                        blob_hash: hash,
                        size: bytes.len() as u64,
                        mode,
                    })
                }
                crate::merge::ResolveOutcome::Conflict(_) => {
                    conflicts.push(d.path.clone());
                    d.a_entry.clone()
                }
            }
        };
        if let Some(entry) = resolved {
            files.push(entry);
        }
    }

    let manifest = Manifest::from_entries(files);
    let manifest_hash = manifest.store(blobs)?;
    let rewritten = SnapshotMeta::new(
        manifest_hash,
        vec![new_parent.clone()],
        author,
        created_at,
        target_meta.message.clone(),
        target_meta.workspace_id.clone(),
        target_meta.workspace_name.clone(),
        target_meta.agent.clone(),
        manifest.file_count(),
        manifest.total_size(),
    );
    snapshots.create(&rewritten)?;
    conflicts.sort();
    conflicts.dedup();
    Ok((rewritten, conflicts))
}
