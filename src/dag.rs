//! Snapshot DAG traversal: reachability, topological order, ancestry, and
//! merge-base computation.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::{FstError, Result};
use crate::ids::SnapshotId;
use crate::snapshot::{SnapshotMeta, SnapshotStore};

/// Collect every snapshot reachable from `start` by following parent edges,
/// including `start` itself.
///
/// Missing parents are tolerated: a snapshot whose parent is absent from
/// the store is treated as a leaf of the traversal rather than an error,
/// matching the read-side tolerance granted to legacy/partial histories.
/// Use [`require_parents_present`](crate::snapshot::require_parents_present)
/// at write time to enforce completeness instead.
///
/// # Errors
/// Returns [`FstError::Cycle`] if a snapshot's ancestry loops back on
/// itself.
pub fn collect_reachable(store: &SnapshotStore, start: &SnapshotId) -> Result<HashSet<SnapshotId>> {
    let mut visited = HashSet::new();
    let mut in_progress = HashSet::new();
    let mut stack = vec![(start.clone(), false)];

    while let Some((id, departing)) = stack.pop() {
        if departing {
            in_progress.remove(&id);
            continue;
        }
        if visited.contains(&id) {
            continue;
        }
        if in_progress.contains(&id) {
            return Err(FstError::Cycle { at: id.as_str().to_owned() });
        }
        let Ok(meta) = store.load(&id) else {
            // Missing or corrupt: treat as a leaf, not an error.
            visited.insert(id);
            continue;
        };
        in_progress.insert(id.clone());
        stack.push((id.clone(), true));
        for parent in &meta.parents {
            if !visited.contains(parent) {
                stack.push((parent.clone(), false));
            }
        }
        visited.insert(id);
    }
    Ok(visited)
}

/// Topologically sort `ids`, parents always preceding children.
///
/// Snapshots outside `ids` referenced as parents are ignored. Ties are
/// broken by snapshot ID for determinism.
///
/// # Errors
/// Returns [`FstError::Cycle`] if the induced subgraph has a cycle.
pub fn topo_sort(store: &SnapshotStore, ids: &HashSet<SnapshotId>) -> Result<Vec<SnapshotId>> {
    let mut metas: HashMap<SnapshotId, SnapshotMeta> = HashMap::new();
    for id in ids {
        if let Ok(meta) = store.load(id) {
            metas.insert(id.clone(), meta);
        }
    }

    let mut in_degree: HashMap<SnapshotId, usize> = ids.iter().map(|id| (id.clone(), 0)).collect();
    let mut children: HashMap<SnapshotId, Vec<SnapshotId>> = HashMap::new();
    for (id, meta) in &metas {
        for parent in &meta.parents {
            if ids.contains(parent) {
                *in_degree.get_mut(id).expect("id is in ids") += 1;
                children.entry(parent.clone()).or_default().push(id.clone());
            }
        }
    }

    let mut ready: Vec<SnapshotId> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| id.clone())
        .collect();
    ready.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    let mut queue: VecDeque<SnapshotId> = ready.into();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.clone());
        if let Some(kids) = children.get(&id) {
            let mut newly_ready = Vec::new();
            for kid in kids {
                let deg = in_degree.get_mut(kid).expect("kid tracked in in_degree");
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(kid.clone());
                }
            }
            newly_ready.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            for kid in newly_ready {
                queue.push_back(kid);
            }
        }
    }

    if order.len() != ids.len() {
        let stuck = ids
            .iter()
            .find(|id| !order.contains(id))
            .expect("at least one id remains unsorted");
        return Err(FstError::Cycle { at: stuck.as_str().to_owned() });
    }
    Ok(order)
}

/// Returns `true` if `ancestor` is reachable from `descendant` by following
/// parent edges (including the trivial case `ancestor == descendant`).
///
/// # Errors
/// Propagates [`FstError::Cycle`] from the underlying traversal.
pub fn is_ancestor(
    store: &SnapshotStore,
    ancestor: &SnapshotId,
    descendant: &SnapshotId,
) -> Result<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    let reachable = collect_reachable(store, descendant)?;
    Ok(reachable.contains(ancestor))
}

/// Compute the lowest common ancestor(s) — the merge base — of `a` and `b`.
///
/// Returns every common ancestor not itself an ancestor of another common
/// ancestor (there can be more than one in the presence of criss-cross
/// merges). Returns an empty vector if the histories share no common
/// ancestor.
///
/// # Errors
/// Propagates [`FstError::Cycle`] from the underlying traversal.
pub fn merge_base(store: &SnapshotStore, a: &SnapshotId, b: &SnapshotId) -> Result<Vec<SnapshotId>> {
    let reach_a = collect_reachable(store, a)?;
    let reach_b = collect_reachable(store, b)?;
    let common: BTreeSet<SnapshotId> = reach_a.intersection(&reach_b).cloned().collect();

    if common.is_empty() {
        return Ok(Vec::new());
    }

    // Drop any common ancestor that is itself an ancestor of another common
    // ancestor, leaving only the "lowest" (most recent) ones.
    let mut lowest: Vec<SnapshotId> = Vec::new();
    for candidate in &common {
        let is_dominated = common.iter().any(|other| {
            other != candidate
                && is_ancestor(store, candidate, other).unwrap_or(false)
        });
        if !is_dominated {
            lowest.push(candidate.clone());
        }
    }
    lowest.sort_by(|x, y| x.as_str().cmp(y.as_str()));
    Ok(lowest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Author;
    use sha2::{Digest, Sha256};

    fn mh(seed: &str) -> crate::ids::ManifestHash {
        crate::ids::ManifestHash::from_digest(&Sha256::digest(seed.as_bytes()).into())
    }

    fn author() -> Author {
        Author {
            name: "T".to_owned(),
            email: "t@example.com".to_owned(),
        }
    }

    fn commit(
        store: &SnapshotStore,
        seed: &str,
        parents: Vec<SnapshotId>,
        ts: &str,
    ) -> SnapshotId {
        let meta = SnapshotMeta::new_for_test(mh(seed), parents, author(), ts.to_owned(), None);
        store.create(&meta).unwrap();
        meta.id
    }

    fn store() -> (tempfile::TempDir, SnapshotStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        (dir, store)
    }

    #[test]
    fn collect_reachable_linear_history() {
        let (_dir, store) = store();
        let root = commit(&store, "r", vec![], "t0");
        let mid = commit(&store, "m", vec![root.clone()], "t1");
        let tip = commit(&store, "t", vec![mid.clone()], "t2");

        let reachable = collect_reachable(&store, &tip).unwrap();
        assert_eq!(reachable.len(), 3);
        assert!(reachable.contains(&root));
        assert!(reachable.contains(&mid));
        assert!(reachable.contains(&tip));
    }

    #[test]
    fn collect_reachable_tolerates_missing_parent() {
        let (_dir, store) = store();
        let ghost = SnapshotId::new(&"f".repeat(64)).unwrap();
        let tip = commit(&store, "t", vec![ghost.clone()], "t0");
        let reachable = collect_reachable(&store, &tip).unwrap();
        assert!(reachable.contains(&tip));
        assert!(reachable.contains(&ghost));
    }

    #[test]
    fn topo_sort_respects_parent_before_child() {
        let (_dir, store) = store();
        let root = commit(&store, "r", vec![], "t0");
        let mid = commit(&store, "m", vec![root.clone()], "t1");
        let tip = commit(&store, "t", vec![mid.clone()], "t2");

        let ids: HashSet<_> = [root.clone(), mid.clone(), tip.clone()].into_iter().collect();
        let order = topo_sort(&store, &ids).unwrap();
        let pos = |id: &SnapshotId| order.iter().position(|x| x == id).unwrap();
        assert!(pos(&root) < pos(&mid));
        assert!(pos(&mid) < pos(&tip));
    }

    #[test]
    fn is_ancestor_true_and_false() {
        let (_dir, store) = store();
        let root = commit(&store, "r", vec![], "t0");
        let tip = commit(&store, "t", vec![root.clone()], "t1");
        let unrelated = commit(&store, "u", vec![], "t2");

        assert!(is_ancestor(&store, &root, &tip).unwrap());
        assert!(!is_ancestor(&store, &unrelated, &tip).unwrap());
        assert!(is_ancestor(&store, &tip, &tip).unwrap());
    }

    #[test]
    fn merge_base_simple_fork() {
        let (_dir, store) = store();
        let root = commit(&store, "r", vec![], "t0");
        let a = commit(&store, "a", vec![root.clone()], "t1");
        let b = commit(&store, "b", vec![root.clone()], "t2");

        let base = merge_base(&store, &a, &b).unwrap();
        assert_eq!(base, vec![root]);
    }

    #[test]
    fn merge_base_no_common_ancestor() {
        let (_dir, store) = store();
        let a = commit(&store, "a", vec![], "t0");
        let b = commit(&store, "b", vec![], "t1");
        assert!(merge_base(&store, &a, &b).unwrap().is_empty());
    }

    #[test]
    fn merge_base_picks_lowest_not_all_ancestors() {
        let (_dir, store) = store();
        let root = commit(&store, "r", vec![], "t0");
        let mid = commit(&store, "m", vec![root.clone()], "t1");
        let a = commit(&store, "a", vec![mid.clone()], "t2");
        let b = commit(&store, "b", vec![mid.clone()], "t3");

        let base = merge_base(&store, &a, &b).unwrap();
        assert_eq!(base, vec![mid]);
    }
}
