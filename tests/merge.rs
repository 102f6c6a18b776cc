//! Integration tests for the three-way merge engine, driven through the
//! workspace-level `merge_into` orchestration rather than `fst::merge`
//! directly, so these exercise the same path a caller actually takes.

use std::fs;

use fst::blob::BlobStore;
use fst::ids::WorkspaceName;
use fst::snapshot::{Author, SnapshotStore};
use fst::workspace::{self, ConflictPolicy, WorkspaceConfig, WorkspaceRegistry};

struct Project {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    blobs: BlobStore,
    snapshots: SnapshotStore,
    registry: WorkspaceRegistry,
}

fn project() -> Project {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    Project {
        blobs: BlobStore::new(root.join(".fst/blobs")),
        snapshots: SnapshotStore::new(root.join(".fst/snapshots")),
        registry: WorkspaceRegistry::new(root.join(".fst/workspaces")),
        _dir: dir,
        root,
    }
}

fn author() -> Author {
    Author {
        name: "T".to_owned(),
        email: "t@example.com".to_owned(),
    }
}

/// Sets up `ws-a`/`ws-b` both forked from a shared `S1`, `ws-a` re-snapshotted
/// with `a_content` and `ws-b` re-snapshotted with the given edits, and
/// returns everything needed to call `merge_into`.
fn forked_workspaces(
    p: &Project,
    a_content: &'static [u8],
    b_edits: &[(&str, &'static [u8])],
) -> (std::path::PathBuf, WorkspaceConfig) {
    let ws_a_root = p.root.join("ws-a");
    let name_a = WorkspaceName::new("ws-a").unwrap();
    let info_a = workspace::init(&p.registry, "proj1", &ws_a_root, &name_a, "t0".to_owned()).unwrap();
    let config_a = WorkspaceConfig::load(&ws_a_root).unwrap();
    fs::write(ws_a_root.join("a.txt"), b"hello\n").unwrap();
    let s1 = workspace::snapshot_create(
        &p.registry, &p.snapshots, &p.blobs, &ws_a_root, config_a, info_a,
        author(), None, None, "t1".to_owned(),
    ).unwrap();

    let ws_b_root = p.root.join("ws-b");
    let name_b = WorkspaceName::new("ws-b").unwrap();
    let mut info_b = workspace::init(&p.registry, "proj1", &ws_b_root, &name_b, "t1".to_owned()).unwrap();
    info_b.current_snapshot_id = Some(s1.id.clone());
    p.registry.put(&info_b).unwrap();
    let mut config_b = WorkspaceConfig::load(&ws_b_root).unwrap();
    config_b.current_snapshot_id = Some(s1.id.clone());
    config_b.base_snapshot_id = Some(s1.id.clone());
    config_b.save(&ws_b_root).unwrap();
    fs::write(ws_b_root.join("a.txt"), b"hello\n").unwrap();
    for (path, content) in b_edits {
        fs::write(ws_b_root.join(path), content).unwrap();
    }

    let _ = workspace::snapshot_create(
        &p.registry, &p.snapshots, &p.blobs, &ws_b_root,
        config_b, p.registry.get(&info_b.workspace_id).unwrap(),
        author(), None, None, "t2".to_owned(),
    ).unwrap();

    fs::write(ws_a_root.join("a.txt"), a_content).unwrap();
    let info_a_reload = p.registry.find_by_name("ws-a").unwrap();
    let mut config_a_for_a = WorkspaceConfig::load(&ws_a_root).unwrap();
    config_a_for_a.current_snapshot_id = Some(s1.id.clone());
    let _s2a = workspace::snapshot_create(
        &p.registry, &p.snapshots, &p.blobs, &ws_a_root,
        config_a_for_a, info_a_reload,
        author(), None, None, "t3".to_owned(),
    ).unwrap();

    let final_config = WorkspaceConfig::load(&ws_a_root).unwrap();
    (ws_a_root, final_config)
}

/// Spec scenario 2: a clean merge of an added file and an independent edit.
#[test]
fn clean_merge_combines_independent_changes_with_no_conflicts() {
    let p = project();
    let (ws_a_root, config_a) = forked_workspaces(&p, b"world\n", &[("b.txt", b"new\n")]);
    let source = p.registry.find_by_name("ws-b").unwrap();

    let outcome = workspace::merge_into(
        &p.snapshots, &p.blobs, &ws_a_root, config_a, &source,
        ConflictPolicy::Manual, None, author(), "t4".to_owned(),
    ).unwrap();

    assert!(outcome.plan.is_clean());
    assert_eq!(fs::read(ws_a_root.join("a.txt")).unwrap(), b"world\n");
    assert_eq!(fs::read(ws_a_root.join("b.txt")).unwrap(), b"new\n");
}

/// Spec scenario 3, `Manual` branch: both sides edit `a.txt` incompatibly;
/// the result carries the three standard conflict markers.
#[test]
fn manual_policy_marks_conflicting_file_with_diff3_markers() {
    let p = project();
    let (ws_a_root, config_a) = forked_workspaces(&p, b"world\n", &[("a.txt", b"underworld\n")]);
    let source = p.registry.find_by_name("ws-b").unwrap();

    let outcome = workspace::merge_into(
        &p.snapshots, &p.blobs, &ws_a_root, config_a, &source,
        ConflictPolicy::Manual, None, author(), "t4".to_owned(),
    ).unwrap();

    assert!(!outcome.plan.is_clean());
    assert_eq!(outcome.plan.conflicts, vec!["a.txt".to_owned()]);
    let marked = fs::read_to_string(ws_a_root.join("a.txt")).unwrap();
    assert_eq!(marked.matches("<<<<<<<").count(), 1);
    assert_eq!(marked.matches("=======").count(), 1);
    assert_eq!(marked.matches(">>>>>>>").count(), 1);
    assert!(marked.contains("world\n"));
    assert!(marked.contains("underworld\n"));
}

/// Spec scenario 3, `Theirs` branch: the conflicting path is replaced
/// outright with the source side's content.
#[test]
fn theirs_policy_takes_source_content_for_conflicting_path() {
    let p = project();
    let (ws_a_root, config_a) = forked_workspaces(&p, b"world\n", &[("a.txt", b"underworld\n")]);
    let source = p.registry.find_by_name("ws-b").unwrap();

    let outcome = workspace::merge_into(
        &p.snapshots, &p.blobs, &ws_a_root, config_a, &source,
        ConflictPolicy::Theirs, None, author(), "t4".to_owned(),
    ).unwrap();

    assert!(outcome.plan.is_clean());
    assert_eq!(fs::read(ws_a_root.join("a.txt")).unwrap(), b"underworld\n");
}

/// Spec scenario 3, `Ours` branch: the conflicting path keeps the target's
/// own content untouched.
#[test]
fn ours_policy_keeps_current_content_for_conflicting_path() {
    let p = project();
    let (ws_a_root, config_a) = forked_workspaces(&p, b"world\n", &[("a.txt", b"underworld\n")]);
    let source = p.registry.find_by_name("ws-b").unwrap();

    let outcome = workspace::merge_into(
        &p.snapshots, &p.blobs, &ws_a_root, config_a, &source,
        ConflictPolicy::Ours, None, author(), "t4".to_owned(),
    ).unwrap();

    assert!(outcome.plan.is_clean());
    assert_eq!(fs::read(ws_a_root.join("a.txt")).unwrap(), b"world\n");
}

/// Rollback restores the target's tree to exactly the state before the
/// merge was applied.
#[test]
fn rollback_restores_pre_merge_tree_byte_for_byte() {
    let p = project();
    let (ws_a_root, config_a) = forked_workspaces(&p, b"world\n", &[("b.txt", b"new\n")]);
    let source = p.registry.find_by_name("ws-b").unwrap();

    let outcome = workspace::merge_into(
        &p.snapshots, &p.blobs, &ws_a_root, config_a, &source,
        ConflictPolicy::Manual, None, author(), "t4".to_owned(),
    ).unwrap();
    assert!(ws_a_root.join("b.txt").exists());

    workspace::rollback(&p.snapshots, &p.blobs, &ws_a_root, &outcome.pre_merge_snapshot).unwrap();

    assert_eq!(fs::read(ws_a_root.join("a.txt")).unwrap(), b"world\n");
    assert!(!ws_a_root.join("b.txt").exists());
    assert!(workspace::WorkspaceConfig::load(&ws_a_root).is_ok());
}
