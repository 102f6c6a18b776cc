//! Integration tests for workspace init/snapshot/clone lifecycle.
//!
//! Each test builds its own isolated project under a fresh `tempdir` so
//! tests never share on-disk state.

use std::fs;

use fst::blob::BlobStore;
use fst::ids::WorkspaceName;
use fst::manifest::Manifest;
use fst::snapshot::{Author, SnapshotStore};
use fst::workspace::{self, WorkspaceConfig, WorkspaceRegistry};

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
        name: "Ada Lovelace".to_owned(),
        email: "ada@example.com".to_owned(),
    }
}

/// Spec scenario 1: a single-file workspace's first snapshot.
#[test]
fn single_file_snapshot_matches_spec_scenario_one() {
    let p = project();
    let ws_root = p.root.join("ws-a");
    let name = WorkspaceName::new("ws-a").unwrap();
    let info = workspace::init(&p.registry, "proj1", &ws_root, &name, "2026-01-01T00:00:00Z".to_owned())
        .unwrap();
    let config = WorkspaceConfig::load(&ws_root).unwrap();

    fs::write(ws_root.join("a.txt"), b"hello\n").unwrap();

    let s1 = workspace::snapshot_create(
        &p.registry,
        &p.snapshots,
        &p.blobs,
        &ws_root,
        config,
        info,
        author(),
        None,
        None,
        "2026-01-01T00:00:01Z".to_owned(),
    )
    .unwrap();

    let manifest = Manifest::load(&p.blobs, &s1.manifest_hash).unwrap();
    assert_eq!(manifest.file_count(), 1);
    assert_eq!(manifest.total_size(), 6);
    assert_eq!(s1.id.as_str().len(), 64);
    assert!(s1.id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    assert!(s1.verify_integrity());

    use sha2::{Digest, Sha256};
    let expected = fst::ids::BlobHash::from_digest(&Sha256::digest(b"hello\n").into());
    assert!(p.blobs.exists(&expected));
}

/// Forking a workspace from another's head materializes the same tree and
/// remembers the fork point as `base_snapshot_id`.
#[test]
fn clone_from_materializes_source_tree_and_records_base() {
    let p = project();
    let ws_a_root = p.root.join("ws-a");
    let name_a = WorkspaceName::new("ws-a").unwrap();
    let info_a = workspace::init(&p.registry, "proj1", &ws_a_root, &name_a, "t0".to_owned()).unwrap();
    let config_a = WorkspaceConfig::load(&ws_a_root).unwrap();
    fs::write(ws_a_root.join("a.txt"), b"hello\n").unwrap();
    let s1 = workspace::snapshot_create(
        &p.registry, &p.snapshots, &p.blobs, &ws_a_root, config_a, info_a,
        author(), None, None, "t1".to_owned(),
    ).unwrap();

    let source = p.registry.find_by_name("ws-a").unwrap();
    let ws_b_root = p.root.join("ws-b");
    let name_b = WorkspaceName::new("ws-b").unwrap();
    let info_b = workspace::clone_from(
        &p.registry, &p.snapshots, &p.blobs, "proj1", &source, &ws_b_root, &name_b, "t2".to_owned(),
    ).unwrap();

    assert_eq!(info_b.current_snapshot_id, Some(s1.id.clone()));
    assert_eq!(info_b.base_snapshot_id, Some(s1.id));
    assert_eq!(fs::read(ws_b_root.join("a.txt")).unwrap(), b"hello\n");
}

/// `snapshot_create` after a prior snapshot carries the head forward as the
/// sole parent.
#[test]
fn second_snapshot_has_first_as_parent() {
    let p = project();
    let ws_root = p.root.join("ws-a");
    let name = WorkspaceName::new("ws-a").unwrap();
    let info = workspace::init(&p.registry, "proj1", &ws_root, &name, "t0".to_owned()).unwrap();
    let config = WorkspaceConfig::load(&ws_root).unwrap();
    fs::write(ws_root.join("a.txt"), b"hello\n").unwrap();
    let s1 = workspace::snapshot_create(
        &p.registry, &p.snapshots, &p.blobs, &ws_root, config, info,
        author(), None, None, "t1".to_owned(),
    ).unwrap();

    let info2 = p.registry.find_by_name("ws-a").unwrap();
    let config2 = WorkspaceConfig::load(&ws_root).unwrap();
    fs::write(ws_root.join("a.txt"), b"world\n").unwrap();
    let s2 = workspace::snapshot_create(
        &p.registry, &p.snapshots, &p.blobs, &ws_root, config2, info2,
        author(), Some("update a.txt".to_owned()), None, "t2".to_owned(),
    ).unwrap();

    assert_eq!(s2.parents, vec![s1.id]);
}
