//! Snapshot metadata and storage.
//!
//! A snapshot's ID is `SHA-256(manifest_hash || sorted_unique(parents) ||
//! author_name || author_email || created_at)`: two snapshots with identical
//! content, parents, and authorship collapse to the same ID. Snapshots are
//! stored as one pretty-printed JSON file per ID under
//! `<project>/.fst/snapshots/<id>.json`, written with the same atomic
//! temp-file-then-rename recipe as the blob store.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FstError, Result};
use crate::ids::{ManifestHash, SnapshotId};

/// Author identity recorded on a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

/// A single snapshot's metadata, excluding its own ID (which is derived
/// from the rest of the fields).
///
/// `workspace_id`/`workspace_name`/`agent`/`files`/`size` are denormalized
/// fields recorded at creation time — none of them feed the
/// content-addressed ID, so they're free to carry without disturbing the
/// hash formula. `files`/`size` mirror the manifest they describe
/// (`Manifest::file_count()`/`total_size()` at the moment the snapshot was
/// created) so callers can read a snapshot's totals without a second fetch
/// through the blob store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// This snapshot's content-addressed ID.
    pub id: SnapshotId,
    /// Hash of the manifest this snapshot points to.
    pub manifest_hash: ManifestHash,
    /// Parent snapshot IDs, sorted and deduplicated.
    pub parents: Vec<SnapshotId>,
    /// Who created this snapshot.
    pub author: Author,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Optional free-form message.
    pub message: Option<String>,
    /// Opaque ID of the workspace this snapshot was created in.
    #[serde(default)]
    pub workspace_id: String,
    /// Human-readable name of the workspace this snapshot was created in,
    /// at the time of creation (a workspace may be renamed afterward).
    #[serde(default)]
    pub workspace_name: String,
    /// Slug of the agent that authored this snapshot, if it was created by
    /// an automated agent rather than a human. The Git Bridge uses this to
    /// derive `<agent-slug>@fastest.local` commit emails on export.
    #[serde(default)]
    pub agent: Option<String>,
    /// Number of files in the manifest this snapshot points to.
    #[serde(default)]
    pub files: u32,
    /// Total byte size of the manifest this snapshot points to.
    #[serde(default)]
    pub size: u64,
}

impl SnapshotMeta {
    /// Compute the content-addressed ID for a snapshot with the given
    /// fields.
    ///
    /// Every field is terminated with a `\n` before the next begins, so
    /// that the byte split between adjacent fields can never be ambiguous
    /// (e.g. `name="ab", email="c"` hashes differently from
    /// `name="a", email="bc"`). Snapshot IDs and hex parent IDs never
    /// contain `\n`, so the separator can't collide with field content.
    #[must_use]
    pub fn compute_id(
        manifest_hash: &ManifestHash,
        parents: &[SnapshotId],
        author: &Author,
        created_at: &str,
    ) -> SnapshotId {
        let mut sorted_parents: Vec<String> =
            parents.iter().map(|p| p.as_str().to_owned()).collect();
        sorted_parents.sort();
        sorted_parents.dedup();

        let mut hasher = Sha256::new();
        hasher.update(manifest_hash.as_str().as_bytes());
        hasher.update(b"\n");
        for parent in &sorted_parents {
            hasher.update(parent.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(b"---\n");
        hasher.update(author.name.as_bytes());
        hasher.update(b"\n");
        hasher.update(author.email.as_bytes());
        hasher.update(b"\n");
        hasher.update(created_at.as_bytes());
        hasher.update(b"\n");
        let digest = hasher.finalize();
        SnapshotId::from(crate::ids::Hash256::from_digest(&digest.into()))
    }

    /// Build a new snapshot, computing its ID and deduplicating/sorting
    /// parents.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manifest_hash: ManifestHash,
        mut parents: Vec<SnapshotId>,
        author: Author,
        created_at: String,
        message: Option<String>,
        workspace_id: String,
        workspace_name: String,
        agent: Option<String>,
        files: u32,
        size: u64,
    ) -> Self {
        parents.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        parents.dedup();
        let id = Self::compute_id(&manifest_hash, &parents, &author, &created_at);
        Self {
            id,
            manifest_hash,
            parents,
            author,
            created_at,
            message,
            workspace_id,
            workspace_name,
            agent,
            files,
            size,
        }
    }

    /// Recompute this snapshot's ID from its own fields and compare against
    /// the stored `id`, detecting tampering or corruption.
    #[must_use]
    pub fn verify_integrity(&self) -> bool {
        if !self.id.is_content_addressed() {
            // Legacy IDs are tolerated read-only without verification.
            return true;
        }
        let recomputed =
            Self::compute_id(&self.manifest_hash, &self.parents, &self.author, &self.created_at);
        recomputed == self.id
    }
}

/// On-disk store of [`SnapshotMeta`] records, one JSON file per ID.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Open (or prepare to create) a snapshot store rooted at
    /// `<project>/.fst/snapshots`.
    #[must_use]
    pub fn new(snapshots_dir: PathBuf) -> Self {
        Self { root: snapshots_dir }
    }

    fn path_for(&self, id: &SnapshotId) -> PathBuf {
        self.root.join(format!("{}.json", id.as_str()))
    }

    /// Returns `true` if a snapshot with this ID is stored.
    #[must_use]
    pub fn exists(&self, id: &SnapshotId) -> bool {
        self.path_for(id).is_file()
    }

    /// Persist a snapshot. Idempotent for identical content-addressed IDs.
    ///
    /// # Errors
    /// Returns [`FstError::IntegrityFailure`] if the snapshot's ID doesn't
    /// match its recomputed hash, or [`FstError::Storage`] on I/O failure.
    pub fn create(&self, meta: &SnapshotMeta) -> Result<()> {
        if !meta.verify_integrity() {
            return Err(FstError::IntegrityFailure {
                id: meta.id.as_str().to_owned(),
                detail: "recomputed snapshot ID does not match stored ID".to_owned(),
            });
        }
        fs::create_dir_all(&self.root)?;
        let bytes = serde_json::to_vec_pretty(meta)
            .map_err(|e| FstError::Storage(std::io::Error::other(e)))?;
        let tmp_path = self
            .root
            .join(format!(".{}.tmp", crate::ids::generate_opaque_id()));
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, self.path_for(&meta.id))?;
        Ok(())
    }

    /// Load a snapshot by its exact ID.
    ///
    /// # Errors
    /// Returns [`FstError::NotFound`] if absent, [`FstError::IntegrityFailure`]
    /// if the on-disk record fails hash verification, or
    /// [`FstError::Storage`] on I/O/deserialization failure.
    pub fn load(&self, id: &SnapshotId) -> Result<SnapshotMeta> {
        let bytes = fs::read(self.path_for(id)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FstError::NotFound {
                    what: "snapshot".to_owned(),
                    id: id.as_str().to_owned(),
                }
            } else {
                FstError::Storage(e)
            }
        })?;
        let meta: SnapshotMeta = serde_json::from_slice(&bytes)
            .map_err(|e| FstError::Storage(std::io::Error::other(e)))?;
        if !meta.verify_integrity() {
            return Err(FstError::IntegrityFailure {
                id: id.as_str().to_owned(),
                detail: "on-disk snapshot record failed hash verification".to_owned(),
            });
        }
        Ok(meta)
    }

    /// List every stored snapshot ID (unsorted).
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure.
    pub fn list_all(&self) -> Result<Vec<SnapshotId>> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FstError::Storage(e)),
        };
        let mut ids = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(stem) = file_name.strip_suffix(".json") {
                if let Ok(id) = stem.parse::<SnapshotId>() {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Minimum accepted length for an abbreviated prefix passed to
    /// [`Self::resolve_prefix`]. Shorter prefixes are rejected even if they
    /// happen to be unambiguous, so that a prefix which resolves today keeps
    /// resolving to the same snapshot as the store grows.
    pub const MIN_PREFIX_LEN: usize = 6;

    /// Resolve a (possibly abbreviated) hex prefix to the unique snapshot ID
    /// it matches.
    ///
    /// # Errors
    /// Returns [`FstError::InvalidInput`] if `prefix` is shorter than
    /// [`Self::MIN_PREFIX_LEN`], [`FstError::NotFound`] if no snapshot
    /// matches, or [`FstError::Ambiguous`] if more than one does.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<SnapshotId> {
        if prefix.len() < Self::MIN_PREFIX_LEN {
            return Err(FstError::InvalidInput {
                detail: format!(
                    "snapshot prefix '{prefix}' is shorter than the minimum of {} characters",
                    Self::MIN_PREFIX_LEN
                ),
            });
        }
        let all = self.list_all()?;
        let matches: Vec<&SnapshotId> = all
            .iter()
            .filter(|id| id.as_str().starts_with(prefix))
            .collect();
        match matches.as_slice() {
            [] => Err(FstError::NotFound {
                what: "snapshot".to_owned(),
                id: prefix.to_owned(),
            }),
            [single] => Ok((*single).clone()),
            many => {
                let mut candidates: Vec<String> =
                    many.iter().map(|id| id.as_str().to_owned()).collect();
                candidates.sort();
                Err(FstError::Ambiguous {
                    prefix: prefix.to_owned(),
                    candidates,
                })
            }
        }
    }

    /// Rewrite a snapshot's message in place, producing a new
    /// content-addressed snapshot (message is not part of the hash, so the
    /// ID is unchanged) and overwriting the stored record.
    ///
    /// # Errors
    /// Returns [`FstError::NotFound`] if the snapshot doesn't exist, or
    /// [`FstError::Storage`] on I/O failure.
    pub fn edit_message(&self, id: &SnapshotId, message: Option<String>) -> Result<SnapshotMeta> {
        let mut meta = self.load(id)?;
        meta.message = message;
        self.create(&meta)?;
        Ok(meta)
    }
}

/// Validate that every parent listed for `meta` is already present in
/// `store`, per the parent-before-child ordering constraint.
///
/// # Errors
/// Returns [`FstError::MissingParent`] for the first absent parent found.
pub fn require_parents_present(store: &SnapshotStore, meta: &SnapshotMeta) -> Result<()> {
    for parent in &meta.parents {
        if !store.exists(parent) {
            return Err(FstError::MissingParent {
                snapshot: meta.id.as_str().to_owned(),
                parent: parent.as_str().to_owned(),
            });
        }
    }
    Ok(())
}

/// Returns the set of distinct author identities across `parents`' meta,
/// useful for merge-record authorship defaults.
#[must_use]
pub fn parent_authors(parents: &[SnapshotMeta]) -> BTreeSet<String> {
    parents.iter().map(|p| p.author.email.clone()).collect()
}

impl SnapshotMeta {
    /// Test-only convenience constructor filling workspace identity fields
    /// and file/size totals with placeholders, so unit tests exercising
    /// DAG/merge/history mechanics don't need to thread workspace context
    /// or a real manifest through. Not gated behind `cfg(test)` so that
    /// integration tests under `tests/`, which link the crate's normal
    /// build, can call it too.
    #[doc(hidden)]
    pub fn new_for_test(
        manifest_hash: ManifestHash,
        parents: Vec<SnapshotId>,
        author: Author,
        created_at: String,
        message: Option<String>,
    ) -> Self {
        Self::new(
            manifest_hash,
            parents,
            author,
            created_at,
            message,
            "ws-test".to_owned(),
            "test".to_owned(),
            None,
            0,
            0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author {
            name: "Ada".to_owned(),
            email: "ada@example.com".to_owned(),
        }
    }

    fn manifest_hash(seed: &str) -> ManifestHash {
        ManifestHash::from_digest(&Sha256::digest(seed.as_bytes()).into())
    }

    #[test]
    fn same_inputs_produce_same_id() {
        let a = SnapshotMeta::new_for_test(
            manifest_hash("m1"),
            vec![],
            author(),
            "2026-01-01T00:00:00Z".to_owned(),
            None,
        );
        let b = SnapshotMeta::new_for_test(
            manifest_hash("m1"),
            vec![],
            author(),
            "2026-01-01T00:00:00Z".to_owned(),
            Some("different message".to_owned()),
        );
        assert_eq!(a.id, b.id, "message must not affect the snapshot ID");
    }

    #[test]
    fn different_manifest_produces_different_id() {
        let a = SnapshotMeta::new_for_test(manifest_hash("m1"), vec![], author(), "t".to_owned(), None);
        let b = SnapshotMeta::new_for_test(manifest_hash("m2"), vec![], author(), "t".to_owned(), None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn parent_order_does_not_affect_id() {
        let p1 = SnapshotMeta::new_for_test(manifest_hash("p1"), vec![], author(), "t1".to_owned(), None);
        let p2 = SnapshotMeta::new_for_test(manifest_hash("p2"), vec![], author(), "t2".to_owned(), None);

        let a = SnapshotMeta::new_for_test(
            manifest_hash("m"),
            vec![p1.id.clone(), p2.id.clone()],
            author(),
            "t3".to_owned(),
            None,
        );
        let b = SnapshotMeta::new_for_test(
            manifest_hash("m"),
            vec![p2.id, p1.id],
            author(),
            "t3".to_owned(),
            None,
        );
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn duplicate_parents_collapse() {
        let p = SnapshotMeta::new_for_test(manifest_hash("p"), vec![], author(), "t".to_owned(), None);
        let a = SnapshotMeta::new_for_test(
            manifest_hash("m"),
            vec![p.id.clone()],
            author(),
            "t2".to_owned(),
            None,
        );
        let b = SnapshotMeta::new_for_test(
            manifest_hash("m"),
            vec![p.id.clone(), p.id.clone()],
            author(),
            "t2".to_owned(),
            None,
        );
        assert_eq!(a.id, b.id);
        assert_eq!(a.parents, vec![p.id]);
    }

    #[test]
    fn verify_integrity_detects_tampering() {
        let mut meta =
            SnapshotMeta::new_for_test(manifest_hash("m"), vec![], author(), "t".to_owned(), None);
        assert!(meta.verify_integrity());
        meta.author.email = "tampered@example.com".to_owned();
        assert!(!meta.verify_integrity());
    }

    #[test]
    fn store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        let meta = SnapshotMeta::new_for_test(manifest_hash("m"), vec![], author(), "t".to_owned(), None);
        store.create(&meta).unwrap();
        let loaded = store.load(&meta.id).unwrap();
        assert_eq!(loaded, meta);
    }

    #[test]
    fn create_rejects_tampered_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        let mut meta =
            SnapshotMeta::new_for_test(manifest_hash("m"), vec![], author(), "t".to_owned(), None);
        meta.manifest_hash = manifest_hash("other");
        let err = store.create(&meta).unwrap_err();
        assert!(matches!(err, FstError::IntegrityFailure { .. }));
    }

    #[test]
    fn resolve_prefix_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        let meta = SnapshotMeta::new_for_test(manifest_hash("m"), vec![], author(), "t".to_owned(), None);
        store.create(&meta).unwrap();
        let prefix = &meta.id.as_str()[..8];
        assert_eq!(store.resolve_prefix(prefix).unwrap(), meta.id);
    }

    #[test]
    fn resolve_prefix_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        assert!(matches!(
            store.resolve_prefix("abcdef").unwrap_err(),
            FstError::NotFound { .. }
        ));
    }

    #[test]
    fn resolve_prefix_rejects_five_characters_even_if_unambiguous() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        let meta = SnapshotMeta::new_for_test(manifest_hash("m"), vec![], author(), "t".to_owned(), None);
        store.create(&meta).unwrap();
        let prefix = &meta.id.as_str()[..5];
        assert!(matches!(
            store.resolve_prefix(prefix).unwrap_err(),
            FstError::InvalidInput { .. }
        ));
    }

    #[test]
    fn list_all_empty_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn require_parents_present_flags_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        let missing_parent =
            SnapshotId::from(crate::ids::Hash256::from_digest(&Sha256::digest(b"nope").into()));
        let meta = SnapshotMeta::new_for_test(
            manifest_hash("m"),
            vec![missing_parent],
            author(),
            "t".to_owned(),
            None,
        );
        let err = require_parents_present(&store, &meta).unwrap_err();
        assert!(matches!(err, FstError::MissingParent { .. }));
    }

    #[test]
    fn edit_message_preserves_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        let meta = SnapshotMeta::new_for_test(
            manifest_hash("m"),
            vec![],
            author(),
            "t".to_owned(),
            Some("original".to_owned()),
        );
        store.create(&meta).unwrap();
        let updated = store.edit_message(&meta.id, Some("edited".to_owned())).unwrap();
        assert_eq!(updated.id, meta.id);
        assert_eq!(updated.message.as_deref(), Some("edited"));
    }
}
