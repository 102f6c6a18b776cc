//! Three-way diff classification.
//!
//! Given a base manifest and two derived manifests (`a`, `b`), classify
//! every path that appears in any of the three by what changed relative to
//! base on each side. This classification feeds the merge engine's conflict
//! detection without itself deciding how to resolve anything.

use std::collections::BTreeSet;

use crate::manifest::{FileEntry, Manifest};

/// What happened to one path on one side, relative to base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SideChange {
    /// Unchanged from base.
    Unchanged,
    /// Present in base, absent here.
    Deleted,
    /// Absent in base, present here.
    Added,
    /// Present in both, content or mode differs.
    Modified,
}

/// The three-way classification of a single path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathDrift {
    /// The path being classified.
    pub path: String,
    /// What changed on side `a`.
    pub side_a: SideChange,
    /// What changed on side `b`.
    pub side_b: SideChange,
    /// The entry as it existed in base, if any.
    pub base_entry: Option<FileEntry>,
    /// The entry as it exists on side `a`, if any.
    pub a_entry: Option<FileEntry>,
    /// The entry as it exists on side `b`, if any.
    pub b_entry: Option<FileEntry>,
}

impl PathDrift {
    /// Both sides left the path exactly as it was in base.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.side_a == SideChange::Unchanged && self.side_b == SideChange::Unchanged
    }

    /// Exactly one side changed the path; the other left it alone.
    #[must_use]
    pub fn is_one_sided(&self) -> bool {
        (self.side_a == SideChange::Unchanged) != (self.side_b == SideChange::Unchanged)
    }

    /// Both sides changed the path (possibly identically).
    #[must_use]
    pub fn both_changed(&self) -> bool {
        self.side_a != SideChange::Unchanged && self.side_b != SideChange::Unchanged
    }

    /// Both sides changed the path to the exact same resulting entry (or
    /// both deleted it) — a non-colliding concurrent edit.
    #[must_use]
    pub fn changes_agree(&self) -> bool {
        self.both_changed() && self.a_entry == self.b_entry
    }
}

/// Full three-way classification of every path touched in `base`, `a`, or
/// `b`, sorted by path.
#[must_use]
pub fn classify(base: &Manifest, a: &Manifest, b: &Manifest) -> Vec<PathDrift> {
    let mut paths: BTreeSet<&str> = BTreeSet::new();
    for m in [base, a, b] {
        paths.extend(m.files.iter().map(|f| f.path.as_str()));
    }

    paths
        .into_iter()
        .map(|path| {
            let base_entry = base.get(path).cloned();
            let a_entry = a.get(path).cloned();
            let b_entry = b.get(path).cloned();
            PathDrift {
                path: path.to_owned(),
                side_a: classify_side(&base_entry, &a_entry),
                side_b: classify_side(&base_entry, &b_entry),
                base_entry,
                a_entry,
                b_entry,
            }
        })
        .collect()
}

fn classify_side(base: &Option<FileEntry>, side: &Option<FileEntry>) -> SideChange {
    match (base, side) {
        (None, None) => SideChange::Unchanged,
        (None, Some(_)) => SideChange::Added,
        (Some(_), None) => SideChange::Deleted,
        (Some(b), Some(s)) => {
            if b.blob_hash == s.blob_hash && b.mode == s.mode {
                SideChange::Unchanged
            } else {
                SideChange::Modified
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn entry(path: &str, content: &str) -> FileEntry {
        FileEntry {
            path: path.to_owned(),
            blob_hash: crate::ids::BlobHash::from_digest(&Sha256::digest(content.as_bytes()).into()),
            size: content.len() as u64,
            mode: 0o644,
        }
    }

    #[test]
    fn quiet_path_unchanged_on_both_sides() {
        let base = Manifest::from_entries(vec![entry("a.txt", "x")]);
        let a = base.clone();
        let b = base.clone();
        let drift = classify(&base, &a, &b);
        assert_eq!(drift.len(), 1);
        assert!(drift[0].is_quiet());
    }

    #[test]
    fn one_sided_modification() {
        let base = Manifest::from_entries(vec![entry("a.txt", "x")]);
        let a = Manifest::from_entries(vec![entry("a.txt", "x-changed")]);
        let b = base.clone();
        let drift = classify(&base, &a, &b);
        assert!(drift[0].is_one_sided());
        assert_eq!(drift[0].side_a, SideChange::Modified);
        assert_eq!(drift[0].side_b, SideChange::Unchanged);
    }

    #[test]
    fn both_sides_added_same_content_agrees() {
        let base = Manifest::empty();
        let a = Manifest::from_entries(vec![entry("new.txt", "same")]);
        let b = Manifest::from_entries(vec![entry("new.txt", "same")]);
        let drift = classify(&base, &a, &b);
        assert!(drift[0].both_changed());
        assert!(drift[0].changes_agree());
    }

    #[test]
    fn both_sides_modified_differently_does_not_agree() {
        let base = Manifest::from_entries(vec![entry("a.txt", "x")]);
        let a = Manifest::from_entries(vec![entry("a.txt", "x-a")]);
        let b = Manifest::from_entries(vec![entry("a.txt", "x-b")]);
        let drift = classify(&base, &a, &b);
        assert!(drift[0].both_changed());
        assert!(!drift[0].changes_agree());
    }

    #[test]
    fn both_sides_deleted_agrees() {
        let base = Manifest::from_entries(vec![entry("gone.txt", "x")]);
        let a = Manifest::empty();
        let b = Manifest::empty();
        let drift = classify(&base, &a, &b);
        assert_eq!(drift[0].side_a, SideChange::Deleted);
        assert_eq!(drift[0].side_b, SideChange::Deleted);
        assert!(drift[0].changes_agree());
    }

    #[test]
    fn modify_delete_conflict_shape() {
        let base = Manifest::from_entries(vec![entry("a.txt", "x")]);
        let a = Manifest::from_entries(vec![entry("a.txt", "x-edited")]);
        let b = Manifest::empty();
        let drift = classify(&base, &a, &b);
        assert_eq!(drift[0].side_a, SideChange::Modified);
        assert_eq!(drift[0].side_b, SideChange::Deleted);
        assert!(drift[0].both_changed());
        assert!(!drift[0].changes_agree());
    }
}
