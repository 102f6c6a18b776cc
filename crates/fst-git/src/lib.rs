//! Subprocess-based Git plumbing for the `fst` crate's Git Bridge.
//!
//! This crate never links `libgit2` or `gix`; every operation shells out to
//! a local `git` binary. It knows nothing about snapshots, manifests, or
//! blobs — those concepts live in the `fst` crate's own `gitbridge` module,
//! which composes the primitives here.

pub mod error;
pub mod objects;
pub mod process;
pub mod push;
pub mod refs;
pub mod revwalk;

pub use error::{GitError, Result};
pub use objects::{
    build_tree, commit_tree, read_blob, read_commit, read_tree_mode_recursive, read_tree_recursive, write_blob,
    CommitIdentity, CommitInfo, FileObject, TreeEntry,
};
pub use process::GitContext;
pub use push::push;
pub use refs::{delete_ref, list_refs, read_ref, update_ref};
pub use revwalk::{is_ancestor, merge_base, rev_list_range, rev_list_topo};
