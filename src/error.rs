//! Unified error type for the fst engine.
//!
//! A flat enum whose `Display` impl gives an agent or human enough context
//! to act without consulting other output.

use std::fmt;
use std::path::PathBuf;

use crate::ids::IdError;

/// Unified error type for all `fst` engine operations.
#[derive(Debug)]
pub enum FstError {
    /// A snapshot, workspace, blob, or manifest could not be found by ID or
    /// path.
    NotFound {
        /// What kind of thing was missing (e.g. "snapshot", "workspace").
        what: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A snapshot-ID prefix matched more than one snapshot.
    Ambiguous {
        /// The prefix that was looked up.
        prefix: String,
        /// The candidate IDs it matched.
        candidates: Vec<String>,
    },

    /// A content-addressed ID did not match its recomputed hash.
    IntegrityFailure {
        /// The ID that failed verification.
        id: String,
        /// Human-readable description of the mismatch.
        detail: String,
    },

    /// DAG traversal re-entered a node already in progress.
    Cycle {
        /// The snapshot ID where the cycle was detected.
        at: String,
    },

    /// An operation that demands full history encountered a missing parent.
    MissingParent {
        /// The snapshot whose parent is missing.
        snapshot: String,
        /// The missing parent ID.
        parent: String,
    },

    /// A three-way merge produced conflicts the current policy does not
    /// resolve.
    Conflict {
        /// Paths in conflict.
        paths: Vec<PathBuf>,
    },

    /// The external `MergeResolver` failed or returned malformed output.
    ResolverFailed {
        /// The path being resolved.
        path: PathBuf,
        /// Why the resolver failed.
        detail: String,
    },

    /// A workspace's advisory lock is held by another process past the
    /// configured timeout.
    LockBusy {
        /// Path to the lock file.
        path: PathBuf,
    },

    /// A malformed ID, range specifier, or argument constraint violation.
    InvalidInput {
        /// Human-readable description of the violation.
        detail: String,
    },

    /// A filesystem I/O error not otherwise classified.
    Storage(std::io::Error),

    /// A `git` subprocess invoked by the Git Bridge exited non-zero or
    /// timed out.
    GitFailure {
        /// Normalized detail from the underlying [`fst_git::GitError`].
        detail: String,
        /// `true` when the underlying cause was the `git` binary itself
        /// being unavailable, rather than a command it ran failing — the
        /// CLI maps this to a distinct exit code since the fix is "install
        /// git", not "retry the operation".
        missing_dependency: bool,
    },

    /// Specialization of `GitFailure` for a push rejected because the
    /// remote has diverged.
    PushRejected {
        /// The remote that rejected the push.
        remote: String,
        /// Normalized stderr detail.
        detail: String,
    },
}

impl fmt::Display for FstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what, id } => {
                write!(f, "{what} '{id}' not found")
            }
            Self::Ambiguous { prefix, candidates } => {
                write!(
                    f,
                    "prefix '{prefix}' is ambiguous: matches {} snapshots ({})",
                    candidates.len(),
                    candidates.join(", ")
                )
            }
            Self::IntegrityFailure { id, detail } => {
                write!(f, "integrity check failed for '{id}': {detail}")
            }
            Self::Cycle { at } => {
                write!(f, "cycle detected in snapshot DAG at '{at}'")
            }
            Self::MissingParent { snapshot, parent } => {
                write!(
                    f,
                    "snapshot '{snapshot}' references missing parent '{parent}'"
                )
            }
            Self::Conflict { paths } => {
                write!(f, "merge conflict in {} file(s):", paths.len())?;
                for p in paths {
                    write!(f, "\n  - {}", p.display())?;
                }
                Ok(())
            }
            Self::ResolverFailed { path, detail } => {
                write!(
                    f,
                    "merge resolver failed for '{}': {detail}",
                    path.display()
                )
            }
            Self::LockBusy { path } => {
                write!(
                    f,
                    "workspace lock '{}' is held by another process\n  To fix: wait for the other operation to finish, or remove the lock if it is stale.",
                    path.display()
                )
            }
            Self::InvalidInput { detail } => {
                write!(f, "invalid input: {detail}")
            }
            Self::Storage(err) => {
                write!(f, "storage I/O error: {err}")
            }
            Self::GitFailure { detail, .. } => {
                write!(f, "git failure: {detail}")
            }
            Self::PushRejected { remote, detail } => {
                write!(f, "push to '{remote}' rejected: {detail}")
            }
        }
    }
}

impl std::error::Error for FstError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FstError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err)
    }
}

impl From<IdError> for FstError {
    fn from(err: IdError) -> Self {
        Self::InvalidInput {
            detail: err.to_string(),
        }
    }
}

impl From<fst_git::GitError> for FstError {
    fn from(err: fst_git::GitError) -> Self {
        if let fst_git::GitError::PushRejected { remote, stderr } = &err {
            return Self::PushRejected {
                remote: remote.clone(),
                detail: stderr.clone(),
            };
        }
        let missing_dependency = matches!(err, fst_git::GitError::GitNotFound { .. });
        Self::GitFailure {
            detail: err.to_string(),
            missing_dependency,
        }
    }
}

/// Convenience alias for `Result<T, FstError>`.
pub type Result<T> = std::result::Result<T, FstError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found() {
        let err = FstError::NotFound {
            what: "snapshot".to_owned(),
            id: "deadbeef".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("snapshot"));
        assert!(msg.contains("deadbeef"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn display_ambiguous() {
        let err = FstError::Ambiguous {
            prefix: "abc123".to_owned(),
            candidates: vec!["abc123ff".to_owned(), "abc123aa".to_owned()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("ambiguous"));
        assert!(msg.contains("2 snapshots"));
    }

    #[test]
    fn display_conflict_lists_paths() {
        let err = FstError::Conflict {
            paths: vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")],
        };
        let msg = format!("{err}");
        assert!(msg.contains("2 file(s)"));
        assert!(msg.contains("a.txt"));
        assert!(msg.contains("b.txt"));
    }

    #[test]
    fn display_lock_busy_has_fix_hint() {
        let err = FstError::LockBusy {
            path: PathBuf::from("/ws/.fst/workspace.lock"),
        };
        assert!(format!("{err}").contains("To fix"));
    }

    #[test]
    fn source_for_storage_error() {
        let io = std::io::Error::other("disk full");
        let err = FstError::Storage(io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn from_io_error() {
        let io = std::io::Error::other("nope");
        let err: FstError = io.into();
        assert!(matches!(err, FstError::Storage(_)));
    }

    #[test]
    fn from_git_error_classifies_push_rejection() {
        let git_err = fst_git::GitError::PushRejected {
            remote: "origin".to_owned(),
            stderr: "rejected".to_owned(),
        };
        let err: FstError = git_err.into();
        assert!(matches!(err, FstError::PushRejected { .. }));
    }

    #[test]
    fn from_git_error_other_is_git_failure() {
        let git_err = fst_git::GitError::TimedOut {
            command: "git push".to_owned(),
        };
        let err: FstError = git_err.into();
        match err {
            FstError::GitFailure { missing_dependency, .. } => assert!(!missing_dependency),
            other => panic!("expected GitFailure, got {other:?}"),
        }
    }

    #[test]
    fn from_git_error_not_found_is_classified_as_missing_dependency() {
        let git_err = fst_git::GitError::GitNotFound {
            detail: "No such file or directory".to_owned(),
        };
        let err: FstError = git_err.into();
        match err {
            FstError::GitFailure { missing_dependency, .. } => assert!(missing_dependency),
            other => panic!("expected GitFailure, got {other:?}"),
        }
    }

    #[test]
    fn from_id_error() {
        let id_err = IdError {
            kind: crate::ids::IdKind::WorkspaceName,
            value: "BAD".to_owned(),
            reason: "uppercase".to_owned(),
        };
        let err: FstError = id_err.into();
        assert!(matches!(err, FstError::InvalidInput { .. }));
    }
}
