//! Error type for the Git bridge's subprocess layer.
//!
//! A flat enum carrying the exact command and trimmed stderr so a caller
//! can surface a git failure verbatim.

use std::fmt;

/// Errors raised by `fst-git`'s subprocess-based git plumbing.
#[derive(Debug)]
pub enum GitError {
    /// A `git` subprocess exited non-zero.
    CommandFailed {
        /// The command line that was run, for diagnostics.
        command: String,
        /// Trimmed stderr output.
        stderr: String,
        /// Process exit code, if the process wasn't killed by a signal.
        exit_code: Option<i32>,
    },
    /// A push was rejected because the remote has diverged.
    PushRejected {
        /// The remote that rejected the push.
        remote: String,
        /// Trimmed stderr output from `git push`.
        stderr: String,
    },
    /// A `git` subprocess ran past its caller-specified timeout and was
    /// killed.
    TimedOut {
        /// The command line that was run.
        command: String,
    },
    /// A value git returned (an OID, a ref) was not in the expected shape.
    MalformedOutput {
        /// What was being parsed (e.g. `"git write-tree output"`).
        context: String,
        /// The raw value that failed to parse.
        raw: String,
    },
    /// The `git` binary could not be found or spawned at all.
    GitNotFound {
        /// The underlying spawn error.
        detail: String,
    },
    /// An I/O error not otherwise classified (e.g. writing a commit
    /// message to the subprocess's stdin pipe).
    Io(std::io::Error),
}

impl fmt::Display for GitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandFailed { command, stderr, exit_code } => {
                write!(f, "`{command}` failed")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code {code})")?;
                }
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Self::PushRejected { remote, stderr } => {
                write!(
                    f,
                    "push to '{remote}' rejected (remote has diverged): {stderr}\n  \
                     To fix: pull and merge the remote's changes, then push again."
                )
            }
            Self::TimedOut { command } => {
                write!(f, "`{command}` timed out")
            }
            Self::MalformedOutput { context, raw } => {
                write!(f, "unexpected {context}: {raw:?}")
            }
            Self::GitNotFound { detail } => {
                write!(
                    f,
                    "could not run `git`: {detail}\n  To fix: install git and ensure it is on PATH."
                )
            }
            Self::Io(err) => write!(f, "I/O error running git: {err}"),
        }
    }
}

impl std::error::Error for GitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GitError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::GitNotFound { detail: err.to_string() }
        } else {
            Self::Io(err)
        }
    }
}

/// Classify `git push`'s stderr into a [`GitError`]: lines containing
/// "rejected", "non-fast-forward", or "fetch first" are push-rejections;
/// anything else is a plain command failure.
#[must_use]
pub fn classify_push_failure(remote: &str, stderr: &str, exit_code: Option<i32>) -> GitError {
    let lower = stderr.to_lowercase();
    if lower.contains("rejected") || lower.contains("non-fast-forward") || lower.contains("fetch first") {
        GitError::PushRejected {
            remote: remote.to_owned(),
            stderr: stderr.to_owned(),
        }
    } else {
        GitError::CommandFailed {
            command: format!("git push {remote}"),
            stderr: stderr.to_owned(),
            exit_code,
        }
    }
}

/// Convenience alias for `Result<T, GitError>`.
pub type Result<T> = std::result::Result<T, GitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rejected() {
        let err = classify_push_failure("origin", "! [rejected] main -> main (non-fast-forward)", Some(1));
        assert!(matches!(err, GitError::PushRejected { .. }));
    }

    #[test]
    fn classify_fetch_first() {
        let err = classify_push_failure("origin", "Updates were rejected because the remote contains work that you do\nhint: fetch first", Some(1));
        assert!(matches!(err, GitError::PushRejected { .. }));
    }

    #[test]
    fn classify_other_failure() {
        let err = classify_push_failure("origin", "fatal: unable to access: could not resolve host", Some(128));
        assert!(matches!(err, GitError::CommandFailed { .. }));
    }

    #[test]
    fn display_push_rejected_has_fix_hint() {
        let err = GitError::PushRejected {
            remote: "origin".to_owned(),
            stderr: "rejected".to_owned(),
        };
        assert!(format!("{err}").contains("To fix"));
    }
}
