//! Writing blobs, trees, and commits without touching a working tree.
//!
//! `write_blob` goes via `git hash-object -w --stdin`, and `build_tree` via
//! repeated `git mktree` calls, grouping entries by directory depth and
//! working bottom-up so child trees exist before their parent `mktree`
//! runs.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{GitError, Result};
use crate::process::GitContext;

/// A single entry passed to `git mktree`: path relative to its containing
/// tree, the git object mode, the object type, and its OID.
#[derive(Clone, Debug)]
pub struct TreeEntry {
    /// Entry name within its containing tree (no slashes).
    pub name: String,
    /// Octal file mode git expects (`100644`, `100755`, `120000`, `040000`).
    pub mode: &'static str,
    /// `"blob"` or `"tree"`.
    pub kind: &'static str,
    /// The object's SHA.
    pub oid: String,
}

/// One file to be written into a tree, keyed by its full repo-relative
/// path (forward-slash separated).
#[derive(Clone, Debug)]
pub struct FileObject {
    /// Repo-relative path, e.g. `"src/main.rs"`.
    pub path: String,
    /// Git file mode: `"100644"` or `"100755"`.
    pub mode: &'static str,
    /// File content.
    pub content: Vec<u8>,
}

/// Write `content` as a blob object and return its OID.
///
/// # Errors
/// Returns [`GitError`] if the `git hash-object` subprocess fails or times out.
pub fn write_blob(ctx: &GitContext, content: &[u8], timeout: Duration) -> Result<String> {
    let oid = ctx.run_with_stdin(&["hash-object", "-w", "--stdin"], Some(content), timeout)?;
    if oid.len() != 40 || !oid.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(GitError::MalformedOutput {
            context: "git hash-object output".to_owned(),
            raw: oid,
        });
    }
    Ok(oid)
}

/// Build a full tree object (recursively) from a flat list of files and
/// return the root tree's OID. Empty directories have no representation in
/// Git and are silently omitted, matching `git add`'s own behavior.
///
/// # Errors
/// Returns [`GitError`] if any `hash-object` or `mktree` call fails.
pub fn build_tree(ctx: &GitContext, files: &[FileObject], timeout: Duration) -> Result<String> {
    // Group files by their top-level path component, recursing into
    // subdirectories before building the tree that references them.
    let mut top_level: BTreeMap<String, Vec<FileObject>> = BTreeMap::new();
    let mut leaves: Vec<TreeEntry> = Vec::new();

    for file in files {
        match file.path.split_once('/') {
            Some((dir, rest)) => {
                top_level.entry(dir.to_owned()).or_default().push(FileObject {
                    path: rest.to_owned(),
                    mode: file.mode,
                    content: file.content.clone(),
                });
            }
            None => {
                let oid = write_blob(ctx, &file.content, timeout)?;
                leaves.push(TreeEntry {
                    name: file.path.clone(),
                    mode: file.mode,
                    kind: "blob",
                    oid,
                });
            }
        }
    }

    for (dir, children) in top_level {
        let subtree_oid = build_tree(ctx, &children, timeout)?;
        leaves.push(TreeEntry {
            name: dir,
            mode: "040000",
            kind: "tree",
            oid: subtree_oid,
        });
    }

    run_mktree(ctx, &leaves, timeout)
}

fn run_mktree(ctx: &GitContext, entries: &[TreeEntry], timeout: Duration) -> Result<String> {
    let mut input = String::new();
    for entry in entries {
        input.push_str(&format!("{} {} {}\t{}\n", entry.mode, entry.kind, entry.oid, entry.name));
    }
    let oid = ctx.run_with_stdin(&["mktree"], Some(input.as_bytes()), timeout)?;
    if oid.len() != 40 {
        return Err(GitError::MalformedOutput {
            context: "git mktree output".to_owned(),
            raw: oid,
        });
    }
    Ok(oid)
}

/// List every blob in `tree_oid`, recursively, as `(repo_relative_path,
/// blob_oid)` pairs. Used by the import side to diff a commit's tree
/// against the working manifest.
///
/// # Errors
/// Returns [`GitError`] if `git ls-tree` fails.
pub fn read_tree_recursive(ctx: &GitContext, tree_oid: &str, timeout: Duration) -> Result<Vec<(String, String)>> {
    Ok(read_tree_mode_recursive(ctx, tree_oid, timeout)?
        .into_iter()
        .map(|(path, _mode, oid)| (path, oid))
        .collect())
}

/// Like [`read_tree_recursive`], but also returns each blob's git file
/// mode (`"100644"` or `"100755"`), needed to round-trip the executable
/// bit on import.
///
/// # Errors
/// Returns [`GitError`] if `git ls-tree` fails.
pub fn read_tree_mode_recursive(
    ctx: &GitContext,
    tree_oid: &str,
    timeout: Duration,
) -> Result<Vec<(String, String, String)>> {
    let out = ctx.run(&["ls-tree", "-r", "--full-tree", tree_oid], timeout)?;
    let mut entries = Vec::new();
    for line in out.lines() {
        // "<mode> <type> <oid>\t<path>"
        let Some((meta, path)) = line.split_once('\t') else {
            continue;
        };
        let mut parts = meta.split_whitespace();
        let mode = parts.next();
        let kind = parts.next();
        let oid = parts.next();
        if kind == Some("blob") {
            if let (Some(mode), Some(oid)) = (mode, oid) {
                entries.push((path.to_owned(), mode.to_owned(), oid.to_owned()));
            }
        }
    }
    Ok(entries)
}

/// Read a blob's raw content by OID.
///
/// # Errors
/// Returns [`GitError`] if `git cat-file` fails.
pub fn read_blob(ctx: &GitContext, oid: &str, timeout: Duration) -> Result<Vec<u8>> {
    ctx.run_bytes(&["cat-file", "blob", oid], timeout)
}

/// Author/committer identity plus an RFC 3339 timestamp, converted to
/// git's `<epoch> <+HHMM>` date format by the caller before being passed
/// as `GIT_AUTHOR_DATE`/`GIT_COMMITTER_DATE` (kept out of this crate,
/// which has no date-time dependency of its own).
#[derive(Clone, Debug)]
pub struct CommitIdentity {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Git-format date string, e.g. `"1700000000 +0000"`.
    pub git_date: String,
}

/// Create a commit object pointing at `tree_oid` with the given `parents`,
/// identity, and message, and return the new commit's OID.
///
/// # Errors
/// Returns [`GitError`] if `git commit-tree` fails.
pub fn commit_tree(
    ctx: &GitContext,
    tree_oid: &str,
    parents: &[String],
    author: &CommitIdentity,
    message: &str,
    timeout: Duration,
) -> Result<String> {
    let mut args: Vec<&str> = vec!["commit-tree", tree_oid];
    for parent in parents {
        args.push("-p");
        args.push(parent);
    }
    args.push("-F");
    args.push("-");

    let mut env = std::collections::HashMap::new();
    env.insert("GIT_AUTHOR_NAME", author.name.clone());
    env.insert("GIT_AUTHOR_EMAIL", author.email.clone());
    env.insert("GIT_AUTHOR_DATE", author.git_date.clone());
    env.insert("GIT_COMMITTER_NAME", author.name.clone());
    env.insert("GIT_COMMITTER_EMAIL", author.email.clone());
    env.insert("GIT_COMMITTER_DATE", author.git_date.clone());

    let oid = ctx.run_with_env(&args, &env, Some(message.as_bytes()), timeout)?;
    if oid.len() != 40 {
        return Err(GitError::MalformedOutput {
            context: "git commit-tree output".to_owned(),
            raw: oid,
        });
    }
    Ok(oid)
}

/// Parsed fields of a commit object. Incremental import needs parent links
/// and the tree OID to walk history and diff trees.
#[derive(Clone, Debug)]
pub struct CommitInfo {
    /// This commit's OID.
    pub oid: String,
    /// The tree this commit points at.
    pub tree: String,
    /// Parent commit OIDs, in order.
    pub parents: Vec<String>,
    /// Raw commit message (subject + body).
    pub message: String,
    /// Author display name, parsed from the `author` header.
    pub author_name: String,
    /// Author email, parsed from the `author` header.
    pub author_email: String,
    /// Raw `<epoch> <+HHMM>` date from the `author` header.
    pub author_date: String,
}

/// Read and parse a commit object by OID.
///
/// # Errors
/// Returns [`GitError::MalformedOutput`] if the object isn't a well-formed
/// commit, or [`GitError`] if `git cat-file` fails.
pub fn read_commit(ctx: &GitContext, oid: &str, timeout: Duration) -> Result<CommitInfo> {
    let raw = ctx.run(&["cat-file", "commit", oid], timeout)?;
    let mut tree = None;
    let mut parents = Vec::new();
    let mut author_line = None;
    let mut lines = raw.lines();
    let mut message_lines: Vec<&str> = Vec::new();
    let mut in_message = false;

    for line in &mut lines {
        if in_message {
            message_lines.push(line);
            continue;
        }
        if line.is_empty() {
            in_message = true;
            continue;
        }
        if let Some(rest) = line.strip_prefix("tree ") {
            tree = Some(rest.to_owned());
        } else if let Some(rest) = line.strip_prefix("parent ") {
            parents.push(rest.to_owned());
        } else if let Some(rest) = line.strip_prefix("author ") {
            author_line = Some(rest.to_owned());
        }
    }

    let tree = tree.ok_or_else(|| GitError::MalformedOutput {
        context: "commit object (missing tree line)".to_owned(),
        raw: oid.to_owned(),
    })?;
    let author_line = author_line.ok_or_else(|| GitError::MalformedOutput {
        context: "commit object (missing author line)".to_owned(),
        raw: oid.to_owned(),
    })?;
    let (author_name, author_email, author_date) = parse_author_line(&author_line).ok_or_else(|| {
        GitError::MalformedOutput {
            context: "commit author line".to_owned(),
            raw: author_line.clone(),
        }
    })?;

    Ok(CommitInfo {
        oid: oid.to_owned(),
        tree,
        parents,
        message: message_lines.join("\n"),
        author_name,
        author_email,
        author_date,
    })
}

/// Parse a commit `author`/`committer` header of the form
/// `"Name <email> <epoch> <+HHMM>"` into its three parts.
fn parse_author_line(line: &str) -> Option<(String, String, String)> {
    let open = line.find('<')?;
    let close = line.find('>')?;
    if close < open {
        return None;
    }
    let name = line[..open].trim().to_owned();
    let email = line[open + 1..close].to_owned();
    let date = line[close + 1..].trim().to_owned();
    Some((name, email, date))
}
