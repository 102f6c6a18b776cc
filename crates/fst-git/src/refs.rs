//! Ref plumbing: `update-ref`/`for-each-ref`.

use std::time::Duration;

use crate::error::{GitError, Result};
use crate::process::GitContext;

/// Move (or create) `refname` to point at `oid`, recording `reason` in the
/// reflog the same way `git commit`/`git push` does.
///
/// # Errors
/// Returns [`GitError`] if `git update-ref` fails.
pub fn update_ref(ctx: &GitContext, refname: &str, oid: &str, reason: &str, timeout: Duration) -> Result<()> {
    ctx.run(&["update-ref", "-m", reason, refname, oid], timeout)?;
    Ok(())
}

/// Read the OID a ref currently points at, or `None` if it doesn't exist.
///
/// # Errors
/// Returns [`GitError`] if `git rev-parse` fails for a reason other than
/// the ref being absent.
pub fn read_ref(ctx: &GitContext, refname: &str, timeout: Duration) -> Result<Option<String>> {
    match ctx.run(&["rev-parse", "--verify", "--quiet", refname], timeout) {
        Ok(oid) if oid.len() == 40 => Ok(Some(oid)),
        Ok(_) | Err(GitError::CommandFailed { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Delete `refname`, if it exists.
///
/// # Errors
/// Returns [`GitError`] if `git update-ref -d` fails for a reason other
/// than the ref being absent.
pub fn delete_ref(ctx: &GitContext, refname: &str, timeout: Duration) -> Result<()> {
    match ctx.run(&["update-ref", "-d", refname], timeout) {
        Ok(_) => Ok(()),
        Err(GitError::CommandFailed { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// List every ref under `prefix` (e.g. `"refs/fst/"`) as `(refname, oid)`
/// pairs.
///
/// # Errors
/// Returns [`GitError`] if `git for-each-ref` fails.
pub fn list_refs(ctx: &GitContext, prefix: &str, timeout: Duration) -> Result<Vec<(String, String)>> {
    let out = ctx.run(&["for-each-ref", "--format=%(objectname) %(refname)", prefix], timeout)?;
    let mut refs = Vec::new();
    for line in out.lines() {
        if let Some((oid, name)) = line.split_once(' ') {
            refs.push((name.to_owned(), oid.to_owned()));
        }
    }
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{build_tree, commit_tree, CommitIdentity, FileObject};

    fn init_repo() -> (tempfile::TempDir, GitContext) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = GitContext::with_work_tree(dir.path());
        ctx.run(&["init", "-q"], Duration::from_secs(5)).unwrap();
        (dir, ctx)
    }

    fn commit(ctx: &GitContext, msg: &str, parents: &[String]) -> String {
        let files = vec![FileObject { path: "a.txt".to_owned(), mode: "100644", content: msg.as_bytes().to_vec() }];
        let tree = build_tree(ctx, &files, Duration::from_secs(5)).unwrap();
        let identity = CommitIdentity {
            name: "Test".to_owned(),
            email: "t@example.com".to_owned(),
            git_date: "1700000000 +0000".to_owned(),
        };
        commit_tree(ctx, &tree, parents, &identity, msg, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn update_read_delete_ref_roundtrip() {
        let (_dir, ctx) = init_repo();
        let oid = commit(&ctx, "first", &[]);
        update_ref(&ctx, "refs/fst/meta", &oid, "export", Duration::from_secs(5)).unwrap();
        assert_eq!(read_ref(&ctx, "refs/fst/meta", Duration::from_secs(5)).unwrap(), Some(oid.clone()));

        delete_ref(&ctx, "refs/fst/meta", Duration::from_secs(5)).unwrap();
        assert_eq!(read_ref(&ctx, "refs/fst/meta", Duration::from_secs(5)).unwrap(), None);
    }

    #[test]
    fn read_ref_missing_is_none() {
        let (_dir, ctx) = init_repo();
        assert_eq!(read_ref(&ctx, "refs/heads/does-not-exist", Duration::from_secs(5)).unwrap(), None);
    }

    #[test]
    fn list_refs_filters_by_prefix() {
        let (_dir, ctx) = init_repo();
        let oid = commit(&ctx, "first", &[]);
        update_ref(&ctx, "refs/fst/workspaces/main", &oid, "export", Duration::from_secs(5)).unwrap();
        update_ref(&ctx, "refs/heads/main", &oid, "checkout", Duration::from_secs(5)).unwrap();

        let fst_refs = list_refs(&ctx, "refs/fst/", Duration::from_secs(5)).unwrap();
        assert_eq!(fst_refs.len(), 1);
        assert_eq!(fst_refs[0].0, "refs/fst/workspaces/main");
    }
}
