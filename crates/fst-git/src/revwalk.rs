//! History queries: topological listing, merge-base, ancestry.
//!
//! Uses `git rev-list`/`git merge-base` to answer, over Git commits during
//! import, the same questions fst's own
//! [`crate::dag`](../../src/dag.rs) answers over snapshots.

use std::time::Duration;

use crate::error::Result;
use crate::process::GitContext;

/// List commit OIDs reachable from `start`, oldest first (`git rev-list
/// --topo-order --reverse`).
///
/// # Errors
/// Returns [`crate::error::GitError`] if `git rev-list` fails.
pub fn rev_list_topo(ctx: &GitContext, start: &str, timeout: Duration) -> Result<Vec<String>> {
    let out = ctx.run(&["rev-list", "--topo-order", "--reverse", start], timeout)?;
    Ok(out.lines().map(str::to_owned).filter(|l| !l.is_empty()).collect())
}

/// List commits reachable from `start` but not from `exclude`, oldest
/// first — the commits an incremental import still needs to translate.
///
/// # Errors
/// Returns [`crate::error::GitError`] if `git rev-list` fails.
pub fn rev_list_range(ctx: &GitContext, exclude: &str, start: &str, timeout: Duration) -> Result<Vec<String>> {
    let range = format!("{exclude}..{start}");
    let out = ctx.run(&["rev-list", "--topo-order", "--reverse", &range], timeout)?;
    Ok(out.lines().map(str::to_owned).filter(|l| !l.is_empty()).collect())
}

/// Compute the merge base of `a` and `b`, or `None` if they share no history.
///
/// # Errors
/// Returns [`crate::error::GitError`] if `git merge-base` fails for a
/// reason other than "no common ancestor".
pub fn merge_base(ctx: &GitContext, a: &str, b: &str, timeout: Duration) -> Result<Option<String>> {
    match ctx.run(&["merge-base", a, b], timeout) {
        Ok(oid) if oid.len() == 40 => Ok(Some(oid)),
        Ok(_) => Ok(None),
        Err(crate::error::GitError::CommandFailed { exit_code: Some(1), .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// `true` if `ancestor` is an ancestor of (or equal to) `descendant`.
///
/// # Errors
/// Returns [`crate::error::GitError`] if the underlying `git merge-base
/// --is-ancestor` call fails to run at all (not merely returns "false").
pub fn is_ancestor(ctx: &GitContext, ancestor: &str, descendant: &str, timeout: Duration) -> Result<bool> {
    match ctx.run_capturing_status(&["merge-base", "--is-ancestor", ancestor, descendant], timeout) {
        Ok((success, _, _, _)) => Ok(success),
        Err(e) => Err(e),
    }
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

    fn commit(ctx: &GitContext, content: &str, parents: &[String]) -> String {
        let files = vec![FileObject { path: "a.txt".to_owned(), mode: "100644", content: content.as_bytes().to_vec() }];
        let tree = build_tree(ctx, &files, Duration::from_secs(5)).unwrap();
        let identity = CommitIdentity {
            name: "Test".to_owned(),
            email: "t@example.com".to_owned(),
            git_date: "1700000000 +0000".to_owned(),
        };
        commit_tree(ctx, &tree, parents, &identity, content, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn rev_list_topo_lists_oldest_first() {
        let (_dir, ctx) = init_repo();
        let c1 = commit(&ctx, "one", &[]);
        let c2 = commit(&ctx, "two", &[c1.clone()]);
        let c3 = commit(&ctx, "three", &[c2.clone()]);

        let list = rev_list_topo(&ctx, &c3, Duration::from_secs(5)).unwrap();
        assert_eq!(list, vec![c1, c2, c3]);
    }

    #[test]
    fn merge_base_finds_common_ancestor() {
        let (_dir, ctx) = init_repo();
        let c1 = commit(&ctx, "base", &[]);
        let c2 = commit(&ctx, "left", &[c1.clone()]);
        let c3 = commit(&ctx, "right", &[c1.clone()]);

        let base = merge_base(&ctx, &c2, &c3, Duration::from_secs(5)).unwrap();
        assert_eq!(base, Some(c1));
    }

    #[test]
    fn is_ancestor_true_and_false() {
        let (_dir, ctx) = init_repo();
        let c1 = commit(&ctx, "base", &[]);
        let c2 = commit(&ctx, "child", &[c1.clone()]);

        assert!(is_ancestor(&ctx, &c1, &c2, Duration::from_secs(5)).unwrap());
        assert!(!is_ancestor(&ctx, &c2, &c1, Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn rev_list_range_excludes_common_prefix() {
        let (_dir, ctx) = init_repo();
        let c1 = commit(&ctx, "one", &[]);
        let c2 = commit(&ctx, "two", &[c1.clone()]);
        let c3 = commit(&ctx, "three", &[c2.clone()]);

        let range = rev_list_range(&ctx, &c1, &c3, Duration::from_secs(5)).unwrap();
        assert_eq!(range, vec![c2, c3]);
    }
}
