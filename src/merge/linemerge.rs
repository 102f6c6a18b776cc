//! Line-level three-way content merge via `git merge-file --diff3`, plus a
//! line-level overlap report for diagnostic output.
//!
//! Shelling out to `git merge-file` instead of hand-rolling or importing a
//! diff crate for the merge itself keeps merge semantics identical to what a
//! user would get running `git merge` by hand, and the Git Bridge already
//! requires a local `git` binary on `PATH`, so this adds no
//! new runtime requirement for the merge outcome itself. The overlap report
//! is a separate, purely diagnostic computation — it never decides whether a
//! merge succeeds, only which base-line ranges made it a conflict — so it
//! uses `similar`'s Myers diff directly rather than parsing `git
//! merge-file`'s own hunk markers back out.

use std::fs;
use std::process::Command;

use similar::{DiffOp, TextDiff};

use crate::error::{FstError, Result};
use crate::ids::generate_opaque_id;

/// Outcome of a single diff3 content merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineMergeOutcome {
    /// Merge succeeded with no overlapping edits; contains the merged bytes.
    Clean(Vec<u8>),
    /// Overlapping edits; contains the output with `<<<<<<<`/`|||||||`/
    /// `=======`/`>>>>>>>` conflict markers.
    Conflict(Vec<u8>),
}

/// Run `git merge-file -p --diff3` over three in-memory byte strings.
///
/// # Errors
/// Returns [`FstError::ResolverFailed`] if the `git` binary is missing, the
/// temp files can't be written, or the subprocess exits with a code that
/// indicates neither a clean merge nor a reportable conflict.
pub fn diff3_merge(base: &[u8], ours: &[u8], theirs: &[u8]) -> Result<LineMergeOutcome> {
    let tmp_dir = std::env::temp_dir().join(format!("fst-diff3-{}", generate_opaque_id()));
    let wrap_io = |detail: String| FstError::ResolverFailed {
        path: tmp_dir.clone(),
        detail,
    };

    fs::create_dir_all(&tmp_dir).map_err(|e| wrap_io(e.to_string()))?;
    let ours_path = tmp_dir.join("ours");
    let base_path = tmp_dir.join("base");
    let theirs_path = tmp_dir.join("theirs");
    fs::write(&ours_path, ours).map_err(|e| wrap_io(e.to_string()))?;
    fs::write(&base_path, base).map_err(|e| wrap_io(e.to_string()))?;
    fs::write(&theirs_path, theirs).map_err(|e| wrap_io(e.to_string()))?;

    let output = Command::new("git")
        .arg("merge-file")
        .arg("-p")
        .arg("--diff3")
        .arg(&ours_path)
        .arg(&base_path)
        .arg(&theirs_path)
        .output();

    let _ = fs::remove_dir_all(&tmp_dir);

    let output = output.map_err(|e| {
        FstError::ResolverFailed {
            path: ours_path.clone(),
            detail: format!("failed to spawn `git merge-file`: {e}"),
        }
    })?;

    match output.status.code() {
        Some(0) => Ok(LineMergeOutcome::Clean(output.stdout)),
        // git merge-file exits with the hunk count (>=1) on conflict.
        Some(n) if n > 0 => Ok(LineMergeOutcome::Conflict(output.stdout)),
        code => Err(FstError::ResolverFailed {
            path: ours_path,
            detail: format!(
                "git merge-file exited with {code:?}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }),
    }
}

/// A base-line range where an ours-side edit and a theirs-side edit
/// collide.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    /// First base line this hunk covers, 1-indexed.
    pub start_line: usize,
    /// Last base line this hunk covers, 1-indexed. Less than `start_line`
    /// when the colliding edit is a pure insertion with no base lines of
    /// its own.
    pub end_line: usize,
    /// The lines `ours` replaces this range with.
    pub current_lines: Vec<String>,
    /// The lines `theirs` replaces this range with.
    pub source_lines: Vec<String>,
}

/// One side's edit against the base, expressed as a half-open base-line
/// range `[lo, hi)` (0-indexed) and the replacement lines it introduces.
/// An insertion with no base lines of its own has `lo == hi`.
struct SideHunk {
    lo: usize,
    hi: usize,
    lines: Vec<String>,
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn side_hunks(base_lines: &[&str], side_lines: &[&str]) -> Vec<SideHunk> {
    let diff = TextDiff::from_slices(base_lines, side_lines);
    let mut hunks = Vec::new();
    for op in diff.ops() {
        let replacement = |new_index: usize, new_len: usize| -> Vec<String> {
            side_lines[new_index..new_index + new_len]
                .iter()
                .map(|l| l.trim_end_matches('\n').to_owned())
                .collect()
        };
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete { old_index, old_len, .. } => {
                hunks.push(SideHunk {
                    lo: old_index,
                    hi: old_index + old_len,
                    lines: Vec::new(),
                });
            }
            DiffOp::Insert { old_index, new_index, new_len } => {
                hunks.push(SideHunk {
                    lo: old_index,
                    hi: old_index,
                    lines: replacement(new_index, new_len),
                });
            }
            DiffOp::Replace { old_index, old_len, new_index, new_len } => {
                hunks.push(SideHunk {
                    lo: old_index,
                    hi: old_index + old_len,
                    lines: replacement(new_index, new_len),
                });
            }
        }
    }
    hunks
}

/// Two base-line ranges collide iff they overlap or touch — adjacent edits
/// with no unchanged line between them still conflict, since there is no
/// stable anchor to order them by.
fn ranges_collide(a: &SideHunk, b: &SideHunk) -> bool {
    a.lo <= b.hi && b.lo <= a.hi
}

/// Compute the line-level overlap report for a file both sides modified:
/// every base-line range where an ours-side edit and a theirs-side edit
/// collide. Edits that don't collide merge cleanly via a
/// standard line merge and never appear here.
#[must_use]
pub fn compute_conflict_hunks(base: &[u8], ours: &[u8], theirs: &[u8]) -> Vec<Hunk> {
    let base = String::from_utf8_lossy(base);
    let ours = String::from_utf8_lossy(ours);
    let theirs = String::from_utf8_lossy(theirs);

    let base_lines = split_lines(&base);
    let ours_hunks = side_hunks(&base_lines, &split_lines(&ours));
    let theirs_hunks = side_hunks(&base_lines, &split_lines(&theirs));

    let mut collisions = Vec::new();
    for oh in &ours_hunks {
        for th in &theirs_hunks {
            if ranges_collide(oh, th) {
                collisions.push(Hunk {
                    start_line: oh.lo.min(th.lo) + 1,
                    end_line: oh.hi.max(th.hi),
                    current_lines: oh.lines.clone(),
                    source_lines: th.lines.clone(),
                });
            }
        }
    }
    collisions
}
