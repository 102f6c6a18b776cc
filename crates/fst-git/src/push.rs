//! Pushing refs to a remote and classifying rejection.

use std::time::Duration;

use crate::error::{classify_push_failure, Result};
use crate::process::GitContext;

/// Push `local_ref:remote_ref` to `remote`. A rejection (because the
/// remote has diverged) surfaces as [`crate::error::GitError::PushRejected`]
/// rather than a generic failure, so callers can react by re-running
/// incremental import.
///
/// # Errors
/// Returns [`crate::error::GitError::PushRejected`] if the remote rejected
/// the push due to divergence, or another [`crate::error::GitError`]
/// variant for any other failure.
pub fn push(ctx: &GitContext, remote: &str, local_ref: &str, remote_ref: &str, timeout: Duration) -> Result<()> {
    let refspec = format!("{local_ref}:{remote_ref}");
    let (success, code, _stdout, stderr) =
        ctx.run_capturing_status(&["push", remote, &refspec], timeout)?;
    if success {
        return Ok(());
    }
    Err(classify_push_failure(remote, &stderr, code))
}
