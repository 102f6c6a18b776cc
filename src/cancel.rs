//! Cooperative cancellation for long-running operations.
//!
//! Merge, export, import, and large tree scans check a [`CancelToken`]
//! between file-level steps rather than relying on any kind of forced
//! interruption. This keeps partial progress safe: the blob store is
//! write-once, snapshot metadata is written last and atomically, and Git
//! branch refs only move after `commit-tree` succeeds, so a cancellation
//! observed mid-operation never leaves corrupt state behind, only
//! unfinished work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{FstError, Result};

/// A shareable flag a caller can flip to request cancellation of an
/// in-progress operation.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that starts out not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Check the token, returning [`FstError::InvalidInput`] if cancellation
    /// was requested. Callers invoke this between file-level steps in a
    /// long-running loop.
    ///
    /// # Errors
    /// Returns an error once [`Self::cancel`] has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(FstError::InvalidInput {
                detail: "operation cancelled".to_owned(),
            });
        }
        Ok(())
    }
}
