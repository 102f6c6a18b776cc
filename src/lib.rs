//! `fst`: a content-addressed workspace snapshot engine.
//!
//! A project owns a shared object store (content-addressed blobs and
//! manifests) and a DAG of immutable snapshots. Workspaces are named,
//! mutable pointers into that DAG; merge, drift detection, and history
//! rewriting all operate purely on content addresses, so two snapshots
//! with identical trees are always the same object regardless of which
//! workspace produced them.

pub mod blob;
pub mod cancel;
pub mod dag;
pub mod drift;
pub mod error;
pub mod gitbridge;
pub mod history;
pub mod ids;
pub mod ignore;
pub mod lock;
pub mod manifest;
pub mod merge;
pub mod project;
pub mod snapshot;
pub mod workspace;

pub use error::{FstError, Result};
