//! Validated identifier newtypes used throughout the engine.
//!
//! Every identifier that crosses a persistence boundary (blob hashes,
//! manifest hashes, snapshot IDs, workspace/project IDs) is validated on
//! construction and on deserialization so a malformed value can never enter
//! the object store. Each newtype follows the same
//! `validate`/`Display`/`FromStr` pattern.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// What kind of identifier failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdKind {
    /// A SHA-256 hex digest (blob hash, manifest hash, or content-addressed
    /// snapshot ID).
    Hash256,
    /// A snapshot ID (content-addressed or legacy `snap-` prefixed).
    SnapshotId,
    /// A human-readable workspace name.
    WorkspaceName,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash256 => write!(f, "hash"),
            Self::SnapshotId => write!(f, "snapshot id"),
            Self::WorkspaceName => write!(f, "workspace name"),
        }
    }
}

/// A validation error for one of this module's identifier types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdError {
    /// Which identifier kind failed.
    pub kind: IdKind,
    /// The raw invalid value.
    pub value: String,
    /// Human-readable reason.
    pub reason: String,
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {}: {:?} — {}",
            self.kind, self.value, self.reason
        )
    }
}

impl std::error::Error for IdError {}

// ---------------------------------------------------------------------------
// Hash256 — lowercase hex SHA-256 digest
// ---------------------------------------------------------------------------

/// A validated 64-character lowercase hex SHA-256 digest.
///
/// Used for blob hashes, manifest hashes, and the content-addressed form of
/// a [`SnapshotId`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hash256(String);

impl Hash256 {
    /// Construct from a raw SHA-256 digest.
    #[must_use]
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        let mut s = String::with_capacity(64);
        for b in digest {
            use std::fmt::Write as _;
            let _ = write!(s, "{b:02x}");
        }
        Self(s)
    }

    /// Create from a hex string, validating format.
    ///
    /// # Errors
    /// Returns an error unless `s` is exactly 64 lowercase hex characters.
    pub fn new(s: &str) -> Result<Self, IdError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the lowercase hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return `true` if `self` starts with `prefix` (used for prefix lookup).
    #[must_use]
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    fn validate(s: &str) -> Result<(), IdError> {
        if s.len() != 64 {
            return Err(IdError {
                kind: IdKind::Hash256,
                value: s.to_owned(),
                reason: format!("expected 64 hex characters, got {}", s.len()),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(IdError {
                kind: IdKind::Hash256,
                value: s.to_owned(),
                reason: "must contain only lowercase hex characters (0-9, a-f)".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Hash256 {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Hash256 {
    type Error = IdError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Hash256> for String {
    fn from(h: Hash256) -> Self {
        h.0
    }
}

/// Blob content hash. See [`Hash256`].
pub type BlobHash = Hash256;
/// Manifest content hash. See [`Hash256`].
pub type ManifestHash = Hash256;

// ---------------------------------------------------------------------------
// SnapshotId
// ---------------------------------------------------------------------------

/// A snapshot identifier.
///
/// Modern snapshots use a content-addressed [`Hash256`] (§3: `S.id ==
/// sha256(manifest_hash || sorted_unique(parents) || author_name ||
/// author_email || created_at)`). Snapshots imported from older stores may
/// carry a legacy `snap-`-prefixed opaque ID; these are accepted read-only
/// and never integrity-checked.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SnapshotId {
    /// Content-addressed: `id == sha256(...)`.
    Hashed(Hash256),
    /// Legacy opaque ID, tolerated read-only.
    Legacy(String),
}

impl SnapshotId {
    const LEGACY_PREFIX: &'static str = "snap-";

    /// Parse a snapshot ID string, accepting both content-addressed hashes
    /// and legacy `snap-` prefixed IDs.
    ///
    /// # Errors
    /// Returns an error if the string is neither a valid 64-char hex hash
    /// nor has the legacy prefix.
    pub fn new(s: &str) -> Result<Self, IdError> {
        if let Some(rest) = s.strip_prefix(Self::LEGACY_PREFIX) {
            if rest.is_empty() {
                return Err(IdError {
                    kind: IdKind::SnapshotId,
                    value: s.to_owned(),
                    reason: "legacy snapshot id must have a non-empty suffix".to_owned(),
                });
            }
            return Ok(Self::Legacy(s.to_owned()));
        }
        Hash256::new(s).map(Self::Hashed).map_err(|mut e| {
            e.kind = IdKind::SnapshotId;
            e
        })
    }

    /// Returns `true` if this ID is content-addressed (its integrity can be
    /// verified against its payload).
    #[must_use]
    pub const fn is_content_addressed(&self) -> bool {
        matches!(self, Self::Hashed(_))
    }

    /// Return the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hashed(h) => h.as_str(),
            Self::Legacy(s) => s.as_str(),
        }
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SnapshotId {
    type Error = IdError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<SnapshotId> for String {
    fn from(id: SnapshotId) -> Self {
        match id {
            SnapshotId::Hashed(h) => h.into(),
            SnapshotId::Legacy(s) => s,
        }
    }
}

impl From<Hash256> for SnapshotId {
    fn from(h: Hash256) -> Self {
        Self::Hashed(h)
    }
}

// ---------------------------------------------------------------------------
// WorkspaceName
// ---------------------------------------------------------------------------

/// A validated, human-chosen workspace name.
///
/// Lowercase alphanumeric with hyphens, 1-64 characters, no leading/trailing
/// or consecutive hyphens. The stable `workspace_id` (below) is a separate
/// generated opaque token; this is only the human-facing rename target.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceName(String);

impl WorkspaceName {
    /// Maximum length of a workspace name.
    pub const MAX_LEN: usize = 64;

    /// Create a new `WorkspaceName`, validating format.
    ///
    /// # Errors
    /// Returns an error if the name is empty, too long, or contains
    /// characters outside `[a-z0-9-]`, or has leading/trailing/consecutive
    /// hyphens.
    pub fn new(s: &str) -> Result<Self, IdError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), IdError> {
        let err = |reason: &str| IdError {
            kind: IdKind::WorkspaceName,
            value: s.to_owned(),
            reason: reason.to_owned(),
        };
        if s.is_empty() {
            return Err(err("workspace name must not be empty"));
        }
        if s.len() > Self::MAX_LEN {
            return Err(err(&format!(
                "workspace name must be at most {} characters, got {}",
                Self::MAX_LEN,
                s.len()
            )));
        }
        if s.starts_with('-') || s.ends_with('-') {
            return Err(err("workspace name must not start or end with a hyphen"));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(err(
                "workspace name must contain only lowercase letters (a-z), digits (0-9), and hyphens (-)",
            ));
        }
        if s.contains("--") {
            return Err(err("workspace name must not contain consecutive hyphens"));
        }
        Ok(())
    }
}

impl fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkspaceName {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for WorkspaceName {
    type Error = IdError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<WorkspaceName> for String {
    fn from(n: WorkspaceName) -> Self {
        n.0
    }
}

// ---------------------------------------------------------------------------
// Opaque generated IDs (WorkspaceId, ProjectId)
// ---------------------------------------------------------------------------

/// Generate a fresh 32-character lowercase hex opaque identifier.
///
/// Used for `workspace_id` and `project_id`, which are stable handles
/// distinct from the (renameable) human-readable name (see `WorkspaceInfo`).
#[must_use]
pub fn generate_opaque_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    let mut s = String::with_capacity(32);
    for b in bytes {
        use std::fmt::Write as _;
        let _ = write!(s, "{b:02x}");
    }
    s
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
