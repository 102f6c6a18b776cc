//! Content-addressed blob store.
//!
//! Blobs live at `<project>/.fst/blobs/<hex>` and are write-once: a blob,
//! once present, is never mutated or deleted. Writes go through a temp file
//! in the same directory followed by `fsync` + `rename`, the standard
//! crash-consistency recipe used for every atomically written artifact in
//! this crate.

use std::fs;
use std::io::{Read, Write as _};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{FstError, Result};
use crate::ids::BlobHash;

/// Content-addressed store for immutable byte blobs.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (or prepare to create) a blob store rooted at `<project>/.fst/blobs`.
    #[must_use]
    pub fn new(blobs_dir: PathBuf) -> Self {
        Self { root: blobs_dir }
    }

    fn path_for(&self, hash: &BlobHash) -> PathBuf {
        self.root.join(hash.as_str())
    }

    /// Returns `true` if a blob with this hash is present.
    #[must_use]
    pub fn exists(&self, hash: &BlobHash) -> bool {
        self.path_for(hash).is_file()
    }

    /// Write `bytes` to the store, returning its content hash.
    ///
    /// Idempotent: writing a hash that is already present is a no-op beyond
    /// the hash computation.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure.
    pub fn put(&self, bytes: &[u8]) -> Result<BlobHash> {
        let hash = BlobHash::from_digest(&Sha256::digest(bytes).into());
        if self.exists(&hash) {
            return Ok(hash);
        }
        fs::create_dir_all(&self.root)?;
        let tmp_path = self.root.join(format!(".{}.tmp", hash.as_str()));
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, self.path_for(&hash))?;
        Ok(hash)
    }

    /// Stream `path`'s contents into the store without loading the whole
    /// file into memory at once.
    ///
    /// # Errors
    /// Returns [`FstError::Storage`] on I/O failure.
    pub fn put_file(&self, path: &Path) -> Result<(BlobHash, u64)> {
        fs::create_dir_all(&self.root)?;
        let mut src = fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let tmp_path = self
            .root
            .join(format!(".incoming-{}.tmp", crate::ids::generate_opaque_id()));
        let mut dst = fs::File::create(&tmp_path)?;
        let mut buf = [0u8; 64 * 1024];
        let mut size: u64 = 0;
        loop {
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            dst.write_all(&buf[..n])?;
            size += n as u64;
        }
        dst.sync_all()?;
        drop(dst);

        let hash = BlobHash::from_digest(&hasher.finalize().into());
        let final_path = self.path_for(&hash);
        if final_path.is_file() {
            // Already present: discard the staged copy, content is identical
            // by construction (content-addressed).
            fs::remove_file(&tmp_path)?;
        } else {
            fs::rename(&tmp_path, &final_path)?;
        }
        Ok((hash, size))
    }

    /// Read a blob's full contents.
    ///
    /// # Errors
    /// Returns [`FstError::NotFound`] if the blob is absent, or
    /// [`FstError::Storage`] on I/O failure.
    pub fn get(&self, hash: &BlobHash) -> Result<Vec<u8>> {
        fs::read(self.path_for(hash)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FstError::NotFound {
                    what: "blob".to_owned(),
                    id: hash.as_str().to_owned(),
                }
            } else {
                FstError::Storage(e)
            }
        })
    }
}
