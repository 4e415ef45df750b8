//! Filesystem-backed storage for large evidence blobs.
//!
//! The audit ledger inlines small snapshots directly in the entry; blobs
//! over the inline threshold are handed here and referenced by pointer.
//! Evidence ids become file names, so they are validated hard: a single
//! path segment, no traversal, no separators.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::{canonicalize, hash_bytes, CanonicalError};

/// Canonical-size threshold below which callers should inline the blob
/// instead of storing it here.
pub const DEFAULT_INLINE_THRESHOLD: usize = 10 * 1024;

/// Reference to a stored evidence blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidencePointer {
    pub id: String,
    /// Hash of the canonical form of the stored value.
    pub hash: String,
}

/// Stores evidence blobs as canonical JSON files under a fixed root.
pub struct FileSystemEvidenceStore {
    root: PathBuf,
    inline_threshold: usize,
}

impl FileSystemEvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
        }
    }

    pub fn with_inline_threshold(mut self, bytes: usize) -> Self {
        self.inline_threshold = bytes;
        self
    }

    /// Should this value be inlined in the audit snapshot rather than
    /// stored as a file?
    pub fn should_inline(&self, value: &Value) -> bool {
        canonicalize(value).len() <= self.inline_threshold
    }

    /// Persist a blob under `id`, returning its pointer.
    pub async fn put(&self, id: &str, value: &Value) -> Result<EvidencePointer, CanonicalError> {
        let path = self.blob_path(id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = canonicalize(value);
        let hash = hash_bytes(text.as_bytes());
        tokio::fs::write(&path, text.as_bytes()).await?;
        debug!(evidence_id = %id, bytes = text.len(), "Evidence blob stored");
        Ok(EvidencePointer {
            id: id.to_string(),
            hash,
        })
    }

    /// Load a blob by id.
    pub async fn get(&self, id: &str) -> Result<Value, CanonicalError> {
        let path = self.blob_path(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CanonicalError::EvidenceNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|source| CanonicalError::Malformed {
            id: id.to_string(),
            source,
        })
    }

    fn blob_path(&self, id: &str) -> Result<PathBuf, CanonicalError> {
        validate_evidence_id(id)?;
        Ok(self.root.join(format!("{id}.json")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Reject ids that could escape the store root: empty, `.`/`..` segments,
/// path separators, or anything absolute.
fn validate_evidence_id(id: &str) -> Result<(), CanonicalError> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains("..")
        || id.contains('/')
        || id.contains('\\')
        || id.contains(':')
        || id.starts_with('~');
    if invalid {
        return Err(CanonicalError::InvalidEvidenceId(id.to_string()));
    }
    Ok(())
}
