//! Cache keys, cache entry layout and cache invalidation.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{info, warn};

use crate::codec::{self, CacheMetadata};
use crate::error::{Result, StoreError};

/// Suffix of the metadata slot.
pub const METADATA_SUFFIX: &str = ".json";

/// Suffix of the vector slot.
pub const VECTORS_SUFFIX: &str = ".bin";

/// Digest bytes appended (as hex) by [`CacheKey::for_document`].
const DIGEST_BYTES: usize = 6;

/// Name of one logical embedding store.
///
/// Always safe to use as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Use `name` as-is. It must already be a safe file name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(StoreError::Precondition(
                "cache name must not be empty".to_string(),
            ));
        }
        if name == "." || name == ".." || !name.chars().all(is_safe_char) {
            return Err(StoreError::Precondition(format!(
                "cache name is not path-safe: {name:?}"
            )));
        }
        Ok(Self(name))
    }

    /// Derive a key from a document name, path or URL.
    ///
    /// The readable part is the sanitized last path segment; the digest of
    /// the full reference keeps `a/doc.txt` and `b/doc.txt` apart.
    pub fn for_document(reference: &str) -> Result<Self> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(StoreError::Precondition(
                "document reference must not be empty".to_string(),
            ));
        }

        let stem = trimmed
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default();
        let mut readable: String = stem
            .chars()
            .map(|c| if is_safe_char(c) { c } else { '_' })
            .collect();
        if readable.trim_matches('.').is_empty() {
            readable = "doc".to_string();
        }

        let digest = Sha256::digest(trimmed.as_bytes());
        let hex: String = digest[..DIGEST_BYTES]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        Ok(Self(format!("{readable}-{hex}")))
    }

    /// The key as a file name component.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// The paired metadata and vector slots of one cache key.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    root: PathBuf,
    key: CacheKey,
}

impl CacheEntry {
    /// Entry for `key` under the cache root `root`.
    pub fn new(root: impl Into<PathBuf>, key: CacheKey) -> Self {
        Self {
            root: root.into(),
            key,
        }
    }

    /// Key naming this entry.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Cache root holding this entry's slots.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the metadata slot.
    pub fn metadata_path(&self) -> PathBuf {
        self.slot(METADATA_SUFFIX)
    }

    /// Path of the vector slot.
    pub fn vectors_path(&self) -> PathBuf {
        self.slot(VECTORS_SUFFIX)
    }

    fn slot(&self, suffix: &str) -> PathBuf {
        self.root.join(format!("{}{suffix}", self.key))
    }

    /// Whether both slots exist.
    ///
    /// A lone slot is a partial write and counts as absent.
    pub async fn is_complete(&self) -> bool {
        let metadata = codec::exists(&self.metadata_path()).await;
        let vectors = codec::exists(&self.vectors_path()).await;
        if metadata != vectors {
            warn!(
                "Partial cache entry for {} (metadata: {metadata}, vectors: {vectors})",
                self.key
            );
        }
        metadata && vectors
    }

    /// Start rewriting this entry by dropping any leftover metadata slot.
    ///
    /// Until the new metadata lands, the entry is partial, so a fresh vector
    /// slot can never pair with sentences from an earlier write.
    pub async fn begin_write(&self) -> Result<()> {
        let metadata = self.metadata_path();
        match fs::remove_file(&metadata).await {
            Ok(()) => {
                warn!("Removed stale metadata slot {}", metadata.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the metadata slot.
    pub async fn read_metadata(&self) -> Result<CacheMetadata> {
        codec::read_metadata(&self.metadata_path()).await
    }

    /// Atomically replace the metadata slot.
    pub async fn write_metadata(&self, metadata: &CacheMetadata) -> Result<()> {
        codec::write_metadata(&self.metadata_path(), metadata).await
    }
}

/// Delete everything under a cache root.
///
/// Removing a root that does not exist is a no-op.
pub async fn clear(root: impl AsRef<Path>) -> Result<()> {
    let root = root.as_ref();
    match fs::remove_dir_all(root).await {
        Ok(()) => {
            info!("Cleared cache directory {}", root.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
