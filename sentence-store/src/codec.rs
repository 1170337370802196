//! Encoding of the metadata slot.
//!
//! The metadata slot holds the embedding width and the ordered sentence
//! list. Position `i` in the list is the sentence behind vector `i` in the
//! vector slot, so the order is part of the format.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Contents of a metadata slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Embedding dimensionality, always > 0.
    pub dim: usize,

    /// Sentences in vector-index order.
    pub sentences: Vec<String>,
}

impl CacheMetadata {
    /// Metadata for `sentences` embedded at width `dim`.
    pub fn new(dim: usize, sentences: Vec<String>) -> Self {
        Self { dim, sentences }
    }
}

/// Persist metadata to `path` through a temp file and rename.
///
/// A reader sees either the previous file or the complete new one.
pub async fn write_metadata(path: &Path, metadata: &CacheMetadata) -> Result<()> {
    if metadata.dim == 0 {
        return Err(StoreError::Precondition(
            "embedding dimension must be greater than zero".to_string(),
        ));
    }
    let content = serde_json::to_string_pretty(metadata)?;
    write_atomic(path, content.as_bytes()).await?;
    debug!(
        "Wrote metadata for {} sentences to {}",
        metadata.sentences.len(),
        path.display()
    );
    Ok(())
}

/// Read metadata from `path`.
///
/// Fails with `NotFound` when the slot is absent and `Corrupt` when it
/// does not decode.
pub async fn read_metadata(path: &Path) -> Result<CacheMetadata> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound {
                slot: path.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let metadata: CacheMetadata =
        serde_json::from_slice(&content).map_err(|e| StoreError::corrupt(path, e))?;
    if metadata.dim == 0 {
        return Err(StoreError::corrupt(path, "embedding dimension is zero"));
    }
    Ok(metadata)
}

/// Whether a slot exists. Never fails; unreadable paths count as absent.
pub async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Write `bytes` to `path` via a sibling temp file, creating parent
/// directories as needed.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_path(path);
    fs::write(&temp_path, bytes).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
