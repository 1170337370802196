//! Vector index for nearest-neighbor lookups.
//!
//! The [`VectorIndex`] trait is the narrow surface the embedder relies on:
//! add vectors, persist and restore them, and answer k-nearest-neighbor
//! queries. [`FlatIndex`] is an exhaustive cosine-similarity implementation.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use bincode::config::standard as bincode_config;
use bincode::{Decode, Encode, decode_from_slice, encode_to_vec};
use tokio::fs;
use tracing::{debug, info};

use crate::Embedding;
use crate::codec;
use crate::error::{Result, StoreError};
use crate::similarity::{dot_product, normalize, top_k};
use crate::timing::Timings;

/// All-pairs k-nearest-neighbor structure, one row per stored vector.
#[derive(Debug, Clone, PartialEq)]
pub enum KnnGraph {
    /// Neighbor positions only, best first.
    Indices(Vec<Vec<usize>>),

    /// Neighbor positions with their similarity weights, best first.
    Weighted(Vec<Vec<(usize, f32)>>),
}

impl KnnGraph {
    /// Number of rows (stored vectors).
    pub fn len(&self) -> usize {
        match self {
            Self::Indices(rows) => rows.len(),
            Self::Weighted(rows) => rows.len(),
        }
    }

    /// Whether the graph has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Neighbor positions of row `i`, regardless of representation.
    pub fn neighbors(&self, i: usize) -> Option<Vec<usize>> {
        match self {
            Self::Indices(rows) => rows.get(i).cloned(),
            Self::Weighted(rows) => rows
                .get(i)
                .map(|row| row.iter().map(|(j, _)| *j).collect()),
        }
    }
}

/// Storage and search over a set of vectors bound to one file.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create an empty index bound to `path` with the given width.
    fn open(path: PathBuf, dimension: usize) -> Self
    where
        Self: Sized;

    /// Width of every stored vector.
    fn dimension(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors; their positions continue from the current length.
    fn add(&mut self, vectors: Vec<Embedding>) -> Result<()>;

    /// The `k` stored vectors most similar to `query`, best first, as
    /// `(position, score)`. Returns fewer than `k` when fewer are stored.
    fn query_one(&mut self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>>;

    /// Every stored vector's own `k` nearest neighbors.
    fn all_knns(&mut self, k: usize, as_weights: bool) -> Result<KnnGraph>;

    /// Write the vectors to the bound file.
    async fn save(&mut self) -> Result<()>;

    /// Replace the in-memory vectors with the bound file's contents.
    async fn load(&mut self) -> Result<()>;

    /// Time spent inside the index, per phase.
    fn times(&self) -> &Timings;
}

/// On-disk layout of the vector slot.
#[derive(Debug, Encode, Decode)]
struct VectorFile {
    version: u32,
    dimension: u64,
    vectors: Vec<Vec<f32>>,
}

impl VectorFile {
    const VERSION: u32 = 1;
}

/// Exhaustive cosine-similarity index.
///
/// Vectors are normalized on insert so scoring is a dot product. Ties go to
/// the lower position.
pub struct FlatIndex {
    path: PathBuf,
    dimension: usize,
    vectors: Vec<Embedding>,
    times: Timings,
}

impl FlatIndex {
    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Embedding>> {
        let (file, _): (VectorFile, usize) = decode_from_slice(bytes, bincode_config())
            .map_err(|e| StoreError::corrupt(&self.path, e))?;

        if file.version != VectorFile::VERSION {
            return Err(StoreError::corrupt(
                &self.path,
                format!("unsupported vector file version {}", file.version),
            ));
        }
        if file.dimension != self.dimension as u64 {
            return Err(StoreError::corrupt(
                &self.path,
                format!(
                    "vector width {} does not match declared dimension {}",
                    file.dimension, self.dimension
                ),
            ));
        }
        if let Some(bad) = file.vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(StoreError::corrupt(
                &self.path,
                format!("vector of width {} in a {}-d file", bad.len(), self.dimension),
            ));
        }
        Ok(file.vectors)
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    fn open(path: PathBuf, dimension: usize) -> Self {
        Self {
            path,
            dimension,
            vectors: Vec::new(),
            times: Timings::new(),
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn add(&mut self, vectors: Vec<Embedding>) -> Result<()> {
        let started = Instant::now();
        for v in &vectors {
            self.check_dimension(v.len())?;
        }

        let count = vectors.len();
        self.vectors.extend(vectors.into_iter().map(|mut v| {
            normalize(&mut v);
            v
        }));
        self.times.record_since("add", started);
        debug!("Added {count} vectors to index ({} total)", self.vectors.len());
        Ok(())
    }

    fn query_one(&mut self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        self.check_dimension(query.len())?;
        let started = Instant::now();

        let mut query = query.to_vec();
        normalize(&mut query);
        let scores = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, dot_product(&query, v)));
        let results = top_k(scores, k);

        self.times.record_since("search", started);
        Ok(results)
    }

    fn all_knns(&mut self, k: usize, as_weights: bool) -> Result<KnnGraph> {
        let started = Instant::now();

        let rows: Vec<Vec<(usize, f32)>> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let scores = self
                    .vectors
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(j, other)| (j, dot_product(v, other)));
                top_k(scores, k)
            })
            .collect();

        let graph = if as_weights {
            KnnGraph::Weighted(rows)
        } else {
            KnnGraph::Indices(
                rows.into_iter()
                    .map(|row| row.into_iter().map(|(j, _)| j).collect())
                    .collect(),
            )
        };

        self.times.record_since("all_knns", started);
        Ok(graph)
    }

    async fn save(&mut self) -> Result<()> {
        let started = Instant::now();
        let file = VectorFile {
            version: VectorFile::VERSION,
            dimension: self.dimension as u64,
            vectors: self.vectors.clone(),
        };
        let bytes = encode_to_vec(&file, bincode_config())?;
        codec::write_atomic(&self.path, &bytes).await?;

        self.times.record_since("save", started);
        info!(
            "Saved {} vectors ({} bytes) to {}",
            self.vectors.len(),
            bytes.len(),
            self.path.display()
        );
        Ok(())
    }

    async fn load(&mut self) -> Result<()> {
        let started = Instant::now();
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    slot: self.path.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        self.vectors = self.decode(&bytes)?;

        self.times.record_since("load", started);
        debug!(
            "Loaded {} vectors from {}",
            self.vectors.len(),
            self.path.display()
        );
        Ok(())
    }

    fn times(&self) -> &Timings {
        &self.times
    }
}
