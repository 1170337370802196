//! The embedder: compute-once, reuse-after cache of sentence embeddings.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Embedding;
use crate::cache::{self, CacheEntry, CacheKey};
use crate::codec::CacheMetadata;
use crate::config::StoreConfig;
use crate::document::{DocumentType, SentenceSource};
use crate::error::{Result, StoreError};
use crate::index::{FlatIndex, KnnGraph, VectorIndex};
use crate::provider::EmbeddingProvider;
use crate::timing::Timings;

/// Namespace of the embedder's own phases in [`Embedder::get_times`].
pub const EMBEDDER_TIMES: &str = "embedder";

/// Namespace of the vector index's phases in [`Embedder::get_times`].
pub const INDEX_TIMES: &str = "index";

/// Lifecycle of an embedder's in-memory view of its cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderState {
    /// Nothing read or written yet.
    Uninitialized,
    /// The index mirrors the persisted cache entry.
    Loaded,
    /// Vectors were added in memory but are not yet persisted.
    Dirty,
}

/// A stored sentence matching a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceMatch {
    /// The sentence text.
    pub sentence: String,

    /// Similarity score reported by the index.
    pub score: f32,

    /// Position of the sentence in the document.
    pub position: usize,
}

/// Embeds a set of sentences and keeps them in a vector index persisted
/// under one cache key.
///
/// The first [`store`](Self::store) for a key embeds and persists; every
/// later one finds the cache entry and only loads it. Queries always reload
/// from disk so they reflect the latest persisted entry.
pub struct Embedder<I: VectorIndex = FlatIndex> {
    entry: CacheEntry,
    provider: Arc<dyn EmbeddingProvider>,
    index: Option<I>,
    times: Timings,
    state: EmbedderState,
}

impl Embedder<FlatIndex> {
    /// Create an embedder for `cache_name` under `cache_dir`.
    ///
    /// No I/O happens until the first store or load.
    pub fn new(
        cache_dir: impl AsRef<Path>,
        cache_name: &str,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        Ok(Self::with_key(cache_dir, CacheKey::new(cache_name)?, provider))
    }

    /// Create an embedder keyed by a document name, path or URL.
    pub fn for_document(
        cache_dir: impl AsRef<Path>,
        reference: &str,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        Ok(Self::with_key(
            cache_dir,
            CacheKey::for_document(reference)?,
            provider,
        ))
    }

    /// Create an embedder from configuration.
    ///
    /// Fails with `ProviderNotConfigured` when the configured provider
    /// cannot run, e.g. the OpenAI provider without an API key.
    pub fn from_config(config: &StoreConfig, key: CacheKey) -> Result<Self> {
        let provider = config.embedding.build_provider();
        if !provider.is_available() {
            return Err(StoreError::ProviderNotConfigured);
        }
        Ok(Self::with_key(&config.cache_dir, key, provider))
    }
}

impl<I: VectorIndex> Embedder<I> {
    /// Create an embedder over any vector index implementation.
    pub fn with_key(
        cache_dir: impl AsRef<Path>,
        key: CacheKey,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            entry: CacheEntry::new(cache_dir.as_ref(), key),
            provider,
            index: None,
            times: Timings::new(),
            state: EmbedderState::Uninitialized,
        }
    }

    /// Key this embedder stores under.
    pub fn key(&self) -> &CacheKey {
        self.entry.key()
    }

    /// Paths of this embedder's cache slots.
    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EmbedderState {
        self.state
    }

    /// The loaded vector index, if any.
    pub fn index(&self) -> Option<&I> {
        self.index.as_ref()
    }

    /// This embedder's own phase totals.
    pub fn times(&self) -> &Timings {
        &self.times
    }

    /// Embedder and index phase totals, keyed `embedder.<phase>` and
    /// `index.<phase>`.
    pub fn get_times(&self) -> Timings {
        let mut merged = Timings::new();
        merged.merge_namespaced(EMBEDDER_TIMES, &self.times);
        if let Some(index) = &self.index {
            merged.merge_namespaced(INDEX_TIMES, index.times());
        }
        merged
    }

    /// Store a document, extracting its sentences only on a cache miss.
    pub async fn store(
        &mut self,
        doc_type: DocumentType,
        reference: &str,
        source: &dyn SentenceSource,
    ) -> Result<()> {
        if self.load_if_cached().await? {
            return Ok(());
        }
        let sentences = source.sentences(doc_type, reference).await?;
        self.embed_and_persist(sentences).await
    }

    /// Store an explicit sentence list under this embedder's key.
    pub async fn store_sentences(&mut self, sentences: &[String]) -> Result<()> {
        if self.load_if_cached().await? {
            return Ok(());
        }
        self.embed_and_persist(sentences.to_vec()).await
    }

    /// Read the cache entry into a fresh index and return its sentences.
    pub async fn load(&mut self) -> Result<Vec<String>> {
        let started = Instant::now();
        let metadata = self.entry.read_metadata().await?;

        let mut index = I::open(self.entry.vectors_path(), metadata.dim);
        index.load().await?;
        if index.len() != metadata.sentences.len() {
            return Err(StoreError::corrupt(
                self.entry.vectors_path(),
                format!(
                    "{} vectors stored for {} sentences",
                    index.len(),
                    metadata.sentences.len()
                ),
            ));
        }

        self.index = Some(index);
        self.state = EmbedderState::Loaded;
        self.times.record_since("load", started);
        debug!(
            "Loaded {} sentences for {}",
            metadata.sentences.len(),
            self.entry.key()
        );
        Ok(metadata.sentences)
    }

    /// The stored sentences, without touching the vector slot.
    pub async fn sentences(&self) -> Result<Vec<String>> {
        Ok(self.entry.read_metadata().await?.sentences)
    }

    /// The `top_k` stored sentences most similar to `query`, best first.
    pub async fn query(&mut self, query: &str, top_k: usize) -> Result<Vec<SentenceMatch>> {
        if top_k == 0 {
            return Err(StoreError::Precondition("top_k must be at least 1".to_string()));
        }

        let started = Instant::now();
        let sentences = self.load().await?;
        let vector = self
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidResponse("no embedding for query".to_string()))?;
        let hits = self.loaded_index()?.query_one(&vector, top_k)?;
        self.times.record_since("query", started);

        hits.into_iter()
            .map(|(position, score)| {
                let sentence = sentences.get(position).cloned().ok_or_else(|| {
                    StoreError::corrupt(
                        self.entry.vectors_path(),
                        format!("index returned unknown position {position}"),
                    )
                })?;
                Ok(SentenceMatch {
                    sentence,
                    score,
                    position,
                })
            })
            .collect()
    }

    /// Every stored sentence's `top_k` nearest neighbors.
    pub async fn knns(&mut self, top_k: usize, as_weights: bool) -> Result<KnnGraph> {
        if top_k == 0 {
            return Err(StoreError::Precondition("top_k must be at least 1".to_string()));
        }

        let started = Instant::now();
        self.load().await?;
        let graph = self.loaded_index()?.all_knns(top_k, as_weights)?;
        self.times.record_since("knns", started);
        Ok(graph)
    }

    /// Delete every cache entry under this embedder's cache root.
    pub async fn clear_caches(&mut self) -> Result<()> {
        cache::clear(self.entry.root()).await?;
        self.index = None;
        self.state = EmbedderState::Uninitialized;
        Ok(())
    }

    async fn load_if_cached(&mut self) -> Result<bool> {
        if !self.entry.is_complete().await {
            info!("Cache miss for {}", self.entry.key());
            return Ok(false);
        }
        info!("Cache hit for {}", self.entry.key());
        self.load().await?;
        Ok(true)
    }

    async fn embed_and_persist(&mut self, sentences: Vec<String>) -> Result<()> {
        if sentences.is_empty() {
            return Err(StoreError::Precondition(format!(
                "no sentences to store for {}",
                self.entry.key()
            )));
        }

        self.entry.begin_write().await?;
        let embeddings = self.embed(&sentences).await?;
        let dim = embeddings.first().map_or(0, Vec::len);
        if dim == 0 {
            return Err(StoreError::InvalidResponse(
                "provider returned zero-width embeddings".to_string(),
            ));
        }

        let index = self.index.insert(I::open(self.entry.vectors_path(), dim));
        index.add(embeddings)?;
        self.state = EmbedderState::Dirty;

        // Vectors first: the metadata slot completes the entry.
        index.save().await?;
        self.entry
            .write_metadata(&CacheMetadata::new(dim, sentences))
            .await?;

        self.state = EmbedderState::Loaded;
        info!(
            "Stored {} vectors of width {dim} for {}",
            self.index.as_ref().map_or(0, VectorIndex::len),
            self.entry.key()
        );
        Ok(())
    }

    async fn embed(&mut self, sentences: &[String]) -> Result<Vec<Embedding>> {
        let started = Instant::now();
        let embeddings = self.provider.embed(sentences).await?;
        self.times.record_since("embed", started);

        if embeddings.len() != sentences.len() {
            return Err(StoreError::InvalidResponse(format!(
                "{} embeddings for {} sentences",
                embeddings.len(),
                sentences.len()
            )));
        }
        Ok(embeddings)
    }

    fn loaded_index(&mut self) -> Result<&mut I> {
        let slot = self.entry.vectors_path();
        self.index.as_mut().ok_or(StoreError::NotFound { slot })
    }
}
