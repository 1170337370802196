//! # Sentence Store
//!
//! This crate turns a document (or any list of sentences) into vector
//! embeddings, persists them under a cache key, and retrieves the sentences
//! most similar to a query.
//!
//! ## Features
//!
//! - **Compute once**: a cache key is embedded on its first store and only
//!   loaded afterwards
//! - **Paired cache entries**: a metadata slot (width + ordered sentences)
//!   and a vector slot, written together
//! - **Pluggable providers**: local MiniLM through fastembed, an
//!   OpenAI-compatible API, or a deterministic hashing model
//! - **Phase timings**: per-phase wall-clock totals for the embedder and its
//!   index
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Sentence Store                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  SentenceSource ──► Embedder ──► EmbeddingProvider              │
//! │                        │                                        │
//! │                        ▼                                        │
//! │            CacheEntry (metadata) + VectorIndex (vectors)        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sentence_store::{Embedder, FastEmbedProvider};
//!
//! let mut embedder = Embedder::new("./SENT_STORE_CACHE", "notes", Arc::new(FastEmbedProvider::new()))?;
//! embedder.store_sentences(&sentences).await?;
//! let answers = embedder.query("Who sleeps on the mat?", 2).await?;
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod document;
pub mod embedder;
pub mod error;
pub mod fastembed;
pub mod index;
pub mod provider;
pub mod similarity;
pub mod timing;

pub use cache::{CacheEntry, CacheKey, clear};
pub use codec::CacheMetadata;
pub use config::{EmbeddingConfig, EmbeddingProviderType, StoreConfig};
pub use document::{
    DocumentType, SentenceSource, TextSentenceSource, local_document_key, stage_upload,
};
pub use embedder::{Embedder, EmbedderState, SentenceMatch};
pub use error::{Result, StoreError};
pub use self::fastembed::FastEmbedProvider;
pub use index::{FlatIndex, KnnGraph, VectorIndex};
pub use provider::{
    ComputeDevice, DeviceProbe, EmbeddingProvider, EnvProbe, FixedProbe, HashingProvider,
    OpenAIProvider,
};
pub use timing::Timings;

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
