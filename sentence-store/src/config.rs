//! Configuration for the sentence store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fastembed::FastEmbedProvider;
use crate::provider::{
    DeviceProbe, EmbeddingProvider, EnvProbe, FixedProbe, HashingProvider, OpenAIProvider,
};

/// Default cache root, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = "./SENT_STORE_CACHE/";

/// Default staging directory for uploaded documents.
pub const DEFAULT_UPLOAD_DIR: &str = "./UPLOAD_DIR/";

/// Configuration for the sentence store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory holding every cache entry.
    pub cache_dir: PathBuf,

    /// Directory where source documents are staged.
    pub upload_dir: PathBuf,

    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            embedding: EmbeddingConfig::default(),
        }
    }

    /// Read a TOML configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse a TOML configuration document.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Set the upload directory.
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    /// Set the embedding configuration.
    pub fn with_embedding(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = config;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DIR)
    }
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which provider to use.
    pub provider: EmbeddingProviderType,

    /// Model for the OpenAI provider.
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    pub base_url: Option<String>,

    /// Output width of the hashing provider.
    pub dimension: usize,

    /// Accelerator policy for local providers.
    pub accelerator: AcceleratorPolicy,

    /// Where the fastembed provider keeps downloaded model files.
    pub model_cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::FastEmbed,
            model: None,
            base_url: None,
            dimension: HashingProvider::DEFAULT_DIMENSION,
            accelerator: AcceleratorPolicy::Auto,
            model_cache_dir: None,
        }
    }
}

impl EmbeddingConfig {
    /// Build the configured provider.
    pub fn build_provider(&self) -> Arc<dyn EmbeddingProvider> {
        match self.provider {
            EmbeddingProviderType::FastEmbed => {
                let provider = FastEmbedProvider::with_probe(self.accelerator.probe());
                match &self.model_cache_dir {
                    Some(dir) => Arc::new(provider.with_cache_dir(dir)),
                    None => Arc::new(provider),
                }
            }
            EmbeddingProviderType::Hashing => Arc::new(HashingProvider::with_probe(
                self.dimension,
                self.accelerator.probe(),
            )),
            EmbeddingProviderType::OpenAI => {
                let mut provider = OpenAIProvider::new();
                if let Some(model) = &self.model {
                    provider = provider.with_model(model);
                }
                if let Some(url) = &self.base_url {
                    provider = provider.with_base_url(url);
                }
                Arc::new(provider)
            }
        }
    }
}

/// Type of embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderType {
    /// Local all-MiniLM-L6-v2 through fastembed.
    #[serde(rename = "fastembed")]
    FastEmbed,
    /// Deterministic feature-hashing model.
    Hashing,
    /// OpenAI embeddings API.
    #[serde(rename = "openai")]
    OpenAI,
}

/// Whether local providers may use an accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceleratorPolicy {
    /// Use one if the environment exposes it.
    #[default]
    Auto,
    /// Always report an accelerator.
    Force,
    /// Never use an accelerator.
    Off,
}

impl AcceleratorPolicy {
    fn probe(self) -> Box<dyn DeviceProbe> {
        match self {
            Self::Auto => Box::new(EnvProbe),
            Self::Force => Box::new(FixedProbe(true)),
            Self::Off => Box::new(FixedProbe(false)),
        }
    }
}
