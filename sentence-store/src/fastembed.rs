//! Local sentence-transformer embeddings through fastembed.
//!
//! Runs `all-MiniLM-L6-v2` on ONNX Runtime. The model files are fetched and
//! the session is built on the first non-empty batch, not at construction.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use ::fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::Embedding;
use crate::error::{Result, StoreError};
use crate::provider::{ComputeDevice, DeviceProbe, EmbeddingProvider, EnvProbe};

/// Hugging Face name of the model this provider runs.
pub const MINILM_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Output width of `all-MiniLM-L6-v2`.
pub const MINILM_DIMENSION: usize = 384;

/// Local MiniLM embedding provider backed by fastembed.
pub struct FastEmbedProvider {
    cache_dir: Option<PathBuf>,
    probe: Box<dyn DeviceProbe>,
    device: OnceLock<ComputeDevice>,
    model: OnceCell<Arc<Mutex<TextEmbedding>>>,
}

impl FastEmbedProvider {
    /// Create a provider that probes the environment for an accelerator.
    pub fn new() -> Self {
        Self::with_probe(Box::new(EnvProbe))
    }

    /// Create a provider with an injected device probe.
    pub fn with_probe(probe: Box<dyn DeviceProbe>) -> Self {
        Self {
            cache_dir: None,
            probe,
            device: OnceLock::new(),
            model: OnceCell::new(),
        }
    }

    /// Directory where downloaded model files are kept.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Whether the ONNX session has been built.
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    async fn model_handle(&self) -> Result<Arc<Mutex<TextEmbedding>>> {
        self.model
            .get_or_try_init(|| async {
                let cache_dir = self.cache_dir.clone();
                let device = self.device();
                let started = Instant::now();
                let model = tokio::task::spawn_blocking(move || {
                    TextEmbedding::try_new(init_options(cache_dir))
                })
                .await
                .map_err(|e| StoreError::Model(e.to_string()))?
                .map_err(|e| StoreError::Model(e.to_string()))?;
                info!(
                    "Loaded {MINILM_MODEL} on {device:?} in {:.2}s",
                    started.elapsed().as_secs_f64()
                );
                Ok(Arc::new(Mutex::new(model)))
            })
            .await
            .cloned()
    }
}

fn init_options(cache_dir: Option<PathBuf>) -> InitOptions {
    let options =
        InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false);
    match cache_dir {
        Some(dir) => options.with_cache_dir(dir),
        None => options,
    }
}

impl Default for FastEmbedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn name(&self) -> &str {
        "fastembed"
    }

    fn model(&self) -> &str {
        MINILM_MODEL
    }

    fn device(&self) -> ComputeDevice {
        *self.device.get_or_init(|| {
            match ComputeDevice::select(self.probe.as_ref()) {
                ComputeDevice::Accelerated => {
                    // fastembed's default build registers only the CPU
                    // execution provider.
                    warn!("Accelerator reported but no GPU execution provider is built in; using CPU");
                    ComputeDevice::Cpu
                }
                device => device,
            }
        })
    }

    async fn embed(&self, sentences: &[String]) -> Result<Vec<Embedding>> {
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model_handle().await?;
        debug!("Embedding {} sentences with {MINILM_MODEL}", sentences.len());

        let batch = sentences.to_vec();
        tokio::task::spawn_blocking(move || {
            let guard = model
                .lock()
                .map_err(|_| StoreError::Model("embedding model lock poisoned".to_string()))?;
            guard
                .embed(batch, None)
                .map_err(|e| StoreError::Model(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Model(e.to_string()))?
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FixedProbe;
    use crate::similarity::cosine_similarity;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_construction_loads_nothing() {
        let provider = FastEmbedProvider::with_probe(Box::new(FixedProbe(false)));
        assert_eq!(provider.name(), "fastembed");
        assert_eq!(provider.model(), MINILM_MODEL);
        assert!(!provider.is_loaded());
    }

    #[test]
    fn test_device_follows_probe() {
        let cpu = FastEmbedProvider::with_probe(Box::new(FixedProbe(false)));
        let gpu = FastEmbedProvider::with_probe(Box::new(FixedProbe(true)));
        assert_eq!(cpu.device(), ComputeDevice::Cpu);
        assert_eq!(gpu.device(), ComputeDevice::Cpu);
        assert!(!gpu.is_loaded());
    }

    #[tokio::test]
    async fn test_empty_batch_skips_model_load() {
        let provider = FastEmbedProvider::with_probe(Box::new(FixedProbe(false)));
        let embeddings = provider.embed(&[]).await.unwrap();
        assert!(embeddings.is_empty());
        assert!(!provider.is_loaded());
    }

    #[tokio::test]
    #[ignore = "downloads the all-MiniLM-L6-v2 model"]
    async fn test_minilm_ranks_by_meaning() {
        let provider = FastEmbedProvider::with_probe(Box::new(FixedProbe(false)));
        let sentences: Vec<String> = [
            "A feline naps",
            "The cat sits on the mat",
            "The phone rings",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let embeddings = provider.embed(&sentences).await.unwrap();

        assert_eq!(embeddings.len(), 3);
        assert_eq!(embeddings[0].len(), MINILM_DIMENSION);
        let cat = cosine_similarity(&embeddings[0], &embeddings[1]).unwrap();
        let phone = cosine_similarity(&embeddings[0], &embeddings[2]).unwrap();
        assert!(cat > phone, "cat={cat} phone={phone}");
    }
}
