//! Embedding providers.
//!
//! A provider turns an ordered batch of sentences into one vector per
//! sentence, in the same order. Supports a remote OpenAI-compatible API and
//! a deterministic hashing model. The local MiniLM model lives in
//! [`crate::fastembed`].

use std::sync::OnceLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{Result, StoreError};

/// Where embedding compute runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDevice {
    /// An accelerator (GPU) on this machine.
    Accelerated,
    /// General-purpose CPU on this machine.
    Cpu,
    /// Compute happens behind a network API.
    Remote,
}

impl ComputeDevice {
    /// Pick the accelerator when the probe reports one, otherwise the CPU.
    pub fn select(probe: &dyn DeviceProbe) -> Self {
        if probe.accelerator_available() {
            Self::Accelerated
        } else {
            Self::Cpu
        }
    }
}

/// Capability query for accelerated compute.
pub trait DeviceProbe: Send + Sync {
    /// Whether an accelerator can be used.
    fn accelerator_available(&self) -> bool;
}

/// A probe with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub bool);

impl DeviceProbe for FixedProbe {
    fn accelerator_available(&self) -> bool {
        self.0
    }
}

/// Reports an accelerator when `CUDA_VISIBLE_DEVICES` names at least one
/// device.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvProbe;

impl EnvProbe {
    fn visible_devices(value: Option<&str>) -> bool {
        match value.map(str::trim) {
            None | Some("") | Some("-1") => false,
            Some(_) => true,
        }
    }
}

impl DeviceProbe for EnvProbe {
    fn accelerator_available(&self) -> bool {
        Self::visible_devices(std::env::var("CUDA_VISIBLE_DEVICES").ok().as_deref())
    }
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Get the model this provider embeds with.
    fn model(&self) -> &str;

    /// Device the provider computes on.
    fn device(&self) -> ComputeDevice;

    /// Embed a batch of sentences.
    ///
    /// Returns one vector per sentence in input order. An empty batch
    /// yields an empty result without doing any work.
    async fn embed(&self, sentences: &[String]) -> Result<Vec<Embedding>>;

    /// Check if the provider is available (API key set, etc.).
    fn is_available(&self) -> bool;
}

/// OpenAI embedding provider.
pub struct OpenAIProvider {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Default model.
    default_model: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            default_model: "text-embedding-3-small".to_string(),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.default_model
    }

    fn device(&self) -> ComputeDevice {
        ComputeDevice::Remote
    }

    async fn embed(&self, sentences: &[String]) -> Result<Vec<Embedding>> {
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let api_key = self
            .api_key
            .as_ref()
            .ok_or(StoreError::ProviderNotConfigured)?;

        debug!(
            "Generating batch embeddings for {} texts with model: {}",
            sentences.len(),
            self.default_model
        );

        let body = serde_json::json!({
            "input": sentences,
            "model": self.default_model
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(StoreError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StoreError::ApiRequest(format!("API error: {error_text}")));
        }

        let mut result: OpenAIEmbeddingResponse = response.json().await?;

        if result.data.len() != sentences.len() {
            return Err(StoreError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                sentences.len(),
                result.data.len()
            )));
        }

        // The API does not promise response order.
        result.data.sort_by_key(|item| item.index);
        let embeddings: Vec<Embedding> = result.data.into_iter().map(|d| d.embedding).collect();

        info!(
            "Generated {} batch embeddings with {}",
            embeddings.len(),
            result.model
        );

        Ok(embeddings)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Deterministic feature-hashing model for tests and offline runs.
///
/// Each token (lower-cased alphanumeric run, trailing plural `s` dropped)
/// adds +1 or -1 to one bucket, both chosen by its FNV-1a hash. Only
/// sentences sharing words score above zero, so it ranks by vocabulary
/// overlap, not meaning.
pub struct HashingProvider {
    dimension: usize,
    probe: Box<dyn DeviceProbe>,
    model: OnceLock<HashingModel>,
}

/// State resolved on first use.
#[derive(Debug)]
struct HashingModel {
    device: ComputeDevice,
}

impl HashingProvider {
    /// Same width as the MiniLM model, so caches stay interchangeable in shape.
    pub const DEFAULT_DIMENSION: usize = 384;

    /// Create a provider that probes the environment for an accelerator.
    pub fn new(dimension: usize) -> Self {
        Self::with_probe(dimension, Box::new(EnvProbe))
    }

    /// Create a provider with an injected device probe.
    pub fn with_probe(dimension: usize, probe: Box<dyn DeviceProbe>) -> Self {
        Self {
            dimension: dimension.max(1),
            probe,
            model: OnceLock::new(),
        }
    }

    /// Output width.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_handle(&self) -> &HashingModel {
        self.model.get_or_init(|| {
            let device = ComputeDevice::select(self.probe.as_ref());
            info!(
                "Loaded hashing embedding model ({} dims) on {device:?}",
                self.dimension
            );
            HashingModel { device }
        })
    }

    fn embed_one(&self, sentence: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(sentence) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            vector[bucket] += sign;
        }
        vector
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        "fnv-token-hashing"
    }

    fn device(&self) -> ComputeDevice {
        self.model_handle().device
    }

    async fn embed(&self, sentences: &[String]) -> Result<Vec<Embedding>> {
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model_handle();
        debug!(
            "Embedding {} sentences on {:?}",
            sentences.len(),
            model.device
        );
        Ok(sentences.iter().map(|s| self.embed_one(s)).collect())
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut word = word.to_lowercase();
            if word.chars().count() > 3 && word.ends_with('s') && !word.ends_with("ss") {
                word.pop();
            }
            word
        })
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;

    bytes.iter().fold(OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_strips_plurals() {
        let tokens: Vec<String> = tokenize("Who sleeps on the mat? The glass rings.").collect();
        assert_eq!(
            tokens,
            vec!["who", "sleep", "on", "the", "mat", "the", "glass", "ring"]
        );
    }

    #[test]
    fn test_env_probe_parsing() {
        assert!(!EnvProbe::visible_devices(None));
        assert!(!EnvProbe::visible_devices(Some("")));
        assert!(!EnvProbe::visible_devices(Some("-1")));
        assert!(EnvProbe::visible_devices(Some("0,1")));
    }

    #[test]
    fn test_device_selection_follows_probe() {
        let gpu = HashingProvider::with_probe(8, Box::new(FixedProbe(true)));
        let cpu = HashingProvider::with_probe(8, Box::new(FixedProbe(false)));
        assert_eq!(gpu.device(), ComputeDevice::Accelerated);
        assert_eq!(cpu.device(), ComputeDevice::Cpu);
        assert_eq!(OpenAIProvider::new().device(), ComputeDevice::Remote);
    }

    #[tokio::test]
    async fn test_hashing_embed_empty_batch() {
        let provider = HashingProvider::with_probe(16, Box::new(FixedProbe(false)));
        let embeddings = provider.embed(&[]).await.unwrap();
        assert!(embeddings.is_empty());
    }

    #[tokio::test]
    async fn test_hashing_embed_is_deterministic_and_device_independent() {
        let gpu = HashingProvider::with_probe(64, Box::new(FixedProbe(true)));
        let cpu = HashingProvider::with_probe(64, Box::new(FixedProbe(false)));
        let sentences = strings(&["The cat sits on the mat", "The phone rings"]);

        let a = gpu.embed(&sentences).await.unwrap();
        let b = cpu.embed(&sentences).await.unwrap();

        assert_eq!(a.len(), 2);
        assert_eq!(a[0].len(), 64);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hashing_shared_words_are_closer() {
        let provider = HashingProvider::default();
        let embeddings = provider
            .embed(&strings(&[
                "Who sleeps on the mat?",
                "The cat sits on the mat",
                "The rocket explodes",
            ]))
            .await
            .unwrap();

        let near = cosine_similarity(&embeddings[0], &embeddings[1]).unwrap();
        let far = cosine_similarity(&embeddings[0], &embeddings[2]).unwrap();
        assert!(near > far, "near={near} far={far}");
    }

    #[tokio::test]
    async fn test_openai_empty_batch_makes_no_request() {
        let server = MockServer::start().await;
        let provider = OpenAIProvider::new()
            .with_api_key("test-key")
            .with_base_url(server.uri());

        let embeddings = provider.embed(&[]).await.unwrap();

        assert!(embeddings.is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_openai_batch_is_returned_in_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "embedding": [0.0, 1.0], "index": 1 },
                    { "embedding": [1.0, 0.0], "index": 0 }
                ],
                "model": "text-embedding-3-small"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new()
            .with_api_key("test-key")
            .with_base_url(server.uri());
        let embeddings = provider.embed(&strings(&["first", "second"])).await.unwrap();

        assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_openai_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new()
            .with_api_key("test-key")
            .with_base_url(server.uri());
        let err = provider.embed(&strings(&["x"])).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::RateLimited {
                retry_after_secs: 7
            }
        ));
    }

    #[tokio::test]
    async fn test_openai_without_key_is_not_configured() {
        let provider = OpenAIProvider {
            api_key: None,
            ..OpenAIProvider::new()
        };
        let err = provider.embed(&strings(&["x"])).await.unwrap_err();
        assert!(matches!(err, StoreError::ProviderNotConfigured));
    }
}
