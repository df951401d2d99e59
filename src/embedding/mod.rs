//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: fails every call; used when embeddings are not configured.
//! - **[`HttpEmbedder`]**: calls the OpenAI embeddings API or a local Ollama
//!   instance's `/api/embed` endpoint, with batching, retry, and backoff.
//! - **`LocalEmbedder`**: runs models locally via fastembed (feature `local-embeddings`).
//! - **[`DeadlineEmbedder`]**: wraps any embedder with a per-call deadline.
//!
//! Also provides the vector utilities used by the SQLite vector store:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Retries can take minutes; [`create_embedder`] always wraps the provider
//! in a [`DeadlineEmbedder`] so a hung provider cannot stall a run forever.

#[cfg(feature = "local-embeddings")]
mod local;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{IndexError, Result};

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// A text-to-vector model.
///
/// `embed` returns exactly one vector per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| IndexError::ProviderError("empty embedding response".to_string()))
}

/// Create the configured embedder, wrapped in a [`DeadlineEmbedder`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`HttpEmbedder`] against the OpenAI API |
/// | `"ollama"` | [`HttpEmbedder`] against Ollama |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let inner: Box<dyn Embedder> = match config.provider.as_str() {
        "disabled" => Box::new(DisabledEmbedder),
        "openai" => Box::new(HttpEmbedder::openai(config)?),
        "ollama" => Box::new(HttpEmbedder::ollama(config)?),
        #[cfg(feature = "local-embeddings")]
        "local" => Box::new(LocalEmbedder::new(config)?),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => {
            return Err(IndexError::InvalidConfig(
                "local embedding provider requires --features local-embeddings".to_string(),
            ))
        }
        other => {
            return Err(IndexError::InvalidConfig(format!(
                "unknown embedding provider: {}",
                other
            )))
        }
    };

    Ok(Arc::new(DeadlineEmbedder::new(
        inner,
        Duration::from_secs(config.call_deadline_secs),
    )))
}

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`; every call fails with
/// [`IndexError::ProviderUnavailable`].
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(IndexError::ProviderUnavailable(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ Deadline wrapper ============

/// Fails a call with [`IndexError::Deadline`] if the inner embedder has not
/// answered within `deadline`, retries included.
pub struct DeadlineEmbedder {
    inner: Box<dyn Embedder>,
    deadline: Duration,
}

impl DeadlineEmbedder {
    pub fn new(inner: Box<dyn Embedder>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl Embedder for DeadlineEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match tokio::time::timeout(self.deadline, self.inner.embed(texts)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    model = self.inner.model_name(),
                    deadline_secs = self.deadline.as_secs(),
                    "embedding call timed out"
                );
                Err(IndexError::Deadline(self.deadline.as_secs()))
            }
        }
    }
}

// ============ HTTP providers ============

enum Api {
    /// `POST https://api.openai.com/v1/embeddings`. The key is read at
    /// construction; a missing key only fails when embedding is attempted.
    OpenAi { api_key: Option<String> },
    /// `POST {url}/api/embed` on an Ollama instance.
    Ollama { url: String },
}

/// Embedding provider backed by a remote HTTP API.
pub struct HttpEmbedder {
    api: Api,
    client: reqwest::Client,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl HttpEmbedder {
    /// Requires `model` and `dims`; the key comes from `OPENAI_API_KEY`.
    pub fn openai(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if api_key.is_none() {
            warn!("OPENAI_API_KEY is not set; embedding calls will fail");
        }
        Self::build(Api::OpenAi { api_key }, config)
    }

    /// Requires `model` and `dims`; `url` defaults to `http://localhost:11434`.
    pub fn ollama(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Self::build(
            Api::Ollama {
                url: url.trim_end_matches('/').to_string(),
            },
            config,
        )
    }

    fn build(api: Api, config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            IndexError::InvalidConfig(format!(
                "embedding.model required for {} provider",
                config.provider
            ))
        })?;
        let dims = config.dims.filter(|d| *d > 0).ok_or_else(|| {
            IndexError::InvalidConfig(format!(
                "embedding.dims required for {} provider",
                config.provider
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IndexError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            api,
            client,
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    fn provider(&self) -> &'static str {
        match self.api {
            Api::OpenAi { .. } => "OpenAI",
            Api::Ollama { .. } => "Ollama",
        }
    }

    /// One API call with retry/backoff.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let request = match &self.api {
                Api::OpenAi { api_key } => {
                    let key = api_key.as_deref().ok_or_else(|| {
                        IndexError::ProviderUnavailable("OPENAI_API_KEY not set".to_string())
                    })?;
                    self.client
                        .post(OPENAI_URL)
                        .header("Authorization", format!("Bearer {}", key))
                }
                Api::Ollama { url } => self.client.post(format!("{}/api/embed", url)),
            };

            let resp = request
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            IndexError::ProviderError(format!("{} response: {}", self.provider(), e))
                        })?;
                        return match self.api {
                            Api::OpenAi { .. } => parse_openai_response(&json),
                            Api::Ollama { .. } => parse_ollama_response(&json),
                        };
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        debug!(attempt, %status, "retryable embedding error");
                        last_err = Some(IndexError::ProviderError(format!(
                            "{} API error {}: {}",
                            self.provider(),
                            status,
                            body_text
                        )));
                        continue;
                    }

                    // Client error (not 429), no retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(IndexError::ProviderError(format!(
                        "{} API error {}: {}",
                        self.provider(),
                        status,
                        body_text
                    )));
                }
                Err(e) => {
                    debug!(attempt, error = %e, "embedding request failed");
                    last_err = Some(IndexError::ProviderUnavailable(format!(
                        "{} connection error: {}",
                        self.provider(),
                        e
                    )));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            IndexError::ProviderError("embedding failed after retries".to_string())
        }))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = in_batches(texts, self.batch_size, |batch| self.embed_batch(batch)).await?;
        check_dims(&vectors, self.dims)?;
        Ok(vectors)
    }
}

/// Run `call` over `texts` in slices of `batch_size`, checking that every
/// slice comes back with one vector per text.
pub(crate) async fn in_batches<'a, F, Fut>(
    texts: &'a [String],
    batch_size: usize,
    mut call: F,
) -> Result<Vec<Vec<f32>>>
where
    F: FnMut(&'a [String]) -> Fut,
    Fut: Future<Output = Result<Vec<Vec<f32>>>>,
{
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = call(batch).await?;
        if vectors.len() != batch.len() {
            return Err(IndexError::ProviderError(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }
        out.extend(vectors);
    }
    Ok(out)
}

fn check_dims(vectors: &[Vec<f32>], dims: usize) -> Result<()> {
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(IndexError::ProviderError(format!(
            "expected {}-dimensional vectors, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(())
}

/// Extracts the `data[].embedding` arrays, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            IndexError::ProviderError("invalid OpenAI response: missing data array".to_string())
        })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                IndexError::ProviderError("invalid OpenAI response: missing embedding".to_string())
            })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_f32(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            IndexError::ProviderError(
                "invalid Ollama response: missing embeddings array".to_string(),
            )
        })?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding.as_array().map(|a| to_f32(a)).ok_or_else(|| {
                IndexError::ProviderError(
                    "invalid Ollama response: embedding is not an array".to_string(),
                )
            })
        })
        .collect()
}

fn to_f32(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or
/// vectors of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
