//! Embedding capability for semantic paging.
//!
//! The [`Embedder`] trait maps text to a fixed-width vector. It is async and
//! object-safe (boxed futures), so the engine holds an `Arc<dyn Embedder>`
//! and never learns whether vectors come from a local model, a hosted API,
//! or a test closure.
//!
//! Three implementations ship with the crate:
//!
//! - [`FnEmbedder`] wraps a closure.
//! - [`HashingEmbedder`] is a deterministic feature-hashing bag of words.
//!   No model, no network. Useful offline and in tests, where texts that
//!   share words land close together.
//! - [`HttpEmbedder`] calls an OpenAI-compatible `/embeddings` endpoint.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{PagingError, Result};

/// Boxed future returned by [`Embedder::embed`].
pub type EmbedFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>>;

/// Text to vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> EmbedFuture<'_>;
}

// ── FnEmbedder ─────────────────────────────────────────────────────

type ErasedEmbedFn =
    Box<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send>> + Send + Sync>;

/// Closure-backed [`Embedder`].
///
/// ```ignore
/// let embedder = FnEmbedder::new(|text: String| async move {
///     my_model.encode(&text).await
/// });
/// ```
pub struct FnEmbedder {
    handler: ErasedEmbedFn,
}

impl FnEmbedder {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<f32>>> + Send + 'static,
    {
        let erased =
            move |text: String| -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send>> {
                Box::pin(handler(text))
            };
        Self {
            handler: Box::new(erased),
        }
    }

    /// Wrap a synchronous, infallible function.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(&str) -> Vec<f32> + Send + Sync + 'static,
    {
        Self::new(move |text: String| {
            let vector = f(&text);
            async move { Ok(vector) }
        })
    }
}

impl Embedder for FnEmbedder {
    fn embed(&self, text: &str) -> EmbedFuture<'_> {
        (self.handler)(text.to_string())
    }
}

impl fmt::Debug for FnEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEmbedder").finish_non_exhaustive()
    }
}

// ── HashingEmbedder ────────────────────────────────────────────────

/// Feature-hashing embedder.
///
/// Each lowercased alphanumeric token is hashed (SHA-256) to a bucket and a
/// sign; the bucket counts form the vector, which is then L2-normalized.
/// Text with no alphanumeric tokens hashes as a single token so it still
/// gets a direction.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The vector for `text`, computed synchronously.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let mut tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let trimmed = lowered.trim();
        if tokens.is_empty() && !trimmed.is_empty() {
            tokens.push(trimmed);
        }

        for token in tokens {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> EmbedFuture<'_> {
        let vector = self.vector(text);
        Box::pin(async move { Ok(vector) })
    }
}

// ── HttpEmbedder ───────────────────────────────────────────────────

/// Default endpoint for [`HttpEmbedder`].
pub const DEFAULT_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

/// [`Embedder`] backed by an OpenAI-compatible embeddings endpoint.
///
/// One request per text. No retries: a failed call surfaces as
/// [`PagingError::Embedding`] and the engine degrades around it.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dimensions: Option<usize>,
}

impl HttpEmbedder {
    /// Client for `model` at [`DEFAULT_EMBEDDINGS_URL`].
    pub fn new(model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("cinch-pager/0.1")
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            url: DEFAULT_EMBEDDINGS_URL.to_string(),
            model: model.into(),
            api_key: None,
            dimensions: None,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Ask the model for vectors of this width (models that support it).
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    async fn request(&self, text: String) -> Result<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: &text,
            dimensions: self.dimensions,
        };
        let start = Instant::now();

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        debug!(
            "Embedding response: HTTP {status} in {:.2}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            text.len()
        );
        parse_response(status.as_u16(), &text)
    }
}

/// Extract the first embedding from a raw response body.
fn parse_response(status: u16, body: &str) -> Result<Vec<f32>> {
    if !(200..300).contains(&status) {
        return Err(PagingError::embedding(format!(
            "embeddings API HTTP {status}: {body}"
        )));
    }
    let parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| PagingError::embedding(format!("failed to parse response: {e}")))?;
    if let Some(err) = parsed.error {
        return Err(PagingError::embedding(format!(
            "embeddings API error: {}",
            err.message
        )));
    }
    parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| PagingError::embedding("response contained no embeddings"))
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> EmbedFuture<'_> {
        Box::pin(self.request(text.to_string()))
    }
}

impl fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}
