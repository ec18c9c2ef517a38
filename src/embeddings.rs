use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed several texts in one provider call, preserving input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .context("Embedder returned no vector")
    }

    fn dimensions(&self) -> usize;

    fn model(&self) -> &str;
}

// OpenAI API implementation
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
    attempts: u32,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAIResponseData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIResponseData>,
}

impl OpenAIEmbedder {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dims: Option<usize>,
        attempts: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build reqwest client with timeout")?;

        let dims = dims.unwrap_or(match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        });

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
            dims,
            attempts: attempts.max(1),
        })
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = OpenAIRequest {
            model: &self.model,
            input: texts,
        };
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error {}: {}", status, error_text);
        }

        let mut parsed: OpenAIResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;
        if parsed.data.len() != texts.len() {
            anyhow::bail!(
                "OpenAI returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            );
        }
        parsed.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            anyhow::bail!(
                "OpenAI embedding dimension {} does not match configured {}",
                bad.len(),
                self.dims
            );
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "Generating OpenAI embeddings (model={}, inputs={}, chars={})",
            self.model,
            texts.len(),
            texts.iter().map(|t| t.len()).sum::<usize>()
        );

        // Retry with simple exponential backoff
        let mut last_err: Option<anyhow::Error> = None;
        for i in 0..self.attempts {
            match self.request_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    warn!("OpenAI embedding attempt {} failed: {}", i + 1, e);
                    last_err = Some(e);
                    if i + 1 < self.attempts {
                        let delay_ms = 200u64 * (1u64 << i);
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Unknown OpenAI embedding error")))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Deterministic, local FakeEmbedder for testing/dev (no network)
pub struct FakeEmbedder {
    dims: usize,
}

impl FakeEmbedder {
    pub fn new(dims: Option<usize>) -> Self {
        let d = dims.unwrap_or(256).max(1);
        Self { dims: d }
    }

    // Bag-of-words projection: texts sharing words land close together,
    // which keeps search results meaningful without a provider.
    fn generate(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0f32; self.dims];
        let lowered = text.to_lowercase();
        let words = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2);
        for word in words {
            let mut reader = blake3::Hasher::new()
                .update(word.as_bytes())
                .finalize_xof();
            let mut buf = [0u8; 8];
            reader.fill(&mut buf);
            let slot = (u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize) % self.dims;
            let sign = if buf[4] & 1 == 0 { 1.0 } else { -1.0 };
            out[slot] += sign;
        }

        // Normalize to unit length to emulate real embeddings
        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut out {
                *v /= norm;
            }
        }
        out
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.generate(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model(&self) -> &str {
        "fake-bow"
    }
}

fn is_placeholder(s: &str) -> bool {
    let t = s.trim();
    t.is_empty()
        || t.contains("${")
        || t.eq_ignore_ascii_case("your-api-key-here")
        || t.eq_ignore_ascii_case("changeme")
}

// Factory function to create embedder based on configuration
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let emb = config.embedding();
    let key = config
        .runtime
        .openai_api_key
        .clone()
        .filter(|k| !is_placeholder(k));

    // Provider selection order:
    // 1) Respect an explicit provider
    // 2) Else prefer OpenAI if a key is set
    // 3) Else fall back to the deterministic FakeEmbedder
    match emb.provider.as_str() {
        "openai" => {
            let Some(key) = key else {
                anyhow::bail!("embedding_provider=openai but OPENAI_API_KEY is not set");
            };
            info!("Using OpenAI embeddings (model={})", emb.model);
            Ok(Arc::new(OpenAIEmbedder::new(
                key,
                config.runtime.openai_base_url.clone(),
                emb.model,
                Some(emb.dimensions),
                emb.retries,
            )?))
        }
        "fake" => {
            let fake = FakeEmbedder::new(Some(emb.dimensions));
            info!("Using FakeEmbedder with {} dimensions", fake.dimensions());
            Ok(Arc::new(fake))
        }
        "" => match key {
            Some(key) => {
                info!("Using OpenAI embeddings (model={})", emb.model);
                Ok(Arc::new(OpenAIEmbedder::new(
                    key,
                    config.runtime.openai_base_url.clone(),
                    emb.model,
                    Some(emb.dimensions),
                    emb.retries,
                )?))
            }
            None => {
                let fake = FakeEmbedder::new(Some(emb.dimensions));
                info!(
                    "No OPENAI_API_KEY; using FakeEmbedder (deterministic) with {} dimensions",
                    fake.dimensions()
                );
                Ok(Arc::new(fake))
            }
        },
        other => anyhow::bail!("Unknown embedding provider '{}'", other),
    }
}
