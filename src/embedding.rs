//! Embedding backend abstraction and the Ollama implementation.
//!
//! The pipeline only sees [`EmbeddingBackend`]; the model invocation
//! itself is an opaque capability. The bundled implementation calls a
//! local Ollama instance's `/api/embed` endpoint with retry and
//! exponential backoff for transient errors:
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::errors::{KbError, KbResult};

/// Opaque `embed(text) -> vector` capability.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> KbResult<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed(&self, text: &str) -> KbResult<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| KbError::Backend("empty embedding response".to_string()))
    }

    /// Vector dimensionality this backend produces.
    fn dims(&self) -> usize;
}

/// Embedding backend using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbeddings {
    client: reqwest::Client,
    model: String,
    url: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> KbResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            url: config.url.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> KbResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embed", self.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embed_response(&json);
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(KbError::Backend(format!(
                            "Ollama embed error {}: {}",
                            status, text
                        )));
                        continue;
                    }

                    // Client error (not 429): don't retry
                    let text = response.text().await.unwrap_or_default();
                    return Err(KbError::Backend(format!(
                        "Ollama embed error {}: {}",
                        status, text
                    )));
                }
                Err(e) => {
                    last_err = Some(KbError::Backend(format!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.url, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| KbError::Backend("embedding failed after retries".to_string())))
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn parse_embed_response(json: &serde_json::Value) -> KbResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            KbError::Backend("invalid Ollama response: missing embeddings array".to_string())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                KbError::Backend("invalid Ollama response: embedding is not an array".to_string())
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embed_response() {
        let json = serde_json::json!({
            "embeddings": [[1.0, 2.0], [3.0, 4.0]],
        });
        let parsed = parse_embed_response(&json).unwrap();
        assert_eq!(parsed, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_parse_embed_response_missing_field() {
        let json = serde_json::json!({ "data": [] });
        assert!(parse_embed_response(&json).is_err());
    }

    #[test]
    fn test_parse_embed_response_malformed_entry() {
        let json = serde_json::json!({ "embeddings": ["oops"] });
        assert!(parse_embed_response(&json).is_err());
    }
}
