//! Generation backend abstraction and the Ollama streaming implementation.
//!
//! [`GenerationBackend::generate`] opens one token stream per chat turn.
//! The request is sent eagerly so that a backend that produces no stream
//! at all fails the turn before anything is yielded; once streaming has
//! begun, chunks are forwarded in emission order and mid-stream failures
//! surface as stream errors without retracting delivered text.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use tracing::warn;

use crate::config::GenerationConfig;
use crate::errors::{KbError, KbResult};
use crate::models::ChatTurn;

/// Lazy sequence of answer text chunks for one turn.
pub type ChunkStream = BoxStream<'static, KbResult<String>>;

/// Opaque `generate(prompt, history) -> token stream` capability.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Start generating an answer. `prompt` is the current user prompt
    /// (with embedded references); `history` is the prior conversation.
    ///
    /// Fails with [`KbError::NoGenerationStream`] when no stream could be
    /// opened; the caller has then received nothing and can fail the turn
    /// cleanly.
    async fn generate(
        &self,
        system: &str,
        history: &[ChatTurn],
        prompt: &str,
    ) -> KbResult<ChunkStream>;
}

/// Streaming chat generation against a local Ollama instance.
pub struct OllamaGeneration {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl OllamaGeneration {
    pub fn new(config: &GenerationConfig) -> KbResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            url: config.url.clone(),
        })
    }
}

#[derive(Deserialize)]
struct OllamaStreamLine {
    #[serde(default)]
    message: OllamaStreamMessage,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize, Default)]
struct OllamaStreamMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl GenerationBackend for OllamaGeneration {
    async fn generate(
        &self,
        system: &str,
        history: &[ChatTurn],
        prompt: &str,
    ) -> KbResult<ChunkStream> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": system,
        })];
        for turn in history {
            messages.push(serde_json::json!({
                "role": turn.role.as_str(),
                "content": turn.text,
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": prompt,
        }));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!("generation request failed: {e}");
                KbError::NoGenerationStream
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!("generation request rejected ({status}): {text}");
            return Err(KbError::NoGenerationStream);
        }

        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(KbError::Backend(format!("generation stream error: {e}")));
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // NDJSON: one JSON object per line.
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<OllamaStreamLine>(&line) {
                        Ok(parsed) => {
                            if !parsed.message.content.is_empty() {
                                yield Ok(parsed.message.content);
                            }
                            if parsed.done {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("skipping unparseable stream line: {e}");
                        }
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}
