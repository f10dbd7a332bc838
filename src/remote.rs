//! Remote indexing/search capability boundary and its HTTP client.
//!
//! The managed-service variant of the knowledge base only ever talks to
//! the traits in this module. [`RemoteBackend::acquire`] is the explicit
//! resource-acquisition step: it refreshes credentials and hands back a
//! [`RemoteClient`] bundle scoped to one operation, which keeps credential
//! lifetime visible and testable instead of hiding it in a decorator.
//!
//! [`HttpRemoteBackend`] implements the boundary against a REST-style
//! managed search service. The bearer token is read from an environment
//! variable at acquire time, so rotated credentials are picked up without
//! restarting.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use tracing::warn;

use crate::config::RemoteConfig;
use crate::errors::{KbError, KbResult};
use crate::models::Citation;

/// Status of one data-source indexing job on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteJobStatus {
    Indexing,
    Succeeded,
    Failed,
    Aborted,
}

/// One event of a remote retrieve-and-generate stream: a text chunk,
/// resolved citations, or both.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteAnswerEvent {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// An open answer stream plus the session it belongs to.
pub struct RemoteAnswer {
    /// Session id to carry into the next turn of the same chat.
    pub session_id: Option<String>,
    pub events: BoxStream<'static, KbResult<RemoteAnswerEvent>>,
}

/// Scoped client bundle for one knowledge base operation.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Upload one document body under its vault path.
    async fn upload(&self, path: &str, body: &str) -> KbResult<()>;

    /// Delete one document by vault path.
    async fn delete(&self, path: &str) -> KbResult<()>;

    /// Remove every document in the knowledge base.
    async fn delete_all(&self) -> KbResult<()>;

    /// List the knowledge base's data source ids.
    async fn data_sources(&self) -> KbResult<Vec<String>>;

    /// Kick off indexing for one data source.
    async fn start_data_source_sync(&self, data_source_id: &str) -> KbResult<()>;

    /// Status of the most recent indexing job for one data source.
    async fn data_source_status(&self, data_source_id: &str) -> KbResult<RemoteJobStatus>;

    /// Open a retrieve-and-generate stream for one turn. `None` means the
    /// service accepted the request but produced no stream.
    async fn retrieve_and_generate(
        &self,
        text: &str,
        session_id: Option<&str>,
        number_of_results: usize,
    ) -> KbResult<Option<RemoteAnswer>>;
}

/// Factory for scoped [`RemoteClient`] bundles.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Refresh credentials and build a client for one operation.
    async fn acquire(&self) -> KbResult<Box<dyn RemoteClient>>;
}

/// [`RemoteBackend`] over a REST-style managed search service.
#[derive(Debug)]
pub struct HttpRemoteBackend {
    endpoint: String,
    knowledge_base_id: String,
    token_env: String,
    timeout: Duration,
}

impl HttpRemoteBackend {
    pub fn new(config: &RemoteConfig) -> KbResult<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| KbError::Backend("remote.endpoint is not configured".to_string()))?;
        let knowledge_base_id = config.knowledge_base_id.clone().ok_or_else(|| {
            KbError::Backend("remote.knowledge_base_id is not configured".to_string())
        })?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            knowledge_base_id,
            token_env: config.token_env.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl RemoteBackend for HttpRemoteBackend {
    async fn acquire(&self) -> KbResult<Box<dyn RemoteClient>> {
        let token = std::env::var(&self.token_env).map_err(|_| {
            KbError::Backend(format!(
                "credential environment variable {} is not set",
                self.token_env
            ))
        })?;

        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        Ok(Box::new(HttpRemoteClient {
            client,
            base: format!(
                "{}/knowledge-bases/{}",
                self.endpoint, self.knowledge_base_id
            ),
            token,
        }))
    }
}

struct HttpRemoteClient {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl HttpRemoteClient {
    fn check(response: reqwest::Response, what: &str) -> KbResult<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(KbError::Backend(format!(
                "{} failed with status {}",
                what,
                response.status()
            )))
        }
    }
}

#[derive(Deserialize)]
struct DataSourcesResponse {
    data_sources: Vec<String>,
}

#[derive(Deserialize)]
struct DataSourceStatusResponse {
    status: RemoteJobStatus,
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn upload(&self, path: &str, body: &str) -> KbResult<()> {
        let response = self
            .client
            .put(format!("{}/documents", self.base))
            .bearer_auth(&self.token)
            .query(&[("path", path)])
            .body(body.to_string())
            .send()
            .await?;
        Self::check(response, "document upload").map(|_| ())
    }

    async fn delete(&self, path: &str) -> KbResult<()> {
        let response = self
            .client
            .delete(format!("{}/documents", self.base))
            .bearer_auth(&self.token)
            .query(&[("path", path)])
            .send()
            .await?;
        Self::check(response, "document delete").map(|_| ())
    }

    async fn delete_all(&self) -> KbResult<()> {
        let response = self
            .client
            .delete(format!("{}/documents/all", self.base))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(response, "delete all documents").map(|_| ())
    }

    async fn data_sources(&self) -> KbResult<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/data-sources", self.base))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let parsed: DataSourcesResponse =
            Self::check(response, "data source listing")?.json().await?;
        Ok(parsed.data_sources)
    }

    async fn start_data_source_sync(&self, data_source_id: &str) -> KbResult<()> {
        let response = self
            .client
            .post(format!("{}/data-sources/{}/sync", self.base, data_source_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(response, "data source sync start").map(|_| ())
    }

    async fn data_source_status(&self, data_source_id: &str) -> KbResult<RemoteJobStatus> {
        let response = self
            .client
            .get(format!("{}/data-sources/{}/sync", self.base, data_source_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let parsed: DataSourceStatusResponse =
            Self::check(response, "data source status")?.json().await?;
        Ok(parsed.status)
    }

    async fn retrieve_and_generate(
        &self,
        text: &str,
        session_id: Option<&str>,
        number_of_results: usize,
    ) -> KbResult<Option<RemoteAnswer>> {
        let body = serde_json::json!({
            "text": text,
            "session_id": session_id,
            "number_of_results": number_of_results,
        });

        let response = self
            .client
            .post(format!("{}/query", self.base))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response, "retrieve and generate")?;

        let session_id = response
            .headers()
            .get("x-session-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut bytes = response.bytes_stream();

        let events = async_stream::stream! {
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(KbError::Backend(format!("remote answer stream error: {e}")));
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // NDJSON: one event object per line.
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<RemoteAnswerEvent>(&line) {
                        Ok(event) => yield Ok(event),
                        Err(e) => warn!("skipping unparseable remote event: {e}"),
                    }
                }
            }
        };

        Ok(Some(RemoteAnswer {
            session_id,
            events: events.boxed(),
        }))
    }
}
