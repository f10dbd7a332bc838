//! Managed-service knowledge base: retrieval, generation, and citation
//! resolution all happen on the remote side.
//!
//! Locally this variant keeps only the `chat_id -> session_id` mapping for
//! conversational continuity. Syncing pushes document changes in fixed-size
//! batches, then starts one indexing job per remote data source and
//! coalesces the job ids into a single synthetic sync id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::{KbError, KbResult};
use crate::kb::KnowledgeBase;
use crate::models::{NoteFile, QueryResponse, SyncJob, SyncStatus};
use crate::remote::{RemoteBackend, RemoteClient, RemoteJobStatus};
use crate::vault;

/// Joins per-data-source job ids into one synthetic sync id.
const SYNC_ID_SEPARATOR: char = '|';

pub struct RemoteKnowledgeBase {
    backend: Arc<dyn RemoteBackend>,
    vault_root: PathBuf,
    batch_size: usize,
    /// `chat_id -> remote session id`; shared with in-flight turn streams.
    sessions: Arc<Mutex<HashMap<String, String>>>,
}

impl RemoteKnowledgeBase {
    pub fn new(config: &Config, backend: Arc<dyn RemoteBackend>) -> Self {
        Self {
            backend,
            vault_root: config.vault.root.clone(),
            batch_size: config.sync.batch_size.max(1),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Push deletions then uploads in fixed-size batches.
    ///
    /// A failed item is counted and logged but does not stop the
    /// remaining batches; the total failure count aggregates into one
    /// [`KbError::BatchTransfer`] at the end.
    async fn transfer_changes(
        &self,
        client: &dyn RemoteClient,
        changed: &[NoteFile],
        deleted: &[String],
    ) -> KbResult<()> {
        let mut failed = 0usize;
        let mut total = 0usize;

        for batch in deleted.chunks(self.batch_size) {
            let results =
                futures::future::join_all(batch.iter().map(|path| client.delete(path))).await;
            for (path, result) in batch.iter().zip(results) {
                total += 1;
                if let Err(e) = result {
                    warn!(path = %path, "remote delete failed: {e}");
                    failed += 1;
                }
            }
        }

        // Read note bodies up front; unreadable notes are skipped with a
        // warning and do not count as transfer failures.
        let mut uploads: Vec<(String, String)> = Vec::new();
        for file in changed {
            match vault::read_note(&self.vault_root, &file.path) {
                Ok(body) => uploads.push((file.path.clone(), body)),
                Err(e) => warn!(path = %file.path, "skipping unreadable note: {e}"),
            }
        }

        for batch in uploads.chunks(self.batch_size) {
            let results =
                futures::future::join_all(batch.iter().map(|(path, body)| client.upload(path, body)))
                    .await;
            for ((path, _), result) in batch.iter().zip(results) {
                total += 1;
                if let Err(e) = result {
                    warn!(path = %path, "remote upload failed: {e}");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(KbError::BatchTransfer { failed, total });
        }
        Ok(())
    }
}

#[async_trait]
impl KnowledgeBase for RemoteKnowledgeBase {
    async fn start_sync(&self, changed: Vec<NoteFile>, deleted: Vec<String>) -> KbResult<SyncJob> {
        let client = self.backend.acquire().await?;

        self.transfer_changes(client.as_ref(), &changed, &deleted)
            .await?;

        let data_sources = client.data_sources().await?;
        if data_sources.is_empty() {
            return Err(KbError::Backend(
                "knowledge base has no data sources to sync".to_string(),
            ));
        }

        for data_source_id in &data_sources {
            client.start_data_source_sync(data_source_id).await?;
        }

        let sync_id = data_sources.join(&SYNC_ID_SEPARATOR.to_string());
        debug!(sync_id = %sync_id, "remote sync started");

        Ok(SyncJob {
            sync_id,
            status: SyncStatus::InProgress,
        })
    }

    async fn get_sync_status(&self, sync_id: &str) -> KbResult<SyncStatus> {
        let client = self.backend.acquire().await?;

        let mut statuses = Vec::new();
        for data_source_id in sync_id.split(SYNC_ID_SEPARATOR) {
            statuses.push(client.data_source_status(data_source_id).await?);
        }

        if statuses.contains(&RemoteJobStatus::Indexing) {
            return Ok(SyncStatus::InProgress);
        }
        if statuses
            .iter()
            .any(|s| matches!(s, RemoteJobStatus::Failed | RemoteJobStatus::Aborted))
        {
            return Ok(SyncStatus::Failed);
        }
        Ok(SyncStatus::Succeed)
    }

    fn query_stream(
        &self,
        text: &str,
        chat_id: &str,
        number_of_results: usize,
    ) -> BoxStream<'static, KbResult<QueryResponse>> {
        let backend = Arc::clone(&self.backend);
        let text = text.to_string();
        let chat_id = chat_id.to_string();
        let prior_session = self.sessions.lock().unwrap().get(&chat_id).cloned();
        let sessions = Arc::clone(&self.sessions);

        let stream = async_stream::stream! {
            let client = match backend.acquire().await {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let answer = match client
                .retrieve_and_generate(&text, prior_session.as_deref(), number_of_results)
                .await
            {
                Ok(Some(answer)) => answer,
                Ok(None) => {
                    yield Err(KbError::NoRemoteResponse);
                    return;
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            if let Some(session_id) = answer.session_id.clone() {
                sessions.lock().unwrap().insert(chat_id.clone(), session_id);
            }

            let mut events = answer.events;
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        yield Ok(QueryResponse {
                            text: event.text,
                            citations: event.citations,
                        });
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        };

        stream.boxed()
    }

    async fn delete_all_data(&self) -> KbResult<()> {
        let client = self.backend.acquire().await?;
        client.delete_all().await?;
        self.sessions.lock().unwrap().clear();
        Ok(())
    }

    fn allow_query_when_not_synced(&self) -> bool {
        true
    }
}
