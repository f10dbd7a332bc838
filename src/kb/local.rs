//! Self-hosted knowledge base: in-memory vectors, local models.
//!
//! Indexing happens in-process: deleted paths are dropped from the vector
//! store, changed markdown notes are read, chunked, embedded, and added.
//! The sync job itself runs on a spawned task so `start_sync` returns as
//! soon as the job is registered, mirroring how a managed backend hands
//! back a job id immediately.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunker::chunk_note;
use crate::config::Config;
use crate::embedding::EmbeddingBackend;
use crate::errors::KbResult;
use crate::generation::GenerationBackend;
use crate::kb::KnowledgeBase;
use crate::models::{NoteFile, QueryResponse, SyncJob, SyncStatus};
use crate::query::{ChatHistories, QueryPipeline};
use crate::store::{EmbeddingRecord, VectorStore};
use crate::vault;

pub struct LocalKnowledgeBase {
    vault_root: PathBuf,
    max_chars: usize,
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingBackend>,
    histories: ChatHistories,
    pipeline: QueryPipeline,
    sync_statuses: Arc<Mutex<HashMap<String, SyncStatus>>>,
}

impl LocalKnowledgeBase {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingBackend>,
        generator: Arc<dyn GenerationBackend>,
    ) -> Self {
        let store = Arc::new(VectorStore::with_dimension(embedder.dims()));
        let histories: ChatHistories = Arc::new(Mutex::new(HashMap::new()));
        let pipeline = QueryPipeline::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            generator,
            Arc::clone(&histories),
        );

        Self {
            vault_root: config.vault.root.clone(),
            max_chars: config.chunking.max_chars,
            store,
            embedder,
            histories,
            pipeline,
            sync_statuses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn index_changes(
        vault_root: &PathBuf,
        max_chars: usize,
        store: &VectorStore,
        embedder: &dyn EmbeddingBackend,
        changed: Vec<NoteFile>,
        deleted: Vec<String>,
    ) -> KbResult<()> {
        store.delete(&deleted);

        // Re-indexed notes replace their previous chunks.
        let changed_paths: Vec<String> = changed.iter().map(|f| f.path.clone()).collect();
        store.delete(&changed_paths);

        let total = changed.len();
        let mut done = 0usize;

        for file in changed {
            done += 1;

            if file.extension().as_deref() != Some("md") {
                continue;
            }

            let content = match vault::read_note(vault_root, &file.path) {
                Ok(content) => content,
                Err(e) => {
                    // A single unreadable note must not abort the sync.
                    warn!(path = %file.path, "skipping unreadable note: {e}");
                    continue;
                }
            };

            let chunks = chunk_note(&file.path, &content, max_chars);
            if chunks.is_empty() {
                continue;
            }

            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;

            let records: Vec<EmbeddingRecord> = chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddingRecord {
                    vector,
                    source_key: chunk.source_path,
                    text: chunk.text,
                })
                .collect();
            store.add_vectors(records)?;

            if done % 10 == 0 {
                info!("local sync progress: {}/{} notes", done, total);
            }
        }

        debug!("local sync indexed {} notes", total);
        Ok(())
    }
}

#[async_trait]
impl KnowledgeBase for LocalKnowledgeBase {
    async fn start_sync(&self, changed: Vec<NoteFile>, deleted: Vec<String>) -> KbResult<SyncJob> {
        let sync_id = Uuid::new_v4().to_string();
        self.sync_statuses
            .lock()
            .unwrap()
            .insert(sync_id.clone(), SyncStatus::InProgress);

        let vault_root = self.vault_root.clone();
        let max_chars = self.max_chars;
        let store = Arc::clone(&self.store);
        let embedder = Arc::clone(&self.embedder);
        let statuses = Arc::clone(&self.sync_statuses);
        let job_id = sync_id.clone();

        tokio::spawn(async move {
            let outcome = Self::index_changes(
                &vault_root,
                max_chars,
                &store,
                embedder.as_ref(),
                changed,
                deleted,
            )
            .await;

            let status = match outcome {
                Ok(()) => SyncStatus::Succeed,
                Err(e) => {
                    warn!("local knowledge base sync failed: {e}");
                    SyncStatus::Failed
                }
            };
            statuses.lock().unwrap().insert(job_id, status);
        });

        Ok(SyncJob {
            sync_id,
            status: SyncStatus::InProgress,
        })
    }

    async fn get_sync_status(&self, sync_id: &str) -> KbResult<SyncStatus> {
        // Unknown job ids (e.g. after a restart) report as failed rather
        // than erroring, so pollers always terminate.
        Ok(self
            .sync_statuses
            .lock()
            .unwrap()
            .get(sync_id)
            .copied()
            .unwrap_or(SyncStatus::Failed))
    }

    fn query_stream(
        &self,
        text: &str,
        chat_id: &str,
        number_of_results: usize,
    ) -> BoxStream<'static, KbResult<QueryResponse>> {
        self.pipeline.query_stream(text, chat_id, number_of_results)
    }

    async fn delete_all_data(&self) -> KbResult<()> {
        self.store.clear();
        self.histories.lock().unwrap().clear();
        self.sync_statuses.lock().unwrap().clear();
        Ok(())
    }

    fn allow_query_when_not_synced(&self) -> bool {
        false
    }
}
