//! Knowledge base variants behind one polymorphic contract.
//!
//! A [`KnowledgeBase`] is the four-operation capability set the sync
//! coordinator and query callers consume: start a sync, check a sync,
//! stream a cited answer, wipe the data. Variants are closed structs
//! selected by the configuration at construction time:
//!
//! - [`local::LocalKnowledgeBase`] composes the in-memory vector store
//!   with the retrieval/generation pipeline.
//! - [`remote::RemoteKnowledgeBase`] delegates retrieval and citation
//!   resolution to a managed search service, keeping only the
//!   chat-to-session mapping.

pub mod local;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::Config;
use crate::embedding::OllamaEmbeddings;
use crate::errors::{KbError, KbResult};
use crate::generation::OllamaGeneration;
use crate::models::{NoteFile, QueryResponse, SyncJob, SyncStatus};
use crate::remote::HttpRemoteBackend;

/// The capability set shared by every knowledge base variant.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Start indexing the given changes. Returns a tracked job whose
    /// status the caller polls via [`get_sync_status`](Self::get_sync_status).
    async fn start_sync(&self, changed: Vec<NoteFile>, deleted: Vec<String>) -> KbResult<SyncJob>;

    /// On-demand status check for a sync job.
    async fn get_sync_status(&self, sync_id: &str) -> KbResult<SyncStatus>;

    /// Execute one conversational turn as a lazy response stream.
    fn query_stream(
        &self,
        text: &str,
        chat_id: &str,
        number_of_results: usize,
    ) -> BoxStream<'static, KbResult<QueryResponse>>;

    /// Remove all indexed data and conversational state.
    async fn delete_all_data(&self) -> KbResult<()>;

    /// Whether querying is sensible before the first sync completes.
    /// Consumed by the caller to decide whether to block early queries.
    fn allow_query_when_not_synced(&self) -> bool;
}

/// Build the knowledge base variant selected by `config.provider`.
pub fn create_knowledge_base(config: &Config) -> KbResult<Arc<dyn KnowledgeBase>> {
    match config.provider.as_str() {
        "local" => {
            let embedder = Arc::new(OllamaEmbeddings::new(&config.embedding)?);
            let generator = Arc::new(OllamaGeneration::new(&config.generation)?);
            Ok(Arc::new(local::LocalKnowledgeBase::new(
                config, embedder, generator,
            )))
        }
        "remote" => {
            let backend = Arc::new(HttpRemoteBackend::new(&config.remote)?);
            Ok(Arc::new(remote::RemoteKnowledgeBase::new(config, backend)))
        }
        other => Err(KbError::UnknownProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;

    fn config(provider: &str) -> Config {
        Config {
            provider: provider.to_string(),
            vault: VaultConfig {
                root: "/tmp/vault".into(),
                excluded_folders: vec![],
                excluded_extensions: vec![],
            },
            sync: Default::default(),
            chunking: Default::default(),
            retrieval: Default::default(),
            embedding: Default::default(),
            generation: Default::default(),
            remote: Default::default(),
        }
    }

    #[test]
    fn test_unknown_provider_fails_construction() {
        let err = match create_knowledge_base(&config("chroma")) {
            Ok(_) => panic!("expected construction to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, KbError::UnknownProvider(name) if name == "chroma"));
    }

    #[test]
    fn test_local_provider_constructs() {
        let kb = create_knowledge_base(&config("local")).unwrap();
        assert!(!kb.allow_query_when_not_synced());
    }
}
