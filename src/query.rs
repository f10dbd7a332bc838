//! Retrieval-augmented query pipeline for the local knowledge base.
//!
//! One call to [`QueryPipeline::query_stream`] executes one chat turn:
//! embed the conversation, retrieve the nearest chunks, stream the
//! generated answer chunk by chunk, then emit resolved citations once the
//! full answer text is known. Each call is a fresh turn; the stream is
//! not restartable and is either drained to completion or dropped by the
//! consumer (dropping abandons the backend call).
//!
//! Chat history is committed conservatively: the user turn is appended
//! only once the generation stream has opened, and the assistant turn
//! only once the stream has completed, so a turn that fails before
//! streaming leaves the history untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::debug;

use crate::chunker::strip_source_header;
use crate::citation::{self, SourceRef};
use crate::embedding::EmbeddingBackend;
use crate::errors::KbResult;
use crate::generation::GenerationBackend;
use crate::models::{ChatTurn, QueryResponse};
use crate::prompts;
use crate::store::VectorStore;

/// Shared, append-only chat histories keyed by chat id.
///
/// Concurrent turns on the same chat id are not a supported scenario;
/// the mutex protects the map itself, not turn interleaving.
pub type ChatHistories = Arc<Mutex<HashMap<String, Vec<ChatTurn>>>>;

pub struct QueryPipeline {
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingBackend>,
    generator: Arc<dyn GenerationBackend>,
    histories: ChatHistories,
}

impl QueryPipeline {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingBackend>,
        generator: Arc<dyn GenerationBackend>,
        histories: ChatHistories,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            histories,
        }
    }

    /// Execute one turn, yielding text chunks as they arrive and citation
    /// events after the text completes.
    pub fn query_stream(
        &self,
        text: &str,
        chat_id: &str,
        number_of_results: usize,
    ) -> BoxStream<'static, KbResult<QueryResponse>> {
        let store = Arc::clone(&self.store);
        let embedder = Arc::clone(&self.embedder);
        let generator = Arc::clone(&self.generator);
        let histories = Arc::clone(&self.histories);
        let text = text.to_string();
        let chat_id = chat_id.to_string();

        let stream = async_stream::stream! {
            debug!(chat_id = %chat_id, "turn received");

            // Retrieval reflects the whole conversation, not just the
            // latest message. The pending user turn is included in the
            // embedding query but not yet committed to the history.
            let user_turn = ChatTurn::user(text.clone());
            let prior: Vec<ChatTurn> = {
                let histories = histories.lock().unwrap();
                histories.get(&chat_id).cloned().unwrap_or_default()
            };
            let embedding_query = prior
                .iter()
                .chain(std::iter::once(&user_turn))
                .map(|turn| format!("{}: {}", turn.role.as_str(), turn.text))
                .collect::<Vec<_>>()
                .join("\n\n");

            debug!(chat_id = %chat_id, "embedding conversation");
            let query_vector = match embedder.embed(&embedding_query).await {
                Ok(v) => v,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            debug!(chat_id = %chat_id, k = number_of_results, "retrieving chunks");
            let retrieved = match store.query(&query_vector, number_of_results) {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let prompt = prompts::build_user_prompt(&text, &retrieved);

            debug!(chat_id = %chat_id, "starting generation");
            let mut chunks = match generator
                .generate(prompts::SYSTEM_PROMPT, &prior, &prompt)
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    // Nothing was appended to the history; the turn fails
                    // cleanly before the first chunk.
                    yield Err(e);
                    return;
                }
            };

            {
                let mut histories = histories.lock().unwrap();
                histories.entry(chat_id.clone()).or_default().push(user_turn);
            }

            let mut answer = String::new();
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(piece) => {
                        answer.push_str(&piece);
                        yield Ok(QueryResponse::text_chunk(piece));
                    }
                    Err(e) => {
                        // Text already streamed stands; the partial answer
                        // is not committed to the history.
                        yield Err(e);
                        return;
                    }
                }
            }

            debug!(chat_id = %chat_id, "extracting citations");
            let sources: Vec<SourceRef> = retrieved
                .iter()
                .map(|r| SourceRef {
                    file_name: r.source_key.clone(),
                    excerpt: Some(strip_source_header(&r.text).to_string()),
                })
                .collect();

            for resolved in citation::align(&answer, &sources) {
                yield Ok(QueryResponse::citation(resolved));
            }

            {
                let mut histories = histories.lock().unwrap();
                histories
                    .entry(chat_id.clone())
                    .or_default()
                    .push(ChatTurn::assistant(answer));
            }

            debug!(chat_id = %chat_id, "turn done");
        };

        stream.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::KbError;
    use crate::generation::ChunkStream;
    use crate::store::EmbeddingRecord;
    use async_trait::async_trait;

    struct FixedEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingBackend for FixedEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> KbResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }

        fn dims(&self) -> usize {
            self.vector.len()
        }
    }

    struct ScriptedGenerator {
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl GenerationBackend for ScriptedGenerator {
        async fn generate(
            &self,
            _system: &str,
            _history: &[ChatTurn],
            _prompt: &str,
        ) -> KbResult<ChunkStream> {
            let chunks = self.chunks.clone();
            Ok(futures::stream::iter(chunks.into_iter().map(|c| Ok(c.to_string()))).boxed())
        }
    }

    struct DeadGenerator;

    #[async_trait]
    impl GenerationBackend for DeadGenerator {
        async fn generate(
            &self,
            _system: &str,
            _history: &[ChatTurn],
            _prompt: &str,
        ) -> KbResult<ChunkStream> {
            Err(KbError::NoGenerationStream)
        }
    }

    fn seeded_store() -> Arc<VectorStore> {
        let store = VectorStore::new();
        store
            .add_vectors(vec![
                EmbeddingRecord {
                    vector: vec![1.0, 0.0],
                    source_key: "sky.md".to_string(),
                    text: "SOURCE: sky.md\n\nThe sky is blue.".to_string(),
                },
                EmbeddingRecord {
                    vector: vec![0.0, 1.0],
                    source_key: "water.md".to_string(),
                    text: "SOURCE: water.md\n\nWater boils at 100C.".to_string(),
                },
            ])
            .unwrap();
        Arc::new(store)
    }

    fn pipeline(generator: Arc<dyn GenerationBackend>) -> QueryPipeline {
        QueryPipeline::new(
            seeded_store(),
            Arc::new(FixedEmbedder {
                vector: vec![1.0, 0.1],
            }),
            generator,
            Arc::new(Mutex::new(HashMap::new())),
        )
    }

    #[tokio::test]
    async fn test_text_chunks_precede_citations() {
        let pipeline = pipeline(Arc::new(ScriptedGenerator {
            chunks: vec!["The sky is blue", "[1]."],
        }));

        let responses: Vec<QueryResponse> = pipeline
            .query_stream("why is the sky blue?", "chat-1", 2)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].text, "The sky is blue");
        assert!(responses[0].citations.is_empty());
        assert_eq!(responses[1].text, "[1].");

        let citation = &responses[2];
        assert!(citation.text.is_empty());
        assert_eq!(citation.citations[0].references[0].file_name, "sky.md");
        assert_eq!(
            citation.citations[0].references[0].text.as_deref(),
            Some("The sky is blue.")
        );
    }

    #[tokio::test]
    async fn test_history_committed_after_turn() {
        let histories: ChatHistories = Arc::new(Mutex::new(HashMap::new()));
        let pipeline = QueryPipeline::new(
            seeded_store(),
            Arc::new(FixedEmbedder {
                vector: vec![1.0, 0.0],
            }),
            Arc::new(ScriptedGenerator {
                chunks: vec!["Answer[1]."],
            }),
            Arc::clone(&histories),
        );

        pipeline
            .query_stream("question", "chat-1", 1)
            .collect::<Vec<_>>()
            .await;

        let histories = histories.lock().unwrap();
        let turns = histories.get("chat-1").unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "question");
        assert_eq!(turns[1].text, "Answer[1].");
    }

    #[tokio::test]
    async fn test_no_stream_fails_before_first_chunk() {
        let histories: ChatHistories = Arc::new(Mutex::new(HashMap::new()));
        let pipeline = QueryPipeline::new(
            seeded_store(),
            Arc::new(FixedEmbedder {
                vector: vec![1.0, 0.0],
            }),
            Arc::new(DeadGenerator),
            Arc::clone(&histories),
        );

        let responses: Vec<KbResult<QueryResponse>> = pipeline
            .query_stream("question", "chat-1", 1)
            .collect::<Vec<_>>()
            .await;

        assert_eq!(responses.len(), 1);
        assert!(matches!(responses[0], Err(KbError::NoGenerationStream)));
        // The failed turn left no trace in the history.
        assert!(histories.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_store_fails_turn() {
        let pipeline = QueryPipeline::new(
            Arc::new(VectorStore::new()),
            Arc::new(FixedEmbedder {
                vector: vec![1.0, 0.0],
            }),
            Arc::new(ScriptedGenerator { chunks: vec![] }),
            Arc::new(Mutex::new(HashMap::new())),
        );

        let responses: Vec<KbResult<QueryResponse>> = pipeline
            .query_stream("question", "chat-1", 1)
            .collect::<Vec<_>>()
            .await;

        assert_eq!(responses.len(), 1);
        assert!(matches!(responses[0], Err(KbError::EmptyStore)));
    }
}
