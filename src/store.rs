//! In-memory vector store with brute-force cosine retrieval.
//!
//! Holds one embedding record per chunk behind `std::sync::RwLock` for
//! thread safety. Queries score every stored vector, sort descending by
//! cosine similarity, and truncate to `k`. That is O(n) per query with
//! no index structure, which is fine for a vault-sized corpus rebuilt
//! incrementally rather than from scratch.
//!
//! The store owns its records exclusively; queries hand back copies, never
//! references into the store.

use std::sync::RwLock;

use crate::errors::{KbError, KbResult};

/// One stored chunk embedding.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub vector: Vec<f32>,
    /// Path of the note this chunk came from.
    pub source_key: String,
    pub text: String,
}

/// A scored query result, ordered by descending similarity.
#[derive(Debug, Clone)]
pub struct Scored {
    pub source_key: String,
    pub text: String,
    pub similarity: f32,
}

struct Inner {
    /// Locked at construction or by the first inserted vector.
    dimension: Option<usize>,
    records: Vec<EmbeddingRecord>,
}

/// Brute-force cosine-similarity vector store.
pub struct VectorStore {
    inner: RwLock<Inner>,
}

impl VectorStore {
    /// Create a store whose dimension locks on the first insert.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                dimension: None,
                records: Vec::new(),
            }),
        }
    }

    /// Create a store with a fixed dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                dimension: Some(dimension),
                records: Vec::new(),
            }),
        }
    }

    /// Append records, validating every vector against the store's
    /// dimension before any of them is committed.
    ///
    /// Adding the same record twice yields two entries; inserts are not
    /// deduplicated.
    pub fn add_vectors(&self, records: Vec<EmbeddingRecord>) -> KbResult<()> {
        let mut inner = self.inner.write().unwrap();

        let dimension = match (inner.dimension, records.first()) {
            (Some(d), _) => d,
            (None, Some(r)) => r.vector.len(),
            (None, None) => return Ok(()),
        };

        for record in &records {
            if record.vector.len() != dimension {
                return Err(KbError::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                });
            }
        }

        inner.dimension = Some(dimension);
        inner.records.extend(records);
        Ok(())
    }

    /// Return the `min(k, stored)` nearest records by cosine similarity,
    /// best first.
    pub fn query(&self, vector: &[f32], k: usize) -> KbResult<Vec<Scored>> {
        let inner = self.inner.read().unwrap();

        if inner.records.is_empty() {
            return Err(KbError::EmptyStore);
        }

        let dimension = inner.dimension.expect("non-empty store has a dimension");
        if vector.len() != dimension {
            return Err(KbError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<Scored> = inner
            .records
            .iter()
            .map(|r| Scored {
                source_key: r.source_key.clone(),
                text: r.text.clone(),
                similarity: cosine_similarity(vector, &r.vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Remove every record whose `source_key` is in `source_keys`.
    /// A no-op for keys not present.
    pub fn delete(&self, source_keys: &[String]) {
        let mut inner = self.inner.write().unwrap();
        inner
            .records
            .retain(|r| !source_keys.contains(&r.source_key));
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record. The locked dimension is kept.
    pub fn clear(&self) {
        self.inner.write().unwrap().records.clear();
    }
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cosine similarity `dot(a, b) / (|a| * |b|)`.
///
/// Similarity against a zero vector is undefined; it is pinned to `0.0`
/// rather than propagating NaN.
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

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source_key: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            vector,
            source_key: source_key.to_string(),
            text: format!("chunk from {}", source_key),
        }
    }

    #[test]
    fn test_query_empty_store_fails() {
        let store = VectorStore::new();
        assert!(matches!(
            store.query(&[1.0, 0.0], 3),
            Err(KbError::EmptyStore)
        ));
    }

    #[test]
    fn test_dimension_locked_by_first_insert() {
        let store = VectorStore::new();
        store
            .add_vectors(vec![record("a.md", vec![1.0, 0.0, 0.0])])
            .unwrap();

        let err = store
            .add_vectors(vec![record("b.md", vec![1.0, 0.0])])
            .unwrap_err();
        assert!(matches!(
            err,
            KbError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_dimension_fixed_at_construction() {
        let store = VectorStore::with_dimension(2);
        let err = store
            .add_vectors(vec![record("a.md", vec![1.0, 0.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, KbError::DimensionMismatch { expected: 2, .. }));
    }

    #[test]
    fn test_query_wrong_dimension_fails() {
        let store = VectorStore::new();
        store.add_vectors(vec![record("a.md", vec![1.0, 0.0])]).unwrap();
        assert!(matches!(
            store.query(&[1.0, 0.0, 0.0], 1),
            Err(KbError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_query_returns_all_sorted_when_k_exceeds_count() {
        let store = VectorStore::new();
        store
            .add_vectors(vec![
                record("a.md", vec![1.0, 0.0]),
                record("b.md", vec![0.0, 1.0]),
                record("c.md", vec![0.7, 0.7]),
            ])
            .unwrap();

        let results = store.query(&[1.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].source_key, "a.md");
        assert_eq!(results[1].source_key, "c.md");
        assert_eq!(results[2].source_key, "b.md");
        assert!(results[0].similarity >= results[1].similarity);
        assert!(results[1].similarity >= results[2].similarity);
    }

    #[test]
    fn test_query_truncates_to_k() {
        let store = VectorStore::new();
        store
            .add_vectors(vec![
                record("a.md", vec![1.0, 0.0]),
                record("b.md", vec![0.9, 0.1]),
                record("c.md", vec![0.0, 1.0]),
            ])
            .unwrap();

        let results = store.query(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_key, "a.md");
    }

    #[test]
    fn test_delete_removes_all_records_for_key() {
        let store = VectorStore::new();
        store
            .add_vectors(vec![
                record("a.md", vec![1.0, 0.0]),
                record("a.md", vec![0.9, 0.1]),
                record("b.md", vec![0.0, 1.0]),
            ])
            .unwrap();

        store.delete(&["a.md".to_string(), "missing.md".to_string()]);

        let results = store.query(&[1.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|r| r.source_key != "a.md"));
    }

    #[test]
    fn test_duplicate_inserts_are_additive() {
        // Current behavior: no deduplication, two inserts yield two entries.
        let store = VectorStore::new();
        let r = record("a.md", vec![1.0, 0.0]);
        store.add_vectors(vec![r.clone()]).unwrap();
        store.add_vectors(vec![r]).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_zero_vector_similarity_is_zero() {
        let sim = cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]);
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_failed_batch_commits_nothing() {
        let store = VectorStore::new();
        let err = store.add_vectors(vec![
            record("a.md", vec![1.0, 0.0]),
            record("b.md", vec![1.0, 0.0, 0.0]),
        ]);
        assert!(err.is_err());
        assert!(store.is_empty());
    }
}
