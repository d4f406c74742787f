//! Search engine
//!
//! One query flows through four strict stages: embed, ANN lookup, store
//! join, optional rerank. Cosine distances become similarity scores via
//! `max(0, 1 − distance)`, so scores always land in `[0, 1]`.
//!
//! The engine holds the store and the index manager but does not own them
//! exclusively; `cleanup` is the single place that shuts both down, index
//! worker first, then the store handle.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::DEFAULT_TOP_K;
use crate::embed::{EmbedInput, Embedder};
use crate::error::{RagError, Result};
use crate::index::IndexManager;
use crate::rerank::Reranker;
use crate::store::{ContentType, MetadataStore};

/// Options for a single search call
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum number of results (≥ 1)
    pub top_k: usize,
    /// Apply the configured reranker to the candidate set
    pub rerank: bool,
    /// Restrict results to one chunk content type
    pub content_type: Option<ContentType>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            rerank: false,
            content_type: None,
        }
    }
}

/// The document a hit belongs to
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRef {
    pub id: i64,
    pub source: String,
    pub title: String,
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

/// A single search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub content: String,
    /// Similarity in `[0, 1]`, higher is better
    pub score: f32,
    pub content_type: ContentType,
    pub document: DocumentRef,
}

/// Semantic search over an opened corpus
pub struct SearchEngine {
    store: Arc<MetadataStore>,
    index: IndexManager,
    embedder: Box<dyn Embedder>,
    reranker: Reranker,
}

impl SearchEngine {
    pub fn new(
        store: Arc<MetadataStore>,
        index: IndexManager,
        embedder: Box<dyn Embedder>,
        reranker: Reranker,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            reranker,
        }
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut IndexManager {
        &mut self.index
    }

    /// Embed `query` and run the search pipeline.
    pub async fn search(&mut self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(RagError::invalid_argument(
                "the search query is empty; provide a query string",
            ));
        }
        validate_options(options)?;
        let vector = self.embedder.embed(&EmbedInput::Text(query.to_string()))?;
        self.search_with_vector(vector, options, Some(query)).await
    }

    /// Run the search pipeline with a pre-embedded query vector.
    /// `original_query` feeds the reranker; without it reranking is
    /// skipped.
    pub async fn search_with_vector(
        &mut self,
        vector: Vec<f32>,
        options: &SearchOptions,
        original_query: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        validate_options(options)?;

        if !self.index.has_vectors() {
            debug!("index is empty; returning no results");
            return Ok(Vec::new());
        }

        let matches = self
            .index
            .search(vector, options.top_k, options.content_type)
            .await?;
        if matches.embedding_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.store.get_chunks_by_embedding_ids(&matches.embedding_ids)?;
        let by_id: HashMap<&str, &crate::store::ChunkRow> = rows
            .iter()
            .map(|row| (row.embedding_id.as_str(), row))
            .collect();

        let mut hits = Vec::with_capacity(matches.embedding_ids.len());
        let mut missing = 0usize;
        for (embedding_id, distance) in matches
            .embedding_ids
            .iter()
            .zip(matches.distances.iter())
        {
            match by_id.get(embedding_id.as_str()) {
                Some(row) => hits.push(SearchHit {
                    content: row.content.clone(),
                    score: (1.0 - distance).max(0.0).min(1.0),
                    content_type: row.content_type,
                    document: DocumentRef {
                        id: row.document_id,
                        source: row.source.clone(),
                        title: row.title.clone(),
                        content_type: row.content_type,
                        content_id: row.document_content_id.clone(),
                    },
                }),
                None => missing += 1,
            }
        }
        if missing > 0 {
            warn!(
                "{missing} result(s) referenced embeddings missing from the store; \
                 run `raglite rebuild` to resynchronize the index"
            );
        }

        if options.rerank && hits.len() > 1 && self.reranker.is_active() {
            match original_query {
                Some(query) if !query.trim().is_empty() => {
                    if let Err(e) = self.reranker.rerank(query, &mut hits) {
                        warn!("reranking failed ({e}); returning vector-order results");
                    }
                }
                _ => debug!("no query text available; skipping rerank"),
            }
        }

        Ok(hits)
    }

    /// Shut down in the defined order: index worker first, then the
    /// embedder's model resources. The store handle drops with the engine.
    pub async fn cleanup(&mut self) {
        self.index.close().await;
        self.embedder.cleanup();
    }
}

fn validate_options(options: &SearchOptions) -> Result<()> {
    if options.top_k == 0 {
        return Err(RagError::invalid_argument(
            "top_k must be at least 1",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::testing::StubEmbedder;
    use crate::embed::{make_embedding_id, EmbeddedVector};
    use crate::index::InitializeOptions;
    use crate::store::NewChunk;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: SearchEngine,
    }

    /// Build a corpus of (source, content) documents with one chunk each,
    /// embedded by the deterministic stub.
    async fn fixture(documents: &[(&str, &str)]) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(&dir.path().join("metadata.db")).unwrap());
        let mut index = IndexManager::new(
            store.clone(),
            dir.path().join("vectors.idx"),
            "all-minilm-l6-v2",
            16,
        );
        index
            .initialize(InitializeOptions::default())
            .await
            .unwrap();

        let mut embedder = StubEmbedder::new(16);
        for (source, content) in documents {
            let embedding_id = make_embedding_id(source, 0, content);
            store
                .insert_document_chunks(
                    source,
                    source,
                    None,
                    &[NewChunk {
                        embedding_id: embedding_id.clone(),
                        content: content.to_string(),
                        chunk_index: 0,
                        content_type: ContentType::Text,
                    }],
                )
                .unwrap();
            let vector = embedder
                .embed(&EmbedInput::Text(content.to_string()))
                .unwrap();
            index
                .add_vectors(vec![EmbeddedVector {
                    embedding_id,
                    vector,
                }])
                .await
                .unwrap();
        }
        index.save_index().await.unwrap();

        let engine = SearchEngine::new(
            store,
            index,
            Box::new(StubEmbedder::new(16)),
            Reranker::Disabled,
        );
        Fixture { _dir: dir, engine }
    }

    #[tokio::test]
    async fn test_exact_content_query_scores_high() {
        let mut fx = fixture(&[
            ("docs/a.md", "machine learning is powerful"),
            ("docs/b.md", "cooking with cast iron"),
        ])
        .await;

        let hits = fx
            .engine
            .search("machine learning is powerful", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.source, "docs/a.md");
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);
        // Identical text embeds identically under the stub: distance 0
        assert!((hits[0].score - 1.0).abs() < 1e-4);
        // Sorted by descending score
        assert!(hits[0].score >= hits[1].score);
        fx.engine.cleanup().await;
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_no_results() {
        let mut fx = fixture(&[]).await;
        let hits = fx
            .engine
            .search("anything", &SearchOptions::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
        fx.engine.cleanup().await;
    }

    #[tokio::test]
    async fn test_top_k_larger_than_corpus_returns_all() {
        let mut fx = fixture(&[
            ("docs/a.md", "alpha"),
            ("docs/b.md", "beta"),
        ])
        .await;
        let hits = fx
            .engine
            .search(
                "alpha",
                &SearchOptions {
                    top_k: 50,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        fx.engine.cleanup().await;
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected() {
        let mut fx = fixture(&[("docs/a.md", "alpha")]).await;
        let err = fx
            .engine
            .search("", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument { .. }));

        let err = fx
            .engine
            .search(
                "alpha",
                &SearchOptions {
                    top_k: 0,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument { .. }));
        fx.engine.cleanup().await;
    }

    #[tokio::test]
    async fn test_desynchronized_id_is_dropped_not_fatal() {
        let mut fx = fixture(&[("docs/a.md", "alpha document text")]).await;

        // Inject a vector whose embedding id has no store row, placed
        // exactly where the query will land.
        let mut ghost_embedder = StubEmbedder::new(16);
        let ghost_vector = ghost_embedder
            .embed(&EmbedInput::Text("ghost query".to_string()))
            .unwrap();
        fx.engine
            .index_mut()
            .add_vectors(vec![EmbeddedVector {
                embedding_id: "ghost".to_string(),
                vector: ghost_vector,
            }])
            .await
            .unwrap();

        let hits = fx
            .engine
            .search("ghost query", &SearchOptions::default())
            .await
            .unwrap();
        // The ghost is excluded, the real chunk survives
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.source, "docs/a.md");
        fx.engine.cleanup().await;
    }

    #[tokio::test]
    async fn test_scores_are_clamped_and_sorted() {
        let mut fx = fixture(&[
            ("docs/a.md", "first"),
            ("docs/b.md", "second"),
            ("docs/c.md", "third"),
        ])
        .await;
        let hits = fx
            .engine
            .search("completely unrelated query text", &SearchOptions::default())
            .await
            .unwrap();
        for hit in &hits {
            assert!(hit.score >= 0.0 && hit.score <= 1.0);
        }
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        fx.engine.cleanup().await;
    }

    #[tokio::test]
    async fn test_search_with_vector_skips_embedding() {
        let mut fx = fixture(&[("docs/a.md", "alpha document")]).await;
        let mut embedder = StubEmbedder::new(16);
        let vector = embedder
            .embed(&EmbedInput::Text("alpha document".to_string()))
            .unwrap();
        let hits = fx
            .engine
            .search_with_vector(vector, &SearchOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        fx.engine.cleanup().await;
    }
}
