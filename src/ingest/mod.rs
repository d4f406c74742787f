//! Ingestion pipeline
//!
//! Discovery → chunking → batch embedding → storage → index update. Writes
//! are single-writer and sequential: for each document the store commits
//! first (chunks plus journal entries in one transaction), then the
//! vectors go to the index, and the index is persisted after each
//! file-level ingest and once more at completion as a durability safety
//! net. Per-item failures are counted, never fatal; ingestion keeps going.

use chrono::Utc;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunker::TextChunker;
use crate::config::{source_for_path, title_for_path, EngineConfig};
use crate::constants::{IMAGE_EXTENSIONS, TEXT_EXTENSIONS};
use crate::content::ContentStore;
use crate::embed::{make_embedding_id, EmbedInput, EmbeddedVector, Embedder};
use crate::error::{RagError, Result};
use crate::index::{IndexManager, InitializeOptions};
use crate::mode::ModeConfig;
use crate::store::{
    ContentMetadataRow, ContentType, MetadataStore, Mode, NewChunk, StorageType,
    SystemInfoUpdate,
};
use std::sync::Arc;

/// Outcome of an ingestion call
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestReport {
    pub documents_processed: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub document_errors: usize,
    pub embedding_errors: usize,
    pub processing_time_ms: u128,
}

/// Metadata accompanying bytes ingested from memory
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    pub display_name: String,
    pub original_path: Option<String>,
    /// MIME-like content type, e.g. `text/markdown` or `image/png`
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocKind {
    Text,
    Image,
}

/// A document read and chunked, ready for embedding
struct PreparedDocument {
    source: String,
    title: String,
    content_id: Option<String>,
    /// `(content, embed input, content type)` per chunk, in chunk order
    items: Vec<(String, EmbedInput, ContentType)>,
}

/// End-to-end document ingestion for one corpus
pub struct IngestionPipeline {
    config: EngineConfig,
    mode: ModeConfig,
    store: Arc<MetadataStore>,
    index: IndexManager,
    embedder: Box<dyn Embedder>,
    chunker: TextChunker,
    content: ContentStore,
    cancel: CancellationToken,
    initialized: bool,
}

impl IngestionPipeline {
    pub fn new(
        config: EngineConfig,
        mode: ModeConfig,
        store: Arc<MetadataStore>,
        index: IndexManager,
        embedder: Box<dyn Embedder>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let chunker = TextChunker::new(config.chunk_size, config.chunk_overlap)?;
        let content = ContentStore::new(config.content_dir());
        Ok(Self {
            config,
            mode,
            store,
            index,
            embedder,
            chunker,
            content,
            cancel,
            initialized: false,
        })
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

    pub fn mode(&self) -> &ModeConfig {
        &self.mode
    }

    /// Lazy setup on first use: open the index (with the model check) and
    /// make sure the system info row exists.
    async fn ensure_initialized(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.index.initialize(InitializeOptions::default()).await?;
        self.ensure_system_info()?;
        self.initialized = true;
        Ok(())
    }

    fn ensure_system_info(&self) -> Result<()> {
        if self.store.get_system_info()?.is_none() {
            self.store.set_system_info(SystemInfoUpdate {
                mode: Some(self.mode.mode),
                model_name: Some(self.mode.model_name.clone()),
                model_kind: Some(self.mode.model_kind),
                model_dimensions: Some(self.mode.dimensions),
                supported_content_types: Some(self.mode.supported_content_types()),
                reranking_strategy: Some(self.mode.reranking_strategy),
                ..Default::default()
            })?;
            debug!("system info created for {} mode", self.mode.mode);
        }
        Ok(())
    }

    /// Ingest a file or a directory tree.
    pub async fn ingest_path(&mut self, path: &Path) -> Result<IngestReport> {
        if !path.exists() {
            return Err(RagError::NotFound {
                path: path.to_path_buf(),
            });
        }
        if path.is_dir() {
            self.ingest_directory(path).await
        } else {
            self.ingest_file(path).await
        }
    }

    /// Ingest a single file, then persist the index.
    pub async fn ingest_file(&mut self, path: &Path) -> Result<IngestReport> {
        self.ensure_initialized().await?;
        let started = Instant::now();
        let mut report = IngestReport::default();

        match classify(path, self.mode.mode) {
            Some(kind) => {
                if let Some(prepared) = self.prepare_file(path, kind, &mut report) {
                    self.commit_document(prepared, &mut report).await?;
                }
            }
            None => {
                warn!(
                    "skipping {}: unsupported file type; convert it to a supported format",
                    path.display()
                );
                report.document_errors += 1;
            }
        }

        self.index.save_index().await?;
        report.processing_time_ms = started.elapsed().as_millis();
        Ok(report)
    }

    /// Walk a directory and ingest every supported file. The index is
    /// persisted after each file and once more at the end.
    pub async fn ingest_directory(&mut self, dir: &Path) -> Result<IngestReport> {
        self.ensure_initialized().await?;
        let started = Instant::now();
        let mut report = IngestReport::default();

        let (files, unsupported) = discover(dir, self.mode.mode);
        report.document_errors += unsupported;
        info!(
            "discovered {} supported files under {} ({} skipped)",
            files.len(),
            dir.display(),
            unsupported
        );

        // Reading and chunking parallelize cleanly; embedding and the
        // single-writer store stay sequential below.
        let base = self.config.resolved_base_dir();
        let strategy = self.config.path_storage;
        let chunker = self.chunker.clone();
        let prepared: Vec<Option<PreparedDocument>> = files
            .par_iter()
            .map(|(path, kind)| prepare_file(path, *kind, strategy, &base, &chunker))
            .collect();

        let progress = crate::output::progress_bar(files.len() as u64);

        for (prepared, (path, _)) in prepared.into_iter().zip(&files) {
            if self.cancel.is_cancelled() {
                warn!("ingestion interrupted; the index reflects files completed so far");
                break;
            }
            progress.set_message(
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            );
            match prepared {
                Some(document) => {
                    self.commit_document(document, &mut report).await?;
                    self.index.save_index().await?;
                }
                None => report.document_errors += 1,
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        self.index.save_index().await?;
        report.processing_time_ms = started.elapsed().as_millis();
        info!(
            "ingested {} documents, {} embeddings ({} document errors, {} embedding errors)",
            report.documents_processed,
            report.embeddings_generated,
            report.document_errors,
            report.embedding_errors
        );
        Ok(report)
    }

    /// Ingest raw bytes: store them in the content directory (deduplicated
    /// by hash), record their metadata, then run the normal pipeline.
    pub async fn ingest_from_memory(
        &mut self,
        bytes: &[u8],
        document: &MemoryDocument,
    ) -> Result<IngestReport> {
        self.ensure_initialized().await?;
        let started = Instant::now();
        let mut report = IngestReport::default();

        let stored = self
            .content
            .store_bytes(bytes, &document.display_name, &document.content_type)?;
        let row = ContentMetadataRow {
            id: Uuid::new_v4().to_string(),
            storage_type: StorageType::ContentDir,
            original_path: document.original_path.clone(),
            content_path: Some(stored.content_path.to_string_lossy().to_string()),
            display_name: document.display_name.clone(),
            content_type: document.content_type.clone(),
            file_size: stored.file_size,
            content_hash: stored.content_hash.clone(),
            created_at: Utc::now().to_rfc3339(),
        };
        let content_id = self.store.insert_content_metadata(&row)?;

        let source = document
            .original_path
            .clone()
            .unwrap_or_else(|| format!("memory://{}", stored.content_hash));
        let title = document.display_name.clone();

        let is_image = document.content_type.to_ascii_lowercase().starts_with("image/");
        let items = if is_image {
            if self.mode.mode != Mode::Multimodal {
                return Err(RagError::model(
                    "this corpus was built in text mode and cannot embed image content; \
                     re-ingest with a multimodal model to index images",
                ));
            }
            vec![(
                source.clone(),
                EmbedInput::ImagePath(stored.content_path.clone()),
                ContentType::Image,
            )]
        } else {
            let text = String::from_utf8_lossy(bytes).to_string();
            self.chunker
                .chunk(&text)
                .into_iter()
                .map(|chunk| {
                    let input = EmbedInput::Text(chunk.content.clone());
                    (chunk.content, input, ContentType::Text)
                })
                .collect()
        };

        let prepared = PreparedDocument {
            source,
            title,
            content_id: Some(content_id),
            items,
        };
        self.commit_document(prepared, &mut report).await?;
        self.index.save_index().await?;
        report.processing_time_ms = started.elapsed().as_millis();
        Ok(report)
    }

    /// Rebuild the index from the stored chunks with the pipeline's
    /// embedder, updating the recorded model identity on success.
    pub async fn rebuild_index(&mut self) -> Result<usize> {
        self.index.close().await;
        self.index
            .initialize(InitializeOptions {
                skip_model_check: true,
                force_recreate: true,
            })
            .await?;
        self.initialized = true;
        let count = self
            .index
            .rebuild_with_embeddings(self.embedder.as_mut())
            .await?;
        self.ensure_system_info()?;
        Ok(count)
    }

    /// Persist the index now.
    pub async fn save_index(&mut self) -> Result<usize> {
        self.ensure_initialized().await?;
        self.index.save_index().await
    }

    /// Release everything: index worker first, then embedder resources.
    /// The store handle drops with the pipeline.
    pub async fn cleanup(&mut self) {
        self.index.close().await;
        self.embedder.cleanup();
        self.initialized = false;
    }

    /// Swap the embedder for a deterministic double so factory-assembled
    /// pipelines can run without model downloads.
    #[cfg(test)]
    pub(crate) fn set_embedder_for_tests(&mut self, embedder: Box<dyn Embedder>) {
        self.embedder = embedder;
    }

    // === internals ===

    fn prepare_file(
        &self,
        path: &Path,
        kind: DocKind,
        report: &mut IngestReport,
    ) -> Option<PreparedDocument> {
        let base = self.config.resolved_base_dir();
        let prepared = prepare_file(path, kind, self.config.path_storage, &base, &self.chunker);
        if prepared.is_none() {
            report.document_errors += 1;
        }
        prepared
    }

    /// Embed a prepared document, commit its rows, then add its vectors.
    /// Store first, index second; the journal entries written with the
    /// chunks are cleared by the next successful index save.
    async fn commit_document(
        &mut self,
        prepared: PreparedDocument,
        report: &mut IngestReport,
    ) -> Result<()> {
        report.chunks_created += prepared.items.len();

        let inputs: Vec<EmbedInput> = prepared
            .items
            .iter()
            .map(|(_, input, _)| input.clone())
            .collect();
        let vectors = self.embedder.embed_batch(&inputs)?;

        let mut new_chunks = Vec::with_capacity(prepared.items.len());
        let mut embedded = Vec::with_capacity(prepared.items.len());
        for (index, ((content, _, content_type), vector)) in
            prepared.items.into_iter().zip(vectors).enumerate()
        {
            match vector {
                Some(vector) => {
                    let embedding_id = make_embedding_id(&prepared.source, index, &content);
                    new_chunks.push(NewChunk {
                        embedding_id: embedding_id.clone(),
                        content,
                        chunk_index: index,
                        content_type,
                    });
                    embedded.push(EmbeddedVector {
                        embedding_id,
                        vector,
                    });
                }
                None => report.embedding_errors += 1,
            }
        }

        self.store.insert_document_chunks(
            &prepared.source,
            &prepared.title,
            prepared.content_id.as_deref(),
            &new_chunks,
        )?;
        self.index.add_vectors(embedded.clone()).await?;

        report.documents_processed += 1;
        report.embeddings_generated += embedded.len();
        Ok(())
    }
}

/// Read and chunk one file. Returns `None` on read failure; the caller
/// counts it. Free of pipeline state so directory walks can run it in
/// parallel.
fn prepare_file(
    path: &Path,
    kind: DocKind,
    strategy: crate::config::PathStorage,
    base: &Path,
    chunker: &TextChunker,
) -> Option<PreparedDocument> {
    let source = source_for_path(path, strategy, base);
    let title = title_for_path(path);

    let items = match kind {
        DocKind::Text => {
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        "could not read {}: {e}; re-ingest it after fixing the file",
                        path.display()
                    );
                    return None;
                }
            };
            chunker
                .chunk(&text)
                .into_iter()
                .map(|chunk| {
                    let input = EmbedInput::Text(chunk.content.clone());
                    (chunk.content, input, ContentType::Text)
                })
                .collect()
        }
        DocKind::Image => {
            let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            vec![(
                absolute.to_string_lossy().to_string(),
                EmbedInput::ImagePath(absolute),
                ContentType::Image,
            )]
        }
    };

    Some(PreparedDocument {
        source,
        title,
        content_id: None,
        items,
    })
}

fn classify(path: &Path, mode: Mode) -> Option<DocKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        Some(DocKind::Text)
    } else if mode == Mode::Multimodal && IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(DocKind::Image)
    } else {
        None
    }
}

/// Walk `dir`, honoring ignore files, and classify every regular file.
/// Returns the supported files in stable order plus the unsupported count.
fn discover(dir: &Path, mode: Mode) -> (Vec<(PathBuf, DocKind)>, usize) {
    let mut files = Vec::new();
    let mut unsupported = 0;
    for entry in WalkBuilder::new(dir).build().flatten() {
        let is_file = entry
            .file_type()
            .map(|file_type| file_type.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        match classify(entry.path(), mode) {
            Some(kind) => files.push((entry.path().to_path_buf(), kind)),
            None => unsupported += 1,
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    (files, unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::testing::StubEmbedder;
    use crate::store::RerankStrategy;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn pipeline_in(dir: &Path, fail_marker: Option<&str>) -> IngestionPipeline {
        let data_dir = dir.join(".raglite");
        let config = EngineConfig {
            data_dir: data_dir.clone(),
            base_dir: Some(dir.to_path_buf()),
            ..Default::default()
        };
        let store = Arc::new(MetadataStore::open(&config.store_path()).unwrap());
        let index = IndexManager::new(
            store.clone(),
            config.index_path(),
            "all-minilm-l6-v2",
            384,
        );
        let mut embedder = StubEmbedder::new(384);
        embedder.fail_marker = fail_marker.map(|s| s.to_string());
        IngestionPipeline::new(
            config,
            ModeConfig::default(),
            store,
            index,
            Box::new(embedder),
            CancellationToken::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_first_time_ingest_writes_system_info() {
        let dir = tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("a.md"), "machine learning is powerful").unwrap();

        let mut pipeline = pipeline_in(dir.path(), None);
        let report = pipeline.ingest_path(&docs).await.unwrap();

        assert_eq!(report.documents_processed, 1);
        assert_eq!(report.chunks_created, 1);
        assert_eq!(report.embeddings_generated, 1);
        assert_eq!(report.document_errors, 0);
        assert_eq!(report.embedding_errors, 0);

        let info = pipeline.store().get_system_info().unwrap().unwrap();
        assert_eq!(info.mode, Mode::Text);
        assert_eq!(info.model_dimensions, 384);
        assert_eq!(info.supported_content_types, vec![ContentType::Text]);
        assert_eq!(info.reranking_strategy, RerankStrategy::CrossEncoder);

        // chunk ↔ vector bijection
        assert_eq!(pipeline.store().count_chunks().unwrap(), 1);
        assert_eq!(pipeline.index().get_stats().vector_count, 1);
        assert!(pipeline.store().journal_ids().unwrap().is_empty());
        pipeline.cleanup().await;
    }

    #[tokio::test]
    async fn test_unsupported_files_count_as_document_errors() {
        let dir = tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("a.md"), "supported text").unwrap();
        std::fs::write(docs.join("b.bin"), [0u8, 1, 2]).unwrap();

        let mut pipeline = pipeline_in(dir.path(), None);
        let report = pipeline.ingest_path(&docs).await.unwrap();
        assert_eq!(report.documents_processed, 1);
        assert_eq!(report.document_errors, 1);
        pipeline.cleanup().await;
    }

    #[tokio::test]
    async fn test_embedding_errors_do_not_abort() {
        let dir = tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("a.md"), "good text here").unwrap();
        std::fs::write(docs.join("b.md"), "POISON in this file").unwrap();

        let mut pipeline = pipeline_in(dir.path(), Some("POISON"));
        let report = pipeline.ingest_path(&docs).await.unwrap();
        assert_eq!(report.documents_processed, 2);
        assert_eq!(report.chunks_created, 2);
        assert_eq!(report.embeddings_generated, 1);
        assert_eq!(report.embedding_errors, 1);
        pipeline.cleanup().await;
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline_in(dir.path(), None);
        let err = pipeline
            .ingest_path(&dir.path().join("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NotFound { .. }));
        pipeline.cleanup().await;
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let dir = tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("a.md"), "stable content").unwrap();

        let mut pipeline = pipeline_in(dir.path(), None);
        pipeline.ingest_path(&docs).await.unwrap();
        pipeline.ingest_path(&docs).await.unwrap();

        assert_eq!(pipeline.store().count_documents().unwrap(), 1);
        assert_eq!(pipeline.store().count_chunks().unwrap(), 1);
        assert_eq!(pipeline.index().get_stats().vector_count, 1);
        pipeline.cleanup().await;
    }

    #[tokio::test]
    async fn test_ingest_from_memory_stores_content() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline_in(dir.path(), None);
        let report = pipeline
            .ingest_from_memory(
                b"notes from memory about retrieval engines",
                &MemoryDocument {
                    display_name: "notes.md".to_string(),
                    original_path: None,
                    content_type: "text/markdown".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(report.documents_processed, 1);
        assert_eq!(report.embeddings_generated, 1);

        let chunks = pipeline.store().all_chunks().unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].source.starts_with("memory://"));
        let content_id = chunks[0].document_content_id.clone().unwrap();
        let meta = pipeline
            .store()
            .get_content_metadata(&content_id)
            .unwrap()
            .unwrap();
        assert_eq!(meta.display_name, "notes.md");
        assert!(meta.content_path.is_some());
        pipeline.cleanup().await;
    }

    #[tokio::test]
    async fn test_rebuild_reembeds_all_chunks() {
        let dir = tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("a.md"), "alpha text").unwrap();
        std::fs::write(docs.join("b.md"), "beta text").unwrap();

        let mut pipeline = pipeline_in(dir.path(), None);
        pipeline.ingest_path(&docs).await.unwrap();
        assert_eq!(pipeline.index().get_stats().vector_count, 2);

        let rebuilt = pipeline.rebuild_index().await.unwrap();
        assert_eq!(rebuilt, 2);
        assert_eq!(pipeline.index().get_stats().vector_count, 2);
        pipeline.cleanup().await;
    }

    #[tokio::test]
    async fn test_model_mismatch_surfaces_on_first_ingest() {
        let dir = tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("a.md"), "text").unwrap();

        // First ingest at 384 dimensions
        let mut pipeline = pipeline_in(dir.path(), None);
        pipeline.ingest_path(&docs).await.unwrap();
        pipeline.cleanup().await;

        // Reopen with a 768-dimension model: the mismatch must name rebuild
        let data_dir = dir.path().join(".raglite");
        let config = EngineConfig {
            data_dir,
            base_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let store = Arc::new(MetadataStore::open(&config.store_path()).unwrap());
        let index = IndexManager::new(
            store.clone(),
            config.index_path(),
            "bge-base-en-v1.5",
            768,
        );
        let mut mode = ModeConfig::default();
        mode.model_name = "bge-base-en-v1.5".to_string();
        mode.dimensions = 768;
        let mut mismatched = IngestionPipeline::new(
            config,
            mode,
            store,
            index,
            Box::new(StubEmbedder::with_name(768, "bge-base-en-v1.5")),
            CancellationToken::new(),
        )
        .unwrap();

        let err = mismatched.ingest_path(&docs).await.unwrap_err();
        assert!(matches!(err, RagError::ModelMismatch { .. }));
        assert!(err.to_string().contains("rebuild"));
        mismatched.cleanup().await;
    }
}
