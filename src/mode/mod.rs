//! Mode detection and engine factories
//!
//! A persisted corpus carries its mode in the system info row. Detection
//! never fails: an absent, unreadable or corrupt store yields the canonical
//! text-mode default, so a fresh engine can always start. The factories
//! combine the detected mode with explicit options to assemble a search
//! engine or an ingestion pipeline, constructing only the model variants
//! the mode actually needs.

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::constants::{CLIP_DIMENSIONS, DEFAULT_DIMENSIONS};
use crate::embed::{
    is_clip_model_name, ClipEmbedder, Embedder, TextEmbedder, TextModel, CLIP_MODEL_NAME,
};
use crate::error::{RagError, Result};
use crate::index::{IndexManager, InitializeOptions};
use crate::ingest::IngestionPipeline;
use crate::kb::{KnowledgeBaseManager, ResetOptions};
use crate::rerank::{CrossEncoderReranker, Reranker, TextDerivedReranker};
use crate::search::SearchEngine;
use crate::store::{ContentType, MetadataStore, Mode, ModelKind, RerankStrategy};

/// The resolved corpus mode an engine is wired for
#[derive(Debug, Clone, PartialEq)]
pub struct ModeConfig {
    pub mode: Mode,
    pub model_name: String,
    pub model_kind: ModelKind,
    pub dimensions: usize,
    pub reranking_strategy: RerankStrategy,
}

impl Default for ModeConfig {
    /// The canonical default: text mode over the MiniLM-L6 sentence
    /// transformer with cross-encoder reranking.
    fn default() -> Self {
        Self {
            mode: Mode::Text,
            model_name: TextModel::default().name().to_string(),
            model_kind: ModelKind::SentenceTransformer,
            dimensions: DEFAULT_DIMENSIONS,
            reranking_strategy: RerankStrategy::CrossEncoder,
        }
    }
}

impl ModeConfig {
    fn multimodal() -> Self {
        Self {
            mode: Mode::Multimodal,
            model_name: CLIP_MODEL_NAME.to_string(),
            model_kind: ModelKind::Clip,
            dimensions: CLIP_DIMENSIONS,
            reranking_strategy: RerankStrategy::TextDerived,
        }
    }

    pub fn supported_content_types(&self) -> Vec<ContentType> {
        match self.model_kind {
            ModelKind::SentenceTransformer => vec![ContentType::Text],
            ModelKind::Clip => vec![ContentType::Text, ContentType::Image],
        }
    }
}

/// Read the corpus mode from the store at `store_path`. Never fails.
pub fn detect_mode(store_path: &Path) -> ModeConfig {
    if !store_path.exists() {
        debug!("no store at {}; using the text-mode default", store_path.display());
        return ModeConfig::default();
    }
    let store = match MetadataStore::open(store_path) {
        Ok(store) => store,
        Err(e) => {
            warn!("could not read the store for mode detection ({e}); using the default");
            return ModeConfig::default();
        }
    };
    match store.get_system_info() {
        Ok(Some(info)) => ModeConfig {
            mode: info.mode,
            model_name: info.model_name,
            model_kind: info.model_kind,
            dimensions: info.model_dimensions,
            reranking_strategy: info.reranking_strategy,
        },
        Ok(None) => {
            debug!("store has no system info; using the text-mode default");
            ModeConfig::default()
        }
        Err(e) => {
            warn!("system info was unreadable ({e}); using the default");
            ModeConfig::default()
        }
    }
}

/// Combine the detected mode with explicit options. An explicit embedding
/// model wins over detection; an explicit reranking strategy must be
/// permitted for the resolved mode.
pub fn resolve_mode_config(config: &EngineConfig, detected: ModeConfig) -> Result<ModeConfig> {
    let mut resolved = match &config.embedding_model {
        Some(name) if is_clip_model_name(name) => ModeConfig::multimodal(),
        Some(name) => match TextModel::from_name(name) {
            Some(model) => ModeConfig {
                mode: Mode::Text,
                model_name: model.name().to_string(),
                model_kind: ModelKind::SentenceTransformer,
                dimensions: model.dimensions(),
                reranking_strategy: RerankStrategy::CrossEncoder,
            },
            None => {
                return Err(RagError::config(format!(
                    "unknown embedding model '{name}': expected one of all-minilm-l6-v2, \
                     bge-small-en-v1.5, bge-base-en-v1.5, mxbai-embed-large-v1, clip-vit-b-32"
                )))
            }
        },
        None => detected.clone(),
    };

    // Carry a compatible detected strategy over when the mode is unchanged
    if resolved.mode == detected.mode {
        resolved.reranking_strategy = detected.reranking_strategy;
    }

    if let Some(strategy) = config.reranking_strategy {
        if !RerankStrategy::permitted_for(resolved.mode).contains(&strategy) {
            return Err(RagError::config(format!(
                "reranking strategy '{strategy}' is not available in {} mode; pick one of \
                 the strategies that mode supports, or 'disabled'",
                resolved.mode
            )));
        }
        resolved.reranking_strategy = strategy;
    }

    Ok(resolved)
}

/// Build the embedder variant the mode calls for. Models load lazily on
/// first embed, keeping text-only startup fast.
pub fn build_embedder(mode: &ModeConfig, config: &EngineConfig) -> Result<Box<dyn Embedder>> {
    let cache_dir = config.resolved_model_cache();
    match mode.model_kind {
        ModelKind::SentenceTransformer => {
            let model = TextModel::from_name(&mode.model_name).ok_or_else(|| {
                RagError::config(format!(
                    "the stored model '{}' is not available in this build; run \
                     `raglite rebuild` with a supported model",
                    mode.model_name
                ))
            })?;
            Ok(Box::new(TextEmbedder::new(
                model,
                config.batch_size,
                cache_dir,
            )))
        }
        ModelKind::Clip => Ok(Box::new(ClipEmbedder::new(config.batch_size, cache_dir))),
    }
}

/// Build the reranker for the resolved strategy.
pub fn build_reranker(mode: &ModeConfig, config: &EngineConfig) -> Result<Reranker> {
    let cache_dir = config.resolved_model_cache();
    Ok(match mode.reranking_strategy {
        RerankStrategy::CrossEncoder => {
            Reranker::CrossEncoder(CrossEncoderReranker::new(cache_dir))
        }
        RerankStrategy::TextDerived => Reranker::TextDerived(TextDerivedReranker::new(
            Box::new(ClipEmbedder::new(config.batch_size, cache_dir)),
        )),
        RerankStrategy::Disabled => Reranker::Disabled,
    })
}

/// Open a search engine over an existing corpus, auto-detecting its mode.
pub async fn open_search_engine(config: &EngineConfig) -> Result<SearchEngine> {
    config.validate()?;
    let detected = detect_mode(&config.store_path());
    let mode = resolve_mode_config(config, detected)?;

    let store = Arc::new(MetadataStore::open(&config.store_path())?);
    let embedder = build_embedder(&mode, config)?;
    let mut index = IndexManager::new(
        store.clone(),
        config.index_path(),
        &mode.model_name,
        mode.dimensions,
    );
    index.initialize(InitializeOptions::default()).await?;
    let reranker = build_reranker(&mode, config)?;

    Ok(SearchEngine::new(store, index, embedder, reranker))
}

/// Open an ingestion pipeline. With `force_rebuild` set, the knowledge base
/// is reset first so a model switch starts from a clean corpus.
pub async fn open_ingestion_pipeline(
    config: &EngineConfig,
    cancel: CancellationToken,
) -> Result<IngestionPipeline> {
    config.validate()?;

    if config.force_rebuild {
        let kb = KnowledgeBaseManager::new(config.clone());
        let outcome = kb.reset(ResetOptions::default()).await?;
        debug!(
            "knowledge base reset before ingestion: {} documents, {} vectors cleared",
            outcome.documents_deleted, outcome.vectors_cleared
        );
    }

    let detected = detect_mode(&config.store_path());
    let mode = resolve_mode_config(config, detected)?;

    let store = Arc::new(MetadataStore::open(&config.store_path())?);
    let embedder = build_embedder(&mode, config)?;
    let index = IndexManager::new(
        store.clone(),
        config.index_path(),
        &mode.model_name,
        mode.dimensions,
    );

    IngestionPipeline::new(config.clone(), mode, store, index, embedder, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::testing::StubEmbedder;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_detection_defaults_when_store_is_absent() {
        let dir = tempdir().unwrap();
        let mode = detect_mode(&dir.path().join("missing.db"));
        assert_eq!(mode, ModeConfig::default());
        assert_eq!(mode.dimensions, 384);
        assert_eq!(mode.reranking_strategy, RerankStrategy::CrossEncoder);
    }

    #[test]
    fn test_detection_defaults_on_corrupt_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        std::fs::write(&path, "not a valid store").unwrap();
        // Must not panic or error
        let mode = detect_mode(&path);
        assert_eq!(mode, ModeConfig::default());
    }

    #[test]
    fn test_detection_reads_persisted_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        {
            let store = MetadataStore::open(&path).unwrap();
            store
                .set_stored_model_info("clip-vit-b-32", 512, ModelKind::Clip)
                .unwrap();
        }
        let mode = detect_mode(&path);
        assert_eq!(mode.mode, Mode::Multimodal);
        assert_eq!(mode.dimensions, 512);
        assert_eq!(mode.model_kind, ModelKind::Clip);
    }

    #[test]
    fn test_explicit_model_overrides_detection() {
        let config = EngineConfig {
            embedding_model: Some("bge-base".to_string()),
            ..Default::default()
        };
        let resolved = resolve_mode_config(&config, ModeConfig::default()).unwrap();
        assert_eq!(resolved.model_name, "bge-base-en-v1.5");
        assert_eq!(resolved.dimensions, 768);

        let config = EngineConfig {
            embedding_model: Some("clip".to_string()),
            ..Default::default()
        };
        let resolved = resolve_mode_config(&config, ModeConfig::default()).unwrap();
        assert_eq!(resolved.mode, Mode::Multimodal);
        assert_eq!(resolved.reranking_strategy, RerankStrategy::TextDerived);
    }

    #[test]
    fn test_unknown_model_is_a_configuration_error() {
        let config = EngineConfig {
            embedding_model: Some("word2vec".to_string()),
            ..Default::default()
        };
        let err = resolve_mode_config(&config, ModeConfig::default()).unwrap_err();
        assert!(matches!(err, RagError::Config { .. }));
    }

    #[test]
    fn test_strategy_must_match_mode() {
        // text-derived is a multimodal strategy
        let config = EngineConfig {
            reranking_strategy: Some(RerankStrategy::TextDerived),
            ..Default::default()
        };
        let err = resolve_mode_config(&config, ModeConfig::default()).unwrap_err();
        assert!(matches!(err, RagError::Config { .. }));

        // disabled is always allowed
        let config = EngineConfig {
            reranking_strategy: Some(RerankStrategy::Disabled),
            ..Default::default()
        };
        let resolved = resolve_mode_config(&config, ModeConfig::default()).unwrap();
        assert_eq!(resolved.reranking_strategy, RerankStrategy::Disabled);
    }

    /// The full model-switch story through the factories: a corpus built
    /// at 384 dimensions rejects a 768-dimension model until
    /// `force_rebuild` resets the knowledge base, after which ingestion
    /// succeeds and the stored model info reports the new dimensions.
    #[tokio::test]
    async fn test_model_switch_requires_and_honors_force_rebuild() {
        let dir = tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("a.md"), "machine learning is powerful").unwrap();

        let config = EngineConfig {
            data_dir: dir.path().join(".raglite"),
            base_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        // Build the corpus at the default 384 dimensions
        {
            let mut pipeline =
                open_ingestion_pipeline(&config, CancellationToken::new())
                    .await
                    .unwrap();
            pipeline.set_embedder_for_tests(Box::new(StubEmbedder::new(384)));
            let report = pipeline.ingest_path(&docs).await.unwrap();
            assert_eq!(report.documents_processed, 1);
            pipeline.cleanup().await;

            let (model, dims) = pipeline
                .store()
                .get_stored_model_info()
                .unwrap()
                .unwrap();
            assert_eq!(model, "all-minilm-l6-v2");
            assert_eq!(dims, 384);
        }

        // Switching to a 768-dimension model without force_rebuild must
        // fail and name the recovery path
        let switched = EngineConfig {
            embedding_model: Some("bge-base-en-v1.5".to_string()),
            ..config.clone()
        };
        {
            let mut pipeline =
                open_ingestion_pipeline(&switched, CancellationToken::new())
                    .await
                    .unwrap();
            pipeline.set_embedder_for_tests(Box::new(StubEmbedder::with_name(
                768,
                "bge-base-en-v1.5",
            )));
            let err = pipeline.ingest_path(&docs).await.unwrap_err();
            assert!(matches!(err, RagError::ModelMismatch { .. }));
            assert!(err.to_string().contains("rebuild"));
            pipeline.cleanup().await;
        }

        // With force_rebuild the knowledge base resets and ingestion
        // succeeds at the new dimension
        let forced = EngineConfig {
            force_rebuild: true,
            ..switched
        };
        {
            let mut pipeline =
                open_ingestion_pipeline(&forced, CancellationToken::new())
                    .await
                    .unwrap();
            pipeline.set_embedder_for_tests(Box::new(StubEmbedder::with_name(
                768,
                "bge-base-en-v1.5",
            )));
            let report = pipeline.ingest_path(&docs).await.unwrap();
            assert_eq!(report.documents_processed, 1);
            assert_eq!(report.embeddings_generated, 1);

            let (model, dims) = pipeline
                .store()
                .get_stored_model_info()
                .unwrap()
                .unwrap();
            assert_eq!(model, "bge-base-en-v1.5");
            assert_eq!(dims, 768);
            assert_eq!(pipeline.store().count_chunks().unwrap(), 1);
            pipeline.cleanup().await;
        }
    }

    #[test]
    fn test_reranker_variant_follows_strategy() {
        let config = EngineConfig::default();
        let mode = ModeConfig {
            reranking_strategy: RerankStrategy::Disabled,
            ..ModeConfig::default()
        };
        let reranker = build_reranker(&mode, &config).unwrap();
        assert!(!reranker.is_active());

        let mode = ModeConfig::default();
        let reranker = build_reranker(&mode, &config).unwrap();
        assert_eq!(reranker.strategy(), RerankStrategy::CrossEncoder);
    }
}
