//! Process-wide model cache
//!
//! Model loading is expensive (disk mmap, possible network download), so
//! loaded models are shared per `(variant, model name, cache dir)` key.
//! `try_get_with` coalesces concurrent first loads: callers racing for the
//! same model block on one in-flight load instead of each loading a copy.

use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    RerankInitOptions, RerankerModel, TextEmbedding, TextRerank,
};
use moka::sync::Cache;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

use crate::error::{RagError, Result};

pub type SharedTextModel = Arc<Mutex<TextEmbedding>>;
pub type SharedImageModel = Arc<Mutex<ImageEmbedding>>;
pub type SharedRerankModel = Arc<Mutex<TextRerank>>;

const CACHE_CAPACITY: u64 = 8;

fn text_cache() -> &'static Cache<String, SharedTextModel> {
    static CACHE: OnceLock<Cache<String, SharedTextModel>> = OnceLock::new();
    CACHE.get_or_init(|| Cache::new(CACHE_CAPACITY))
}

fn image_cache() -> &'static Cache<String, SharedImageModel> {
    static CACHE: OnceLock<Cache<String, SharedImageModel>> = OnceLock::new();
    CACHE.get_or_init(|| Cache::new(CACHE_CAPACITY))
}

fn rerank_cache() -> &'static Cache<String, SharedRerankModel> {
    static CACHE: OnceLock<Cache<String, SharedRerankModel>> = OnceLock::new();
    CACHE.get_or_init(|| Cache::new(CACHE_CAPACITY))
}

fn load_error(model_name: &str, detail: impl std::fmt::Display) -> String {
    format!(
        "could not load model '{model_name}': {detail}. Check network access and free \
         disk space in the model cache, then retry"
    )
}

/// Fetch or load a shared text embedding model.
pub fn text_embedding(
    model: EmbeddingModel,
    model_name: &str,
    cache_dir: &Path,
) -> Result<SharedTextModel> {
    let key = format!("text:{model_name}:{}", cache_dir.display());
    text_cache()
        .try_get_with(key, || -> std::result::Result<SharedTextModel, String> {
            debug!("loading text embedding model {model_name}");
            std::fs::create_dir_all(cache_dir)
                .map_err(|e| load_error(model_name, e))?;
            let options = InitOptions::new(model.clone())
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(!crate::output::is_quiet());
            TextEmbedding::try_new(options)
                .map(|engine| Arc::new(Mutex::new(engine)))
                .map_err(|e| load_error(model_name, e))
        })
        .map_err(|e: Arc<String>| RagError::model(e.as_str()))
}

/// Fetch or load a shared image embedding model.
pub fn image_embedding(
    model: ImageEmbeddingModel,
    model_name: &str,
    cache_dir: &Path,
) -> Result<SharedImageModel> {
    let key = format!("image:{model_name}:{}", cache_dir.display());
    image_cache()
        .try_get_with(key, || -> std::result::Result<SharedImageModel, String> {
            debug!("loading image embedding model {model_name}");
            std::fs::create_dir_all(cache_dir)
                .map_err(|e| load_error(model_name, e))?;
            let options = ImageInitOptions::new(model.clone())
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(!crate::output::is_quiet());
            ImageEmbedding::try_new(options)
                .map(|engine| Arc::new(Mutex::new(engine)))
                .map_err(|e| load_error(model_name, e))
        })
        .map_err(|e: Arc<String>| RagError::model(e.as_str()))
}

/// Fetch or load a shared cross-encoder reranking model.
pub fn rerank_model(
    model: RerankerModel,
    model_name: &str,
    cache_dir: &Path,
) -> Result<SharedRerankModel> {
    let key = format!("rerank:{model_name}:{}", cache_dir.display());
    rerank_cache()
        .try_get_with(key, || -> std::result::Result<SharedRerankModel, String> {
            debug!("loading reranking model {model_name}");
            std::fs::create_dir_all(cache_dir)
                .map_err(|e| load_error(model_name, e))?;
            let options = RerankInitOptions::new(model.clone())
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(!crate::output::is_quiet());
            TextRerank::try_new(options)
                .map(|engine| Arc::new(Mutex::new(engine)))
                .map_err(|e| load_error(model_name, e))
        })
        .map_err(|e: Arc<String>| RagError::model(e.as_str()))
}
