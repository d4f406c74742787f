//! Sentence-transformer embedder (text-only mode)

use std::path::PathBuf;
use tracing::warn;

use super::cache::{self, SharedTextModel};
use super::{EmbedInput, Embedder, TextModel};
use crate::error::{RagError, Result};
use crate::store::{ContentType, ModelKind};

const SUPPORTED: &[ContentType] = &[ContentType::Text];

/// Text embedder over a fastembed sentence-transformer model
pub struct TextEmbedder {
    model: TextModel,
    batch_size: usize,
    cache_dir: PathBuf,
    engine: Option<SharedTextModel>,
}

impl TextEmbedder {
    pub fn new(model: TextModel, batch_size: usize, cache_dir: PathBuf) -> Self {
        Self {
            model,
            batch_size,
            cache_dir,
            engine: None,
        }
    }

    fn engine(&mut self) -> Result<SharedTextModel> {
        if self.engine.is_none() {
            self.engine = Some(cache::text_embedding(
                self.model.fastembed_model(),
                self.model.name(),
                &self.cache_dir,
            )?);
        }
        self.engine
            .clone()
            .ok_or_else(|| RagError::model("embedding model is not loaded"))
    }

    fn embed_texts(&mut self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let engine = self.engine()?;
        let batch = Some(self.batch_size);
        let mut guard = engine
            .lock()
            .map_err(|_| RagError::model("embedding model worker poisoned; retry the operation"))?;
        guard.embed(texts, batch).map_err(|e| {
            RagError::model(format!(
                "embedding failed with model '{}': {e}",
                self.model.name()
            ))
        })
    }

    fn reject_image(&self) -> RagError {
        RagError::model(
            "this corpus was built in text mode and cannot embed image content; \
             re-ingest with a multimodal model to index images",
        )
    }
}

impl Embedder for TextEmbedder {
    fn model_name(&self) -> &str {
        self.model.name()
    }

    fn model_kind(&self) -> ModelKind {
        ModelKind::SentenceTransformer
    }

    fn dimensions(&self) -> usize {
        self.model.dimensions()
    }

    fn supported_content_types(&self) -> &[ContentType] {
        SUPPORTED
    }

    fn load_model(&mut self) -> Result<()> {
        self.engine().map(|_| ())
    }

    fn is_loaded(&self) -> bool {
        self.engine.is_some()
    }

    fn embed(&mut self, input: &EmbedInput) -> Result<Vec<f32>> {
        let EmbedInput::Text(text) = input else {
            return Err(self.reject_image());
        };
        let mut vectors = self.embed_texts(vec![text.clone()])?;
        vectors
            .pop()
            .ok_or_else(|| RagError::model("embedding produced no vector"))
    }

    fn embed_batch(&mut self, inputs: &[EmbedInput]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; inputs.len()];
        let mut texts = Vec::new();
        let mut positions = Vec::new();
        for (i, input) in inputs.iter().enumerate() {
            match input {
                EmbedInput::Text(text) => {
                    texts.push(text.clone());
                    positions.push(i);
                }
                _ => warn!("skipping image input: text mode embeds text only"),
            }
        }
        if texts.is_empty() {
            return Ok(results);
        }

        match self.embed_texts(texts.clone()) {
            Ok(vectors) => {
                for (position, vector) in positions.iter().zip(vectors) {
                    results[*position] = Some(vector);
                }
            }
            Err(batch_err) => {
                // A whole-batch failure may be one bad item; retry items
                // individually so the rest of the batch survives.
                warn!("batch embedding failed ({batch_err}); retrying items individually");
                for (position, text) in positions.iter().zip(texts) {
                    match self.embed_texts(vec![text]) {
                        Ok(mut vectors) => results[*position] = vectors.pop(),
                        Err(item_err) => warn!("skipping item: {item_err}"),
                    }
                }
            }
        }
        Ok(results)
    }

    fn cleanup(&mut self) {
        self.engine = None;
    }
}
