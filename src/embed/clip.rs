//! CLIP joint text/image embedder (multimodal mode)
//!
//! Text goes through the CLIP text tower, images through the vision tower;
//! both land in the same 512-dimensional space so a text query retrieves
//! image chunks directly.

use fastembed::{EmbeddingModel, ImageEmbeddingModel};
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

use super::cache::{self, SharedImageModel, SharedTextModel};
use super::{EmbedInput, Embedder, CLIP_MODEL_NAME};
use crate::constants::CLIP_DIMENSIONS;
use crate::error::{RagError, Result};
use crate::store::{ContentType, ModelKind};

const SUPPORTED: &[ContentType] = &[ContentType::Text, ContentType::Image];

/// Joint text+image embedder over the CLIP ViT-B/32 pair
pub struct ClipEmbedder {
    batch_size: usize,
    cache_dir: PathBuf,
    text_engine: Option<SharedTextModel>,
    image_engine: Option<SharedImageModel>,
}

impl ClipEmbedder {
    pub fn new(batch_size: usize, cache_dir: PathBuf) -> Self {
        Self {
            batch_size,
            cache_dir,
            text_engine: None,
            image_engine: None,
        }
    }

    fn text_engine(&mut self) -> Result<SharedTextModel> {
        if self.text_engine.is_none() {
            self.text_engine = Some(cache::text_embedding(
                EmbeddingModel::ClipVitB32,
                CLIP_MODEL_NAME,
                &self.cache_dir,
            )?);
        }
        self.text_engine
            .clone()
            .ok_or_else(|| RagError::model("multimodal text model is not loaded"))
    }

    fn image_engine(&mut self) -> Result<SharedImageModel> {
        if self.image_engine.is_none() {
            self.image_engine = Some(cache::image_embedding(
                ImageEmbeddingModel::ClipVitB32,
                CLIP_MODEL_NAME,
                &self.cache_dir,
            )?);
        }
        self.image_engine
            .clone()
            .ok_or_else(|| RagError::model("multimodal image model is not loaded"))
    }

    fn embed_texts(&mut self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let engine = self.text_engine()?;
        let batch = Some(self.batch_size);
        let mut guard = engine
            .lock()
            .map_err(|_| RagError::model("embedding model worker poisoned; retry the operation"))?;
        guard
            .embed(texts, batch)
            .map_err(|e| RagError::model(format!("text embedding failed: {e}")))
    }

    fn embed_image_paths(&mut self, paths: Vec<PathBuf>) -> Result<Vec<Vec<f32>>> {
        let engine = self.image_engine()?;
        let batch = Some(self.batch_size);
        let mut guard = engine
            .lock()
            .map_err(|_| RagError::model("embedding model worker poisoned; retry the operation"))?;
        guard
            .embed(paths, batch)
            .map_err(|e| RagError::model(format!("image embedding failed: {e}")))
    }

    fn embed_image_bytes(&mut self, bytes: &[u8]) -> Result<Vec<f32>> {
        let suffix = image_suffix(bytes);
        let mut file = tempfile::Builder::new()
            .prefix("raglite-img-")
            .suffix(suffix)
            .tempfile()
            .map_err(|e| RagError::model(format!("could not stage image for embedding: {e}")))?;
        file.write_all(bytes)
            .map_err(|e| RagError::model(format!("could not stage image for embedding: {e}")))?;
        let mut vectors = self.embed_image_paths(vec![file.path().to_path_buf()])?;
        vectors
            .pop()
            .ok_or_else(|| RagError::model("image embedding produced no vector"))
    }
}

/// Pick a file suffix from the image magic bytes so the decoder can sniff
/// the format.
fn image_suffix(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        ".png"
    } else if bytes.starts_with(b"\xff\xd8") {
        ".jpg"
    } else if bytes.starts_with(b"GIF8") {
        ".gif"
    } else if bytes.starts_with(b"RIFF") {
        ".webp"
    } else if bytes.starts_with(b"BM") {
        ".bmp"
    } else {
        ".png"
    }
}

impl Embedder for ClipEmbedder {
    fn model_name(&self) -> &str {
        CLIP_MODEL_NAME
    }

    fn model_kind(&self) -> ModelKind {
        ModelKind::Clip
    }

    fn dimensions(&self) -> usize {
        CLIP_DIMENSIONS
    }

    fn supported_content_types(&self) -> &[ContentType] {
        SUPPORTED
    }

    fn load_model(&mut self) -> Result<()> {
        self.text_engine()?;
        self.image_engine()?;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.text_engine.is_some() && self.image_engine.is_some()
    }

    fn embed(&mut self, input: &EmbedInput) -> Result<Vec<f32>> {
        match input {
            EmbedInput::Text(text) => {
                let mut vectors = self.embed_texts(vec![text.clone()])?;
                vectors
                    .pop()
                    .ok_or_else(|| RagError::model("embedding produced no vector"))
            }
            EmbedInput::ImagePath(path) => {
                if !path.exists() {
                    return Err(RagError::NotFound { path: path.clone() });
                }
                let mut vectors = self.embed_image_paths(vec![path.clone()])?;
                vectors
                    .pop()
                    .ok_or_else(|| RagError::model("image embedding produced no vector"))
            }
            EmbedInput::ImageBytes(bytes) => self.embed_image_bytes(bytes),
        }
    }

    fn embed_batch(&mut self, inputs: &[EmbedInput]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; inputs.len()];

        // Texts batch through the text tower in one call; images go through
        // the vision tower individually so one unreadable file cannot sink
        // the rest.
        let mut texts = Vec::new();
        let mut text_positions = Vec::new();
        for (i, input) in inputs.iter().enumerate() {
            if let EmbedInput::Text(text) = input {
                texts.push(text.clone());
                text_positions.push(i);
            }
        }
        if !texts.is_empty() {
            match self.embed_texts(texts.clone()) {
                Ok(vectors) => {
                    for (position, vector) in text_positions.iter().zip(vectors) {
                        results[*position] = Some(vector);
                    }
                }
                Err(batch_err) => {
                    warn!("batch embedding failed ({batch_err}); retrying items individually");
                    for (position, text) in text_positions.iter().zip(texts) {
                        match self.embed_texts(vec![text]) {
                            Ok(mut vectors) => results[*position] = vectors.pop(),
                            Err(item_err) => warn!("skipping item: {item_err}"),
                        }
                    }
                }
            }
        }

        for (i, input) in inputs.iter().enumerate() {
            if matches!(input, EmbedInput::Text(_)) {
                continue;
            }
            match self.embed(input) {
                Ok(vector) => results[i] = Some(vector),
                Err(e) => warn!("skipping image item: {e}"),
            }
        }
        Ok(results)
    }

    fn cleanup(&mut self) {
        self.text_engine = None;
        self.image_engine = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_clip_metadata() {
        let embedder = ClipEmbedder::new(16, PathBuf::from("/tmp/cache"));
        assert_eq!(embedder.model_name(), "clip-vit-b-32");
        assert_eq!(embedder.dimensions(), 512);
        assert_eq!(embedder.model_kind(), ModelKind::Clip);
        assert!(embedder
            .supported_content_types()
            .contains(&ContentType::Image));
        assert!(!embedder.is_loaded());
    }

    #[test]
    fn test_image_suffix_sniffing() {
        assert_eq!(image_suffix(b"\x89PNG\r\n"), ".png");
        assert_eq!(image_suffix(b"\xff\xd8\xff\xe0"), ".jpg");
        assert_eq!(image_suffix(b"GIF89a"), ".gif");
        assert_eq!(image_suffix(b"RIFF....WEBP"), ".webp");
        assert_eq!(image_suffix(b"BM...."), ".bmp");
        assert_eq!(image_suffix(b"unknown"), ".png");
    }
}
