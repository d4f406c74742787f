//! Embedding contract and model registry
//!
//! An [`Embedder`] turns text or image inputs into fixed-dimension vectors.
//! Two variants exist: the sentence-transformer family for text-only
//! corpora, and the CLIP joint space for multimodal corpora. Both load
//! their models lazily through the shared process cache on first use.

pub mod cache;
mod clip;
mod text;

pub use clip::ClipEmbedder;
pub use text::TextEmbedder;

use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::error::Result;
use crate::store::{ContentType, ModelKind};

/// Input to an embedder
#[derive(Debug, Clone)]
pub enum EmbedInput {
    Text(String),
    ImagePath(PathBuf),
    ImageBytes(Vec<u8>),
}

impl EmbedInput {
    pub fn content_type(&self) -> ContentType {
        match self {
            EmbedInput::Text(_) => ContentType::Text,
            EmbedInput::ImagePath(_) | EmbedInput::ImageBytes(_) => ContentType::Image,
        }
    }
}

/// A durable embedding id paired with its vector, ready for the index
#[derive(Debug, Clone)]
pub struct EmbeddedVector {
    pub embedding_id: String,
    pub vector: Vec<f32>,
}

/// The embedding capability
///
/// `embed_batch` is sparse: a failed item yields `None` while the rest of
/// the batch succeeds, and the caller counts the failures. A `Result::Err`
/// from any method signals a model-level failure (load, inference setup)
/// that is fatal for the current operation.
pub trait Embedder: Send {
    fn model_name(&self) -> &str;
    fn model_kind(&self) -> ModelKind;
    fn dimensions(&self) -> usize;
    fn supported_content_types(&self) -> &[ContentType];
    fn load_model(&mut self) -> Result<()>;
    fn is_loaded(&self) -> bool;
    fn embed(&mut self, input: &EmbedInput) -> Result<Vec<f32>>;
    fn embed_batch(&mut self, inputs: &[EmbedInput]) -> Result<Vec<Option<Vec<f32>>>>;
    fn cleanup(&mut self);
}

/// Durable embedding id for a chunk: a content hash over the document
/// source, the chunk position and the chunk text. Stable across re-ingests
/// of unchanged content.
pub fn make_embedding_id(source: &str, chunk_index: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(chunk_index.to_le_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Closed registry of supported sentence-transformer models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextModel {
    #[default]
    MiniLmL6V2,
    BgeSmall,
    BgeBase,
    MxbaiLarge,
}

impl TextModel {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "all-minilm-l6-v2" | "minilm-l6" | "minilm" => Some(TextModel::MiniLmL6V2),
            "bge-small-en-v1.5" | "bge-small" => Some(TextModel::BgeSmall),
            "bge-base-en-v1.5" | "bge-base" => Some(TextModel::BgeBase),
            "mxbai-embed-large-v1" | "mxbai-large" => Some(TextModel::MxbaiLarge),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextModel::MiniLmL6V2 => "all-minilm-l6-v2",
            TextModel::BgeSmall => "bge-small-en-v1.5",
            TextModel::BgeBase => "bge-base-en-v1.5",
            TextModel::MxbaiLarge => "mxbai-embed-large-v1",
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            TextModel::MiniLmL6V2 | TextModel::BgeSmall => 384,
            TextModel::BgeBase => 768,
            TextModel::MxbaiLarge => 1024,
        }
    }

    pub fn fastembed_model(&self) -> fastembed::EmbeddingModel {
        match self {
            TextModel::MiniLmL6V2 => fastembed::EmbeddingModel::AllMiniLML6V2,
            TextModel::BgeSmall => fastembed::EmbeddingModel::BGESmallENV15,
            TextModel::BgeBase => fastembed::EmbeddingModel::BGEBaseENV15,
            TextModel::MxbaiLarge => fastembed::EmbeddingModel::MxbaiEmbedLargeV1,
        }
    }
}

/// Names under which the multimodal CLIP model is requested
pub fn is_clip_model_name(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "clip" | "clip-vit-b-32" | "clip-vit-base-patch32"
    )
}

/// Canonical name of the multimodal model
pub const CLIP_MODEL_NAME: &str = "clip-vit-b-32";
