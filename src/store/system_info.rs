//! Corpus-wide configuration record
//!
//! A single `system_info` row records which embedding family a corpus was
//! built with. Every open of the search or ingestion pipeline validates
//! against it, and mode detection reads it to bind the right model stack.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::CLIP_DIMENSIONS;
use crate::error::{RagError, Result};

/// Corpus-wide embedder family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Text,
    Multimodal,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Text => "text",
            Mode::Multimodal => "multimodal",
        }
    }
}

impl FromStr for Mode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Mode::Text),
            "multimodal" => Ok(Mode::Multimodal),
            other => Err(RagError::config(format!(
                "unknown mode '{other}': expected 'text' or 'multimodal'"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Embedding model family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "sentence-transformer")]
    SentenceTransformer,
    #[serde(rename = "clip")]
    Clip,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::SentenceTransformer => "sentence-transformer",
            ModelKind::Clip => "clip",
        }
    }
}

impl FromStr for ModelKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sentence-transformer" => Ok(ModelKind::SentenceTransformer),
            "clip" => Ok(ModelKind::Clip),
            other => Err(RagError::config(format!(
                "unknown model type '{other}': expected 'sentence-transformer' or 'clip'"
            ))),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Second-stage scoring strategy over search candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RerankStrategy {
    #[serde(rename = "cross-encoder")]
    CrossEncoder,
    #[serde(rename = "text-derived")]
    TextDerived,
    #[serde(rename = "disabled")]
    Disabled,
}

impl RerankStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RerankStrategy::CrossEncoder => "cross-encoder",
            RerankStrategy::TextDerived => "text-derived",
            RerankStrategy::Disabled => "disabled",
        }
    }

    /// Strategies permitted for a given corpus mode
    pub fn permitted_for(mode: Mode) -> &'static [RerankStrategy] {
        match mode {
            Mode::Text => &[RerankStrategy::CrossEncoder, RerankStrategy::Disabled],
            Mode::Multimodal => &[RerankStrategy::TextDerived, RerankStrategy::Disabled],
        }
    }
}

impl FromStr for RerankStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cross-encoder" => Ok(RerankStrategy::CrossEncoder),
            "text-derived" => Ok(RerankStrategy::TextDerived),
            "disabled" => Ok(RerankStrategy::Disabled),
            other => Err(RagError::config(format!(
                "unknown reranking strategy '{other}': expected 'cross-encoder', \
                 'text-derived' or 'disabled'"
            ))),
        }
    }
}

impl fmt::Display for RerankStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of content a chunk carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Combined,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Combined => "combined",
        }
    }
}

impl FromStr for ContentType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(ContentType::Text),
            "image" => Ok(ContentType::Image),
            "combined" => Ok(ContentType::Combined),
            other => Err(RagError::config(format!(
                "unknown content type '{other}': expected 'text', 'image' or 'combined'"
            ))),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The singleton corpus configuration row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub mode: Mode,
    pub model_name: String,
    pub model_kind: ModelKind,
    pub model_dimensions: usize,
    pub model_version: Option<String>,
    pub supported_content_types: Vec<ContentType>,
    pub reranking_strategy: RerankStrategy,
    pub reranking_model: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SystemInfo {
    /// Check the internal consistency rules between mode, model kind,
    /// dimensions and supported content types. Called on every write.
    pub fn validate(&self) -> Result<()> {
        if self.model_dimensions == 0 {
            return Err(RagError::config(
                "model dimensions must be a positive integer",
            ));
        }
        match self.model_kind {
            ModelKind::Clip => {
                if self.model_dimensions != CLIP_DIMENSIONS {
                    return Err(RagError::config(format!(
                        "clip models embed into {CLIP_DIMENSIONS} dimensions, not {}",
                        self.model_dimensions
                    )));
                }
                if !self.supported_content_types.contains(&ContentType::Image) {
                    return Err(RagError::config(
                        "clip models must list image among supported content types",
                    ));
                }
                if self.mode != Mode::Multimodal {
                    return Err(RagError::config(
                        "clip models require multimodal mode",
                    ));
                }
            }
            ModelKind::SentenceTransformer => {
                if self.supported_content_types != [ContentType::Text] {
                    return Err(RagError::config(
                        "sentence-transformer models support text content only",
                    ));
                }
                if self.mode != Mode::Text {
                    return Err(RagError::config(
                        "sentence-transformer models require text mode",
                    ));
                }
            }
        }
        if !RerankStrategy::permitted_for(self.mode).contains(&self.reranking_strategy) {
            return Err(RagError::config(format!(
                "reranking strategy '{}' is not available in {} mode",
                self.reranking_strategy, self.mode
            )));
        }
        Ok(())
    }
}

/// Partial update for the system info row. `None` fields keep their
/// persisted values.
#[derive(Debug, Clone, Default)]
pub struct SystemInfoUpdate {
    pub mode: Option<Mode>,
    pub model_name: Option<String>,
    pub model_kind: Option<ModelKind>,
    pub model_dimensions: Option<usize>,
    pub model_version: Option<String>,
    pub supported_content_types: Option<Vec<ContentType>>,
    pub reranking_strategy: Option<RerankStrategy>,
    pub reranking_model: Option<String>,
}
