//! Centralized error types for raglite
//!
//! This module provides a unified error handling approach using thiserror.
//! Each variant corresponds to one failure kind the engine can surface, and
//! each maps to a stable process exit code for CLI callers.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for raglite operations
#[derive(Error, Debug)]
pub enum RagError {
    /// Invalid option or strategy values
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Malformed caller input (bad query, bad top_k, unknown flags)
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Metadata store open/initialize/write failures
    #[error("Store error: {message}")]
    Store {
        message: String,
        source: Option<anyhow::Error>,
    },

    /// A path the caller named does not exist
    #[error("Not found: {}; check the path and re-run", .path.display())]
    NotFound { path: PathBuf },

    /// Embedding or reranking model failures (load, inference)
    #[error("Model error: {message}")]
    Model { message: String },

    /// The requested model disagrees with the persisted corpus
    #[error(
        "Model mismatch: the corpus was built with '{stored_model}' ({stored_dimensions} \
         dimensions) but '{current_model}' ({current_dimensions} dimensions) was requested. \
         Run `raglite rebuild` to re-embed the corpus, or pass --force-rebuild to reset and \
         re-ingest."
    )]
    ModelMismatch {
        current_model: String,
        stored_model: String,
        current_dimensions: usize,
        stored_dimensions: usize,
    },

    /// Vector index failures (worker lifecycle, save/load I/O)
    #[error("Index error: {message}")]
    Index { message: String },

    /// A vector's length disagrees with the index dimensionality
    #[error(
        "Dimension mismatch: the index holds {expected}-dimensional vectors but a \
         {got}-dimensional vector was supplied. Run `raglite rebuild` if the embedding \
         model changed."
    )]
    DimensionMismatch { expected: usize, got: usize },

    /// Content storage and retrieval failures
    #[error("Content error: {message}{}", .hint.as_deref().map(|h| format!("; {h}")).unwrap_or_default())]
    Content {
        message: String,
        hint: Option<String>,
    },

    /// Search pipeline failures
    #[error("Search error: {message}")]
    Search { message: String },

    /// Filesystem permission failures
    #[error("Permission denied: {} - {message}", .path.display())]
    Permission { path: PathBuf, message: String },

    /// Other I/O failures
    #[error("I/O error: {} - {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

impl RagError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::Index {
            message: message.into(),
        }
    }

    pub fn content(message: impl Into<String>) -> Self {
        Self::Content {
            message: message.into(),
            hint: None,
        }
    }

    pub fn content_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Content {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn search(message: impl Into<String>) -> Self {
        Self::Search {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Stable process exit code for CLI callers
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument { .. } => 2,
            Self::Config { .. } => 3,
            Self::NotFound { .. } => 4,
            Self::Store { .. } => 5,
            Self::Model { .. } | Self::ModelMismatch { .. } => 6,
            Self::Index { .. } | Self::DimensionMismatch { .. } => 7,
            Self::Permission { .. } => 8,
            Self::Content { .. } | Self::Search { .. } | Self::Io { .. } => 1,
        }
    }
}

/// Result type alias for raglite operations
pub type Result<T> = std::result::Result<T, RagError>;

impl From<rusqlite::Error> for RagError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store {
            message: err.to_string(),
            source: Some(err.into()),
        }
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::Permission {
                path: PathBuf::new(),
                message: err.to_string(),
            },
            std::io::ErrorKind::NotFound => Self::NotFound {
                path: PathBuf::new(),
            },
            _ => Self::Io {
                path: PathBuf::new(),
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = RagError::store("connection failed");
        assert!(err.to_string().contains("Store error"));

        let err = RagError::config("unknown reranking strategy");
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_model_mismatch_mentions_rebuild() {
        let err = RagError::ModelMismatch {
            current_model: "bge-base-en-v1.5".to_string(),
            stored_model: "all-minilm-l6-v2".to_string(),
            current_dimensions: 768,
            stored_dimensions: 384,
        };
        let message = err.to_string();
        assert!(message.contains("rebuild"));
        assert!(message.contains("--force-rebuild"));
        assert!(message.contains("384"));
        assert!(message.contains("768"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RagError::invalid_argument("x").exit_code(), 2);
        assert_eq!(RagError::config("x").exit_code(), 3);
        assert_eq!(
            RagError::NotFound {
                path: PathBuf::from("/missing")
            }
            .exit_code(),
            4
        );
        assert_eq!(RagError::store("x").exit_code(), 5);
        assert_eq!(RagError::model("x").exit_code(), 6);
        assert_eq!(RagError::index("x").exit_code(), 7);
        assert_eq!(
            RagError::DimensionMismatch {
                expected: 384,
                got: 512
            }
            .exit_code(),
            7
        );
        assert_eq!(RagError::content("x").exit_code(), 1);
    }

    #[test]
    fn test_content_hint_rendering() {
        let err = RagError::content_with_hint(
            "audio content is not supported",
            "convert the file to a text transcript first",
        );
        let message = err.to_string();
        assert!(message.contains("audio content is not supported"));
        assert!(message.contains("convert the file"));
    }
}
