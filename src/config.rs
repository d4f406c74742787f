//! Engine configuration
//!
//! Options are assembled from built-in defaults, then `RAGLITE_*`
//! environment variables, then explicit caller overrides (CLI flags or
//! embedding API arguments). Invalid environment values fail loudly at
//! startup instead of silently falling back.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::constants::{
    CONTENT_DIR_NAME, DATA_DIR_NAME, DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_OVERLAP,
    DEFAULT_CHUNK_SIZE, DEFAULT_TOP_K, INDEX_FILE_NAME, STORE_FILE_NAME,
};
use crate::error::{RagError, Result};
use crate::store::RerankStrategy;

/// How document sources are recorded in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PathStorage {
    Absolute,
    #[default]
    Relative,
}

impl FromStr for PathStorage {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "absolute" => Ok(PathStorage::Absolute),
            "relative" => Ok(PathStorage::Relative),
            other => Err(RagError::config(format!(
                "unknown path storage strategy '{other}': expected 'absolute' or 'relative'"
            ))),
        }
    }
}

/// Options accepted by the factories and the ingestion pipeline
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the store, the index and ingested content
    pub data_dir: PathBuf,
    /// Requested embedding model; `None` defers to the detected mode
    pub embedding_model: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub top_k: usize,
    /// Requested reranking strategy; `None` defers to the detected mode
    pub reranking_strategy: Option<RerankStrategy>,
    /// Reset store and index before ingesting
    pub force_rebuild: bool,
    pub path_storage: PathStorage,
    /// Base directory for relative source paths; defaults to the current
    /// working directory
    pub base_dir: Option<PathBuf>,
    /// Directory for downloaded model artifacts
    pub model_cache_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DATA_DIR_NAME),
            embedding_model: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            batch_size: DEFAULT_BATCH_SIZE,
            top_k: DEFAULT_TOP_K,
            reranking_strategy: None,
            force_rebuild: false,
            path_storage: PathStorage::default(),
            base_dir: None,
            model_cache_path: None,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from defaults overlaid with `RAGLITE_*`
    /// environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_string("RAGLITE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(model) = env_string("RAGLITE_EMBEDDING_MODEL") {
            config.embedding_model = Some(model);
        }
        if let Some(value) = env_parse::<usize>("RAGLITE_CHUNK_SIZE", "a positive integer")? {
            config.chunk_size = value;
        }
        if let Some(value) = env_parse::<usize>("RAGLITE_CHUNK_OVERLAP", "a non-negative integer")?
        {
            config.chunk_overlap = value;
        }
        if let Some(value) = env_parse::<usize>("RAGLITE_BATCH_SIZE", "a positive integer")? {
            config.batch_size = value;
        }
        if let Some(value) = env_parse::<usize>("RAGLITE_TOP_K", "a positive integer")? {
            config.top_k = value;
        }
        if let Some(raw) = env_string("RAGLITE_RERANKING_STRATEGY") {
            config.reranking_strategy = Some(RerankStrategy::from_str(&raw)?);
        }
        if let Some(raw) = env_string("RAGLITE_FORCE_REBUILD") {
            config.force_rebuild = parse_bool("RAGLITE_FORCE_REBUILD", &raw)?;
        }
        if let Some(raw) = env_string("RAGLITE_PATH_STORAGE") {
            config.path_storage = PathStorage::from_str(&raw)?;
        }
        if let Some(dir) = env_string("RAGLITE_BASE_DIR") {
            config.base_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = env_string("RAGLITE_MODEL_CACHE") {
            config.model_cache_path = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate option invariants. Called after every assembly step.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::config("chunk size must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.batch_size == 0 {
            return Err(RagError::config("batch size must be greater than zero"));
        }
        if self.top_k == 0 {
            return Err(RagError::config("top_k must be at least 1"));
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE_NAME)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE_NAME)
    }

    pub fn content_dir(&self) -> PathBuf {
        self.data_dir.join(CONTENT_DIR_NAME)
    }

    /// Model artifact cache: explicit setting, or the user cache directory,
    /// or a directory inside the data dir as a last resort.
    pub fn resolved_model_cache(&self) -> PathBuf {
        if let Some(path) = &self.model_cache_path {
            return path.clone();
        }
        dirs::cache_dir()
            .map(|d| d.join("raglite").join("models"))
            .unwrap_or_else(|| self.data_dir.join("models"))
    }

    /// Base directory for relative source paths.
    pub fn resolved_base_dir(&self) -> PathBuf {
        self.base_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str, expected: &str) -> Result<Option<T>> {
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            RagError::config(format!(
                "environment variable {name} has invalid value '{raw}': expected {expected}"
            ))
        }),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RagError::config(format!(
            "environment variable {name} has invalid value '{raw}': expected a boolean"
        ))),
    }
}

/// Normalize a path into a stable source identifier, per the configured
/// strategy. Forward slashes are used on every platform so stored sources
/// stay portable.
pub fn source_for_path(path: &Path, strategy: PathStorage, base: &Path) -> String {
    let resolved = match strategy {
        PathStorage::Absolute => path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf()),
        PathStorage::Relative => {
            let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
            canonical
                .strip_prefix(&canonical_base)
                .map(|p| p.to_path_buf())
                .unwrap_or(canonical)
        }
    };
    resolved.to_string_lossy().replace('\\', "/")
}

/// Human-readable title for a file path (the file stem).
pub fn title_for_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    // from_env reads every RAGLITE_* variable, so env-twiddling tests must
    // not interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 250);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.top_k, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let config = EngineConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let config = EngineConfig {
            top_k: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_env_value_fails_loudly() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("RAGLITE_CHUNK_SIZE", "lots");
        let err = EngineConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("RAGLITE_CHUNK_SIZE"));
        std::env::remove_var("RAGLITE_CHUNK_SIZE");
    }

    #[test]
    fn test_env_overrides_apply() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("RAGLITE_BATCH_SIZE", "8");
        std::env::set_var("RAGLITE_RERANKING_STRATEGY", "disabled");
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.reranking_strategy, Some(RerankStrategy::Disabled));
        std::env::remove_var("RAGLITE_BATCH_SIZE");
        std::env::remove_var("RAGLITE_RERANKING_STRATEGY");
    }

    #[test]
    fn test_source_for_path_uses_forward_slashes() {
        let source = source_for_path(
            Path::new("docs/guide.md"),
            PathStorage::Relative,
            Path::new("."),
        );
        assert!(!source.contains('\\'));
    }

    #[test]
    fn test_title_for_path() {
        assert_eq!(title_for_path(Path::new("docs/intro.md")), "intro");
    }
}
