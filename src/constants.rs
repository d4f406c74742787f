//! Central constants for raglite configuration
//!
//! All string literals for paths, filenames, and default tuning values are
//! defined here to avoid duplication and ensure consistency across the
//! codebase.

use std::sync::atomic::AtomicBool;

/// Set by the signal handler once a graceful shutdown has been requested
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Name of the data directory created next to the corpus
pub const DATA_DIR_NAME: &str = ".raglite";

/// Filename of the metadata store inside the data directory
pub const STORE_FILE_NAME: &str = "metadata.db";

/// Filename of the persisted vector index snapshot
pub const INDEX_FILE_NAME: &str = "vectors.idx";

/// Suffix appended to the index path for the label map sidecar
pub const LABEL_MAP_SUFFIX: &str = ".labels.json";

/// Name of the content directory for memory-ingested binary content
pub const CONTENT_DIR_NAME: &str = "content";

/// Default chunk size in characters
pub const DEFAULT_CHUNK_SIZE: usize = 250;

/// Default chunk overlap in characters
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Default embedding batch size
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default number of search results
pub const DEFAULT_TOP_K: usize = 10;

/// Default embedding dimensions (MiniLM-L6 sentence transformer)
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Embedding dimensions of the CLIP ViT-B/32 joint space
pub const CLIP_DIMENSIONS: usize = 512;

/// Initial capacity of a fresh vector index
pub const DEFAULT_MAX_ELEMENTS: usize = 10_000;

/// HNSW graph degree
pub const DEFAULT_HNSW_M: usize = 16;

/// HNSW build-time exploration factor
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;

/// HNSW query-time exploration factor
pub const DEFAULT_EF_SEARCH: usize = 100;

/// Index construction seed, recorded in the snapshot for reproducibility
pub const DEFAULT_INDEX_SEED: u64 = 100;

/// How long the host waits for the index worker to acknowledge cleanup
/// before detaching it, in milliseconds
pub const WORKER_CLEANUP_TIMEOUT_MS: u64 = 1000;

/// Delay between closing and reopening the store during a knowledge-base
/// reset, letting the OS release file handles
pub const RESET_REOPEN_DELAY_MS: u64 = 100;

/// Logit spread below which cross-encoder scores are considered collapsed
/// and the lexical fallback takes over
pub const RERANK_LOGIT_COLLAPSE_THRESHOLD: f32 = 0.1;

/// Over-fetch multiplier applied to index searches when a content-type
/// filter is active
pub const FILTER_OVERFETCH_FACTOR: usize = 4;

/// Maximum size of a single piece of memory-ingested content, in bytes
pub const MAX_CONTENT_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// File extensions ingested as plain text
pub const TEXT_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "text", "rst", "html", "htm"];

/// File extensions ingested as images (multimodal mode only)
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];
