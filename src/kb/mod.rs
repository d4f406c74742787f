//! Knowledge-base manager
//!
//! Coordinated reset of the metadata store and the vector index without
//! deleting files, so open file handles on the host never go stale. The
//! store is emptied in one transaction; the index is cleared in place and
//! the empty state is saved, or force-recreated when the persisted
//! snapshot no longer matches (a model switch).

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::constants::{DEFAULT_DIMENSIONS, RESET_REOPEN_DELAY_MS};
use crate::error::{RagError, Result};
use crate::index::{IndexManager, InitializeOptions};
use crate::store::{MetadataStore, ResetStoreOptions};

/// Options for a knowledge-base reset
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetOptions {
    /// Keep the system info row (mode and model identity)
    pub preserve_system_info: bool,
    /// Reclaim store file space after deleting rows
    pub run_vacuum: bool,
}

/// Outcome of a knowledge-base reset
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ResetOutcome {
    pub success: bool,
    pub documents_deleted: usize,
    pub chunks_deleted: usize,
    pub content_deleted: usize,
    pub vectors_cleared: usize,
    pub total_time_ms: u128,
    pub warnings: Vec<String>,
}

/// Coordinates store and index resets for one data directory
pub struct KnowledgeBaseManager {
    config: EngineConfig,
}

impl KnowledgeBaseManager {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Reset store and index. Idempotent: resetting an empty knowledge
    /// base succeeds with zero counts.
    pub async fn reset(&self, options: ResetOptions) -> Result<ResetOutcome> {
        let started = Instant::now();
        let mut outcome = ResetOutcome::default();

        // Callers are expected to have closed their own connections; the
        // brief delay lets the OS release those handles first.
        tokio::time::sleep(Duration::from_millis(RESET_REOPEN_DELAY_MS)).await;

        // Phase 1: empty the store over a fresh connection.
        let store_path = self.config.store_path();
        let dimensions = {
            let store = MetadataStore::open(&store_path)?;
            let dimensions = store
                .get_stored_model_info()?
                .map(|(_, dims)| dims)
                .unwrap_or(DEFAULT_DIMENSIONS);
            let counts = store.reset_store(ResetStoreOptions {
                preserve_system_info: options.preserve_system_info,
                run_vacuum: options.run_vacuum,
            })?;
            outcome.documents_deleted = counts.documents;
            outcome.chunks_deleted = counts.chunks;
            outcome.content_deleted = counts.content;
            dimensions
        };

        // Phase 2: clear the index in place, or force-recreate it when the
        // persisted snapshot no longer fits (model switch).
        let store = Arc::new(MetadataStore::open(&store_path)?);
        let mut index = IndexManager::new(
            store,
            self.config.index_path(),
            "knowledge-base-reset",
            dimensions,
        );
        let opened = index
            .initialize(InitializeOptions {
                skip_model_check: true,
                ..Default::default()
            })
            .await;
        match opened {
            Ok(()) => {}
            Err(RagError::DimensionMismatch { expected, got }) => {
                let warning = format!(
                    "the index held {got}-dimensional vectors but {expected} were expected; \
                     it was recreated empty"
                );
                warn!("{warning}");
                outcome.warnings.push(warning);
                index.close().await;
                index
                    .initialize(InitializeOptions {
                        skip_model_check: true,
                        force_recreate: true,
                    })
                    .await?;
            }
            Err(e) => {
                let warning = format!("the index could not be opened ({e}); it was recreated empty");
                warn!("{warning}");
                outcome.warnings.push(warning);
                index.close().await;
                index
                    .initialize(InitializeOptions {
                        skip_model_check: true,
                        force_recreate: true,
                    })
                    .await?;
            }
        }

        outcome.vectors_cleared = index.get_stats().vector_count;
        index.reset().await?;
        index.close().await;

        outcome.success = true;
        outcome.total_time_ms = started.elapsed().as_millis();
        info!(
            "knowledge base reset: {} documents, {} chunks, {} vectors cleared in {}ms",
            outcome.documents_deleted,
            outcome.chunks_deleted,
            outcome.vectors_cleared,
            outcome.total_time_ms
        );
        Ok(outcome)
    }
}
