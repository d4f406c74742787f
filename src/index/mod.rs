//! Index manager
//!
//! Bridges durable embedding ids to the integer labels the vector index
//! uses internally, and enforces model consistency between the persisted
//! corpus and the caller's embedder. The id ↔ label bijection is persisted
//! as a JSON sidecar next to the index snapshot.
//!
//! The manager also owns the sync journal reconciliation: chunks whose
//! embedding ids were journaled but never made it into a saved index are
//! orphans from an interrupted ingestion, and are deleted on open rather
//! than silently left behind.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::FILTER_OVERFETCH_FACTOR;
use crate::embed::{EmbedInput, EmbeddedVector, Embedder};
use crate::error::{RagError, Result};
use crate::store::{ContentType, MetadataStore};
use crate::vector::{HnswConfig, VectorIndexHandle};

/// Options for [`IndexManager::initialize`]
#[derive(Debug, Clone, Copy, Default)]
pub struct InitializeOptions {
    /// Skip the model/dimension check against the stored system info
    pub skip_model_check: bool,
    /// Discard any existing index content
    pub force_recreate: bool,
}

/// Search output: embedding ids with their cosine distances, ascending
#[derive(Debug, Clone, Default)]
pub struct IndexMatches {
    pub embedding_ids: Vec<String>,
    pub distances: Vec<f32>,
}

/// Index statistics for status displays
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub vector_count: usize,
    pub dimensions: usize,
    pub model_name: String,
}

#[derive(Serialize, Deserialize, Default)]
struct LabelMap {
    next_label: usize,
    entries: Vec<(String, usize)>,
}

fn label_map_path(index_path: &Path) -> PathBuf {
    let mut raw = index_path.as_os_str().to_os_string();
    raw.push(crate::constants::LABEL_MAP_SUFFIX);
    PathBuf::from(raw)
}

/// Manages the vector index worker and the embedding id ↔ label mapping
pub struct IndexManager {
    store: Arc<MetadataStore>,
    index_path: PathBuf,
    model_name: String,
    dimensions: usize,
    handle: Option<VectorIndexHandle>,
    labels: HashMap<String, usize>,
    ids: HashMap<usize, String>,
    next_label: usize,
    capacity: usize,
    initialized: bool,
}

impl IndexManager {
    pub fn new(
        store: Arc<MetadataStore>,
        index_path: PathBuf,
        model_name: &str,
        dimensions: usize,
    ) -> Self {
        Self {
            store,
            index_path,
            model_name: model_name.to_string(),
            dimensions,
            handle: None,
            labels: HashMap::new(),
            ids: HashMap::new(),
            next_label: 0,
            capacity: 0,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Open or create the index. Unless `skip_model_check`, the stored
    /// model identity must agree with the manager's; a disagreement is
    /// surfaced with the recovery path spelled out.
    pub async fn initialize(&mut self, options: InitializeOptions) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        if !options.skip_model_check {
            if let Some((stored_model, stored_dimensions)) = self.store.get_stored_model_info()? {
                if stored_model != self.model_name || stored_dimensions != self.dimensions {
                    return Err(RagError::ModelMismatch {
                        current_model: self.model_name.clone(),
                        stored_model,
                        current_dimensions: self.dimensions,
                        stored_dimensions,
                    });
                }
            }
        }

        let config = HnswConfig::new(self.dimensions);
        self.capacity = config.max_elements;
        let handle = VectorIndexHandle::spawn(config)?;

        if options.force_recreate {
            debug!("recreating index at {}", self.index_path.display());
            self.discard_index_files();
        } else if self.index_path.exists() {
            match handle.load(&self.index_path).await {
                Ok(count) => {
                    self.capacity = self.capacity.max(count);
                    self.load_label_map()?;
                    if self.labels.len() != count {
                        warn!(
                            "index holds {count} vectors but the label map lists {}; run a \
                             rebuild if search results look incomplete",
                            self.labels.len()
                        );
                    }
                    debug!("index loaded with {count} vectors");
                }
                Err(RagError::DimensionMismatch { expected, got }) => {
                    // A snapshot at the wrong dimension over an empty
                    // corpus is a leftover from a reset or model switch;
                    // the store is authoritative, so start fresh. With
                    // chunks present the mismatch is real and surfaces.
                    if self.store.count_chunks()? == 0 {
                        warn!(
                            "discarding an index snapshot with {got}-dimensional vectors; \
                             the corpus is empty and expects {expected} dimensions"
                        );
                        self.discard_index_files();
                    } else {
                        return Err(RagError::DimensionMismatch { expected, got });
                    }
                }
                Err(e) => return Err(e),
            }
        }

        self.handle = Some(handle);
        self.initialized = true;
        self.reconcile_journal().await?;
        Ok(())
    }

    /// Remove the persisted snapshot and sidecar and forget the mapping.
    fn discard_index_files(&mut self) {
        for path in [self.index_path.clone(), label_map_path(&self.index_path)] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("could not remove {}: {e}", path.display());
                }
            }
        }
        self.labels.clear();
        self.ids.clear();
        self.next_label = 0;
    }

    fn load_label_map(&mut self) -> Result<()> {
        let path = label_map_path(&self.index_path);
        if !path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| RagError::io(&path, e.to_string()))?;
        let map: LabelMap = serde_json::from_str(&raw).map_err(|e| {
            RagError::index(format!(
                "the label map at {} is not readable ({e}); rebuild to recreate it",
                path.display()
            ))
        })?;
        self.next_label = map.next_label;
        self.labels = map.entries.iter().cloned().collect();
        self.ids = map
            .entries
            .into_iter()
            .map(|(id, label)| (label, id))
            .collect();
        Ok(())
    }

    fn write_label_map(&self) -> Result<()> {
        let mut entries: Vec<(String, usize)> = self
            .labels
            .iter()
            .map(|(id, label)| (id.clone(), *label))
            .collect();
        entries.sort_by_key(|(_, label)| *label);
        let map = LabelMap {
            next_label: self.next_label,
            entries,
        };
        let path = label_map_path(&self.index_path);
        let json = serde_json::to_string(&map)
            .map_err(|e| RagError::index(format!("could not encode the label map: {e}")))?;
        std::fs::write(&path, json).map_err(|e| RagError::io(&path, e.to_string()))?;
        Ok(())
    }

    /// Delete chunks journaled by an interrupted ingestion whose vectors
    /// never reached a saved index.
    async fn reconcile_journal(&mut self) -> Result<()> {
        let journaled = self.store.journal_ids()?;
        if journaled.is_empty() {
            return Ok(());
        }
        let mut orphans = 0;
        for embedding_id in &journaled {
            if !self.labels.contains_key(embedding_id)
                && self.store.delete_chunk(embedding_id)?
            {
                orphans += 1;
            }
        }
        self.store.journal_clear()?;
        if orphans > 0 {
            warn!(
                "removed {orphans} chunks left behind by an interrupted ingestion; \
                 re-ingest the affected documents to restore them"
            );
        }
        Ok(())
    }

    fn handle(&self) -> Result<&VectorIndexHandle> {
        self.handle.as_ref().ok_or_else(|| {
            RagError::index("the index is not open; initialize it before use")
        })
    }

    /// Assign labels and forward the batch to the worker. Embedding ids
    /// already present are skipped, making repeated additions idempotent.
    pub async fn add_vectors(&mut self, vectors: Vec<EmbeddedVector>) -> Result<usize> {
        let fresh: Vec<EmbeddedVector> = vectors
            .into_iter()
            .filter(|v| !self.labels.contains_key(&v.embedding_id))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let needed = self.labels.len() + fresh.len();
        if needed > self.capacity {
            let new_capacity = (self.capacity * 2).max(needed + 1024);
            self.handle()?.resize(new_capacity).await?;
            self.capacity = new_capacity;
        }

        let mut batch = Vec::with_capacity(fresh.len());
        let mut assigned = Vec::with_capacity(fresh.len());
        for item in &fresh {
            let label = self.next_label;
            self.next_label += 1;
            batch.push((label, item.vector.clone()));
            assigned.push((item.embedding_id.clone(), label));
        }

        let added = self.handle()?.add_vectors(batch).await?;
        for (embedding_id, label) in assigned {
            self.labels.insert(embedding_id.clone(), label);
            self.ids.insert(label, embedding_id);
        }
        Ok(added)
    }

    /// Nearest neighbours as embedding ids, optionally filtered by the
    /// chunk content type. With a filter active the worker is over-fetched
    /// so up to `k` results survive filtering.
    pub async fn search(
        &self,
        vector: Vec<f32>,
        k: usize,
        content_type: Option<ContentType>,
    ) -> Result<IndexMatches> {
        if self.labels.is_empty() || k == 0 {
            return Ok(IndexMatches::default());
        }
        let fetch = match content_type {
            Some(_) => k.saturating_mul(FILTER_OVERFETCH_FACTOR),
            None => k,
        };
        let (labels, distances) = self.handle()?.search(vector, fetch).await?;

        let mut embedding_ids = Vec::with_capacity(labels.len());
        let mut kept_distances = Vec::with_capacity(labels.len());
        for (label, distance) in labels.iter().zip(distances) {
            match self.ids.get(label) {
                Some(id) => {
                    embedding_ids.push(id.clone());
                    kept_distances.push(distance);
                }
                None => warn!("index returned unknown label {label}; skipping it"),
            }
        }

        if let Some(wanted) = content_type {
            let rows = self.store.get_chunks_by_embedding_ids(&embedding_ids)?;
            let types: HashMap<String, ContentType> = rows
                .into_iter()
                .map(|row| (row.embedding_id, row.content_type))
                .collect();
            let mut filtered_ids = Vec::with_capacity(k);
            let mut filtered_distances = Vec::with_capacity(k);
            for (id, distance) in embedding_ids.into_iter().zip(kept_distances) {
                if types.get(&id) == Some(&wanted) {
                    filtered_ids.push(id);
                    filtered_distances.push(distance);
                }
            }
            embedding_ids = filtered_ids;
            kept_distances = filtered_distances;
        }

        embedding_ids.truncate(k);
        kept_distances.truncate(k);
        Ok(IndexMatches {
            embedding_ids,
            distances: kept_distances,
        })
    }

    /// Clear the mapping and the worker, then persist the empty state so
    /// the on-disk files reflect it.
    pub async fn reset(&mut self) -> Result<()> {
        self.labels.clear();
        self.ids.clear();
        self.next_label = 0;
        self.handle()?.reset().await?;
        self.save_index().await?;
        Ok(())
    }

    /// Persist the index and its label map; clears the sync journal since
    /// every stored chunk's vector is now durable.
    pub async fn save_index(&self) -> Result<usize> {
        let count = self.handle()?.save(&self.index_path).await?;
        self.write_label_map()?;
        self.store.journal_clear()?;
        Ok(count)
    }

    /// Re-embed every chunk in the store and rewrite the index from
    /// scratch, then record the new model identity in the system info.
    pub async fn rebuild_with_embeddings(&mut self, embedder: &mut dyn Embedder) -> Result<usize> {
        self.model_name = embedder.model_name().to_string();
        self.dimensions = embedder.dimensions();

        let chunks = self.store.all_chunks()?;
        info!("rebuilding index from {} chunks", chunks.len());

        let mut skipped = 0;
        let mut embedded = Vec::with_capacity(chunks.len());
        for window in chunks.chunks(64) {
            let inputs: Vec<EmbedInput> = window
                .iter()
                .map(|chunk| match chunk.content_type {
                    ContentType::Image => EmbedInput::ImagePath(PathBuf::from(&chunk.content)),
                    _ => EmbedInput::Text(chunk.content.clone()),
                })
                .collect();
            let vectors = embedder.embed_batch(&inputs)?;
            for (chunk, vector) in window.iter().zip(vectors) {
                match vector {
                    Some(vector) => embedded.push(EmbeddedVector {
                        embedding_id: chunk.embedding_id.clone(),
                        vector,
                    }),
                    None => {
                        skipped += 1;
                        warn!(
                            "could not re-embed chunk {} of {}; re-ingest that document",
                            chunk.chunk_index, chunk.source
                        );
                    }
                }
            }
        }

        let added = self.add_vectors(embedded).await?;
        self.save_index().await?;
        self.store.set_stored_model_info(
            embedder.model_name(),
            embedder.dimensions(),
            embedder.model_kind(),
        )?;
        if skipped > 0 {
            warn!("rebuild finished with {skipped} chunks skipped");
        }
        info!("rebuild complete: {added} vectors indexed");
        Ok(added)
    }

    pub fn has_vectors(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn get_stats(&self) -> IndexStats {
        IndexStats {
            vector_count: self.labels.len(),
            dimensions: self.dimensions,
            model_name: self.model_name.clone(),
        }
    }

    /// Shut the worker down. The manager must be re-initialized before the
    /// next use; the mapping reloads from the sidecar at that point.
    pub async fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.cleanup().await;
        }
        self.labels.clear();
        self.ids.clear();
        self.next_label = 0;
        self.initialized = false;
    }
}
