//! Worker-isolated HNSW vector index
//!
//! The index lives on its own OS thread (see [`worker`]); the handle here
//! is the only way to reach it. Requests are FIFO per worker; responses
//! come back over per-request oneshot channels. Terminating the worker
//! reclaims all of the graph's memory at once, and fails any request still
//! in flight with a typed error instead of hanging it.

mod worker;

use std::path::Path;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;

use crate::constants::{
    DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH, DEFAULT_HNSW_M, DEFAULT_INDEX_SEED,
    DEFAULT_MAX_ELEMENTS, WORKER_CLEANUP_TIMEOUT_MS,
};
use crate::error::{RagError, Result};
use worker::{Reply, Request};

/// HNSW construction and query parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswConfig {
    pub dimensions: usize,
    pub max_elements: usize,
    /// Graph degree
    pub m: usize,
    pub ef_construction: usize,
    /// Query-time exploration factor, tunable via `set_ef`
    pub ef_search: usize,
    pub seed: u64,
}

impl HnswConfig {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            max_elements: DEFAULT_MAX_ELEMENTS,
            m: DEFAULT_HNSW_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
            seed: DEFAULT_INDEX_SEED,
        }
    }
}

/// Host-side handle to the index worker
pub struct VectorIndexHandle {
    tx: Sender<Request>,
    join: Option<JoinHandle<()>>,
    config: HnswConfig,
}

impl VectorIndexHandle {
    /// Spawn the worker thread and return its handle.
    pub fn spawn(config: HnswConfig) -> Result<Self> {
        let (tx, rx) = std::sync::mpsc::channel();
        let worker_config = config;
        let join = std::thread::Builder::new()
            .name("raglite-index".to_string())
            .spawn(move || worker::run(worker_config, rx))
            .map_err(|e| RagError::index(format!("could not start the index worker: {e}")))?;
        Ok(Self {
            tx,
            join: Some(join),
            config,
        })
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    fn worker_down() -> RagError {
        RagError::index(
            "the vector index worker is not running; reopen the engine and retry the operation",
        )
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| Self::worker_down())?;
        reply_rx.await.map_err(|_| Self::worker_down())?
    }

    /// Add one vector; searchable once this returns.
    pub async fn add_vector(&self, label: usize, vector: Vec<f32>) -> Result<()> {
        self.request(|reply| Request::AddVector {
            label,
            vector,
            reply,
        })
        .await
    }

    /// Add a batch of vectors atomically; all searchable once this returns.
    pub async fn add_vectors(&self, items: Vec<(usize, Vec<f32>)>) -> Result<usize> {
        self.request(|reply| Request::AddVectors { items, reply }).await
    }

    /// Up to `k` (label, distance) pairs by ascending cosine distance.
    pub async fn search(&self, vector: Vec<f32>, k: usize) -> Result<(Vec<usize>, Vec<f32>)> {
        self.request(|reply| Request::Search { vector, k, reply }).await
    }

    pub async fn set_ef(&self, ef: usize) -> Result<()> {
        self.request(|reply| Request::SetEf { ef, reply }).await
    }

    pub async fn resize(&self, new_max: usize) -> Result<()> {
        self.request(|reply| Request::Resize { new_max, reply }).await
    }

    /// Durably write the index; returns the element count.
    pub async fn save(&self, path: &Path) -> Result<usize> {
        let path = path.to_path_buf();
        self.request(|reply| Request::Save { path, reply }).await
    }

    pub async fn load(&self, path: &Path) -> Result<usize> {
        let path = path.to_path_buf();
        self.request(|reply| Request::Load { path, reply }).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.request(|reply| Request::Count { reply }).await
    }

    /// Empty the index in memory; configuration is preserved and no file
    /// I/O happens.
    pub async fn reset(&self) -> Result<()> {
        self.request(|reply| Request::Reset { reply }).await
    }

    /// Ask the worker to shut down, waiting a bounded time for the
    /// acknowledgement. A worker that does not answer is detached; its
    /// thread dies with the process. No requests may follow cleanup.
    pub async fn cleanup(&mut self) {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<()>>();
        let mut acknowledged = false;
        if self.tx.send(Request::Cleanup { reply: reply_tx }).is_ok() {
            match tokio::time::timeout(
                Duration::from_millis(WORKER_CLEANUP_TIMEOUT_MS),
                reply_rx,
            )
            .await
            {
                Ok(_) => acknowledged = true,
                Err(_) => {
                    warn!(
                        "index worker did not acknowledge cleanup within {}ms; detaching it",
                        WORKER_CLEANUP_TIMEOUT_MS
                    );
                }
            }
        } else {
            // Channel already closed: the worker is gone.
            acknowledged = true;
        }

        if let Some(join) = self.join.take() {
            if acknowledged {
                let _ = join.join();
            }
            // Otherwise the handle is dropped and the thread is detached.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_then_search() {
        let handle = VectorIndexHandle::spawn(HnswConfig::new(3)).unwrap();
        handle
            .add_vectors(vec![
                (0, vec![1.0, 0.0, 0.0]),
                (1, vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let (labels, distances) = handle.search(vec![1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(labels[0], 0);
        assert_eq!(distances.len(), 2);
        assert!(distances[0] <= distances[1]);
        assert_eq!(handle.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty() {
        let handle = VectorIndexHandle::spawn(HnswConfig::new(3)).unwrap();
        let (labels, distances) = handle.search(vec![0.0, 0.0, 1.0], 10).await.unwrap();
        assert!(labels.is_empty());
        assert!(distances.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_typed() {
        let handle = VectorIndexHandle::spawn(HnswConfig::new(3)).unwrap();
        let err = handle.add_vector(0, vec![1.0]).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 3, got: 1 }));

        let err = handle.search(vec![1.0, 2.0], 1).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 3, got: 2 }));
    }

    #[tokio::test]
    async fn test_save_load_round_trip_through_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");

        let handle = VectorIndexHandle::spawn(HnswConfig::new(4)).unwrap();
        handle
            .add_vectors(vec![
                (0, vec![1.0, 0.0, 0.0, 0.0]),
                (1, vec![0.0, 1.0, 0.0, 0.0]),
                (2, vec![0.0, 0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();
        assert_eq!(handle.save(&path).await.unwrap(), 3);
        let before = handle.search(vec![0.9, 0.1, 0.0, 0.0], 3).await.unwrap();

        let restored = VectorIndexHandle::spawn(HnswConfig::new(4)).unwrap();
        assert_eq!(restored.load(&path).await.unwrap(), 3);
        assert_eq!(restored.count().await.unwrap(), 3);
        let after = restored.search(vec![0.9, 0.1, 0.0, 0.0], 3).await.unwrap();
        assert_eq!(before.0, after.0);
    }

    #[tokio::test]
    async fn test_reset_keeps_worker_usable() {
        let handle = VectorIndexHandle::spawn(HnswConfig::new(2)).unwrap();
        handle.add_vector(0, vec![1.0, 0.0]).await.unwrap();
        handle.reset().await.unwrap();
        assert_eq!(handle.count().await.unwrap(), 0);

        handle.add_vector(0, vec![0.0, 1.0]).await.unwrap();
        assert_eq!(handle.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_requests_after_cleanup_fail_typed() {
        let mut handle = VectorIndexHandle::spawn(HnswConfig::new(2)).unwrap();
        handle.cleanup().await;
        let err = handle.count().await.unwrap_err();
        assert!(matches!(err, RagError::Index { .. }));
    }

    #[tokio::test]
    async fn test_set_ef_accepted() {
        let handle = VectorIndexHandle::spawn(HnswConfig::new(2)).unwrap();
        handle.set_ef(400).await.unwrap();
        handle.add_vector(0, vec![1.0, 0.0]).await.unwrap();
        let (labels, _) = handle.search(vec![1.0, 0.0], 1).await.unwrap();
        assert_eq!(labels, vec![0]);
    }
}
