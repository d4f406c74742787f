//! Vector index worker
//!
//! Owns the HNSW graph on a dedicated OS thread. The host talks to it only
//! through the request channel; each request carries a oneshot responder.
//! When the thread exits (cleanup, channel disconnect or panic), every
//! queued responder drops and its caller observes a worker-down error, so
//! no request can hang.
//!
//! Alongside the graph the worker keeps a label → vector shadow map. The
//! graph itself answers searches; the shadow map makes snapshots and
//! capacity rebuilds possible without touching the store.

use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::HnswConfig;
use crate::error::{RagError, Result};

const MAX_LAYER: usize = 16;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Message protocol between the host and the index worker
pub(crate) enum Request {
    AddVector {
        label: usize,
        vector: Vec<f32>,
        reply: Reply<()>,
    },
    AddVectors {
        items: Vec<(usize, Vec<f32>)>,
        reply: Reply<usize>,
    },
    Search {
        vector: Vec<f32>,
        k: usize,
        reply: Reply<(Vec<usize>, Vec<f32>)>,
    },
    SetEf {
        ef: usize,
        reply: Reply<()>,
    },
    Resize {
        new_max: usize,
        reply: Reply<()>,
    },
    Save {
        path: PathBuf,
        reply: Reply<usize>,
    },
    Load {
        path: PathBuf,
        reply: Reply<usize>,
    },
    Count {
        reply: Reply<usize>,
    },
    Reset {
        reply: Reply<()>,
    },
    Cleanup {
        reply: Reply<()>,
    },
}

/// On-disk snapshot of the index
#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimensions: usize,
    max_elements: usize,
    m: usize,
    ef_construction: usize,
    seed: u64,
    entries: Vec<(usize, Vec<f32>)>,
}

struct Worker {
    config: HnswConfig,
    graph: Hnsw<'static, f32, DistCosine>,
    vectors: HashMap<usize, Vec<f32>>,
}

impl Worker {
    fn new(config: HnswConfig) -> Self {
        let graph = fresh_graph(&config);
        Self {
            config,
            graph,
            vectors: HashMap::new(),
        }
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.config.dimensions,
                got: vector.len(),
            });
        }
        Ok(())
    }

    fn add_vector(&mut self, label: usize, vector: Vec<f32>) -> Result<()> {
        self.check_dimensions(&vector)?;
        if self.vectors.contains_key(&label) {
            return Err(RagError::index(format!(
                "vector label {label} already exists; duplicate additions are rejected"
            )));
        }
        if self.vectors.len() >= self.config.max_elements {
            return Err(RagError::index(format!(
                "the index is at its capacity of {} vectors; resize it before adding more",
                self.config.max_elements
            )));
        }
        self.graph.insert((&vector[..], label));
        self.vectors.insert(label, vector);
        Ok(())
    }

    fn add_vectors(&mut self, items: Vec<(usize, Vec<f32>)>) -> Result<usize> {
        // Validate the whole batch first so a mid-batch failure cannot
        // leave a partial state change behind.
        for (label, vector) in &items {
            self.check_dimensions(vector)?;
            if self.vectors.contains_key(label) {
                return Err(RagError::index(format!(
                    "vector label {label} already exists; duplicate additions are rejected"
                )));
            }
        }
        if self.vectors.len() + items.len() > self.config.max_elements {
            return Err(RagError::index(format!(
                "adding {} vectors would exceed the index capacity of {}; resize it first",
                items.len(),
                self.config.max_elements
            )));
        }
        let added = items.len();
        for (label, vector) in items {
            self.graph.insert((&vector[..], label));
            self.vectors.insert(label, vector);
        }
        Ok(added)
    }

    fn search(&self, vector: Vec<f32>, k: usize) -> Result<(Vec<usize>, Vec<f32>)> {
        self.check_dimensions(&vector)?;
        if self.vectors.is_empty() || k == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        let ef = self.config.ef_search.max(k);
        let mut neighbours = self.graph.search(&vector, k.min(self.vectors.len()), ef);
        neighbours.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let labels = neighbours.iter().map(|n| n.d_id).collect();
        let distances = neighbours.iter().map(|n| n.distance).collect();
        Ok((labels, distances))
    }

    fn resize(&mut self, new_max: usize) -> Result<()> {
        if new_max < self.vectors.len() {
            return Err(RagError::index(format!(
                "cannot shrink the index below its {} stored vectors",
                self.vectors.len()
            )));
        }
        self.config.max_elements = new_max;
        self.rebuild_graph();
        debug!("index resized to {new_max} elements");
        Ok(())
    }

    fn rebuild_graph(&mut self) {
        self.graph = fresh_graph(&self.config);
        for (label, vector) in &self.vectors {
            self.graph.insert((&vector[..], *label));
        }
    }

    fn save(&self, path: &Path) -> Result<usize> {
        let mut entries: Vec<(usize, Vec<f32>)> = self
            .vectors
            .iter()
            .map(|(label, vector)| (*label, vector.clone()))
            .collect();
        entries.sort_by_key(|(label, _)| *label);

        let snapshot = Snapshot {
            dimensions: self.config.dimensions,
            max_elements: self.config.max_elements,
            m: self.config.m,
            ef_construction: self.config.ef_construction,
            seed: self.config.seed,
            entries,
        };
        let bytes = bincode::serialize(&snapshot)
            .map_err(|e| RagError::index(format!("could not encode the index snapshot: {e}")))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RagError::io(parent, e.to_string()))?;
            }
        }
        // Write-then-rename keeps the previous snapshot authoritative if
        // the process dies mid-write.
        let tmp = path.with_extension("idx.tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| RagError::io(&tmp, e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| RagError::io(path, e.to_string()))?;

        debug!("index saved: {} vectors -> {}", snapshot.entries.len(), path.display());
        Ok(snapshot.entries.len())
    }

    fn load(&mut self, path: &Path) -> Result<usize> {
        let bytes = std::fs::read(path).map_err(|e| {
            RagError::index(format!(
                "could not read the index file {}: {e}. Re-ingest or rebuild to recreate it",
                path.display()
            ))
        })?;
        let snapshot: Snapshot = bincode::deserialize(&bytes).map_err(|e| {
            RagError::index(format!(
                "the index file {} is not readable ({e}); rebuild to recreate it",
                path.display()
            ))
        })?;
        if snapshot.dimensions != self.config.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.config.dimensions,
                got: snapshot.dimensions,
            });
        }

        self.config.max_elements = snapshot.max_elements.max(self.config.max_elements);
        self.vectors = snapshot.entries.into_iter().collect();
        self.rebuild_graph();
        debug!("index loaded: {} vectors from {}", self.vectors.len(), path.display());
        Ok(self.vectors.len())
    }

    fn reset(&mut self) {
        self.vectors.clear();
        self.graph = fresh_graph(&self.config);
    }
}

fn fresh_graph(config: &HnswConfig) -> Hnsw<'static, f32, DistCosine> {
    Hnsw::new(
        config.m,
        config.max_elements.max(1),
        MAX_LAYER,
        config.ef_construction,
        DistCosine {},
    )
}

/// Worker loop. Runs until cleanup is requested or every sender is gone.
pub(crate) fn run(config: HnswConfig, requests: Receiver<Request>) {
    let mut worker = Worker::new(config);
    debug!(
        "index worker started ({} dimensions, capacity {})",
        worker.config.dimensions, worker.config.max_elements
    );

    while let Ok(request) = requests.recv() {
        match request {
            Request::AddVector { label, vector, reply } => {
                let _ = reply.send(worker.add_vector(label, vector));
            }
            Request::AddVectors { items, reply } => {
                let _ = reply.send(worker.add_vectors(items));
            }
            Request::Search { vector, k, reply } => {
                let _ = reply.send(worker.search(vector, k));
            }
            Request::SetEf { ef, reply } => {
                worker.config.ef_search = ef;
                let _ = reply.send(Ok(()));
            }
            Request::Resize { new_max, reply } => {
                let _ = reply.send(worker.resize(new_max));
            }
            Request::Save { path, reply } => {
                let _ = reply.send(worker.save(&path));
            }
            Request::Load { path, reply } => {
                let _ = reply.send(worker.load(&path));
            }
            Request::Count { reply } => {
                let _ = reply.send(Ok(worker.vectors.len()));
            }
            Request::Reset { reply } => {
                worker.reset();
                let _ = reply.send(Ok(()));
            }
            Request::Cleanup { reply } => {
                let _ = reply.send(Ok(()));
                break;
            }
        }
    }

    if worker.vectors.len() > 0 {
        debug!("index worker stopping with {} in-memory vectors", worker.vectors.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker_with(dims: usize) -> Worker {
        Worker::new(HnswConfig::new(dims))
    }

    #[test]
    fn test_add_rejects_wrong_dimensions() {
        let mut worker = worker_with(4);
        let err = worker.add_vector(0, vec![1.0, 0.0]).unwrap_err();
        match err {
            RagError::DimensionMismatch { expected, got } => {
                assert_eq!(expected, 4);
                assert_eq!(got, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(worker.vectors.is_empty());
    }

    #[test]
    fn test_batch_add_is_all_or_nothing() {
        let mut worker = worker_with(2);
        let err = worker
            .add_vectors(vec![(0, vec![1.0, 0.0]), (1, vec![0.5])])
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
        // The valid first item must not have been inserted
        assert!(worker.vectors.is_empty());
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let mut worker = worker_with(2);
        worker.add_vector(7, vec![1.0, 0.0]).unwrap();
        let err = worker.add_vector(7, vec![0.0, 1.0]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_search_empty_index_returns_nothing() {
        let worker = worker_with(2);
        let (labels, distances) = worker.search(vec![1.0, 0.0], 5).unwrap();
        assert!(labels.is_empty());
        assert!(distances.is_empty());
    }

    #[test]
    fn test_search_orders_by_ascending_distance() {
        let mut worker = worker_with(3);
        worker.add_vector(0, vec![1.0, 0.0, 0.0]).unwrap();
        worker.add_vector(1, vec![0.0, 1.0, 0.0]).unwrap();
        worker.add_vector(2, vec![0.9, 0.1, 0.0]).unwrap();

        let (labels, distances) = worker.search(vec![1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0], 0);
        for pair in distances.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");

        let mut worker = worker_with(3);
        worker.add_vector(0, vec![1.0, 0.0, 0.0]).unwrap();
        worker.add_vector(1, vec![0.0, 1.0, 0.0]).unwrap();
        let before = worker.search(vec![0.9, 0.1, 0.0], 2).unwrap();
        assert_eq!(worker.save(&path).unwrap(), 2);

        let mut restored = worker_with(3);
        assert_eq!(restored.load(&path).unwrap(), 2);
        let after = restored.search(vec![0.9, 0.1, 0.0], 2).unwrap();
        assert_eq!(before.0, after.0);
    }

    #[test]
    fn test_load_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");

        let mut worker = worker_with(3);
        worker.add_vector(0, vec![1.0, 0.0, 0.0]).unwrap();
        worker.save(&path).unwrap();

        let mut other = worker_with(4);
        assert!(matches!(
            other.load(&path).unwrap_err(),
            RagError::DimensionMismatch { expected: 4, got: 3 }
        ));
    }

    #[test]
    fn test_reset_preserves_configuration() {
        let mut worker = worker_with(2);
        worker.add_vector(0, vec![1.0, 0.0]).unwrap();
        worker.reset();
        assert!(worker.vectors.is_empty());
        assert_eq!(worker.config.dimensions, 2);

        worker.add_vector(0, vec![0.0, 1.0]).unwrap();
        let (labels, _) = worker.search(vec![0.0, 1.0], 1).unwrap();
        assert_eq!(labels, vec![0]);
    }

    #[test]
    fn test_capacity_enforced_and_resize_lifts_it() {
        let mut config = HnswConfig::new(2);
        config.max_elements = 2;
        let mut worker = Worker::new(config);
        worker.add_vector(0, vec![1.0, 0.0]).unwrap();
        worker.add_vector(1, vec![0.0, 1.0]).unwrap();
        let err = worker.add_vector(2, vec![0.5, 0.5]).unwrap_err();
        assert!(err.to_string().contains("capacity"));

        worker.resize(10).unwrap();
        worker.add_vector(2, vec![0.5, 0.5]).unwrap();
        assert_eq!(worker.vectors.len(), 3);
    }
}
