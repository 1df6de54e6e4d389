//! Index lifecycle management with snapshot isolation.
//!
//! The manager publishes immutable [`IndexSnapshot`]s behind an atomic slot.
//! Readers clone the current `Arc` and search it without holding any lock;
//! in-flight queries keep the snapshot they started with even while a
//! rebuild or mutation publishes a newer one. Mutations apply to a
//! copy-on-write clone and swap it in whole, so a partially built structure
//! is never observable.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, SagittaError};
use crate::index::{
    AnnIndex, FlatIndex, HnswIndex, IndexConfig, IndexKind, IvfIndex, SearchCandidate,
};
use crate::vector::{DistanceMetric, Vector};

/// Vectors applied per batch during rebuild; cancellation is checked at
/// every batch boundary.
const REBUILD_BATCH: usize = 256;

/// Cooperative cancellation token for long-running rebuilds.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A versioned, point-in-time immutable view of an index structure.
///
/// Snapshots are only ever created whole and published atomically; holders
/// may search them concurrently without coordination.
#[derive(Debug)]
pub struct IndexSnapshot {
    version: u64,
    index: Box<dyn AnnIndex>,
}

impl IndexSnapshot {
    pub(crate) fn new(version: u64, index: Box<dyn AnnIndex>) -> Self {
        Self { version, index }
    }

    /// Monotonically increasing snapshot version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of live vectors in this snapshot.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the snapshot holds no live vectors.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The structure kind backing this snapshot.
    pub fn kind(&self) -> IndexKind {
        self.index.kind()
    }

    /// The distance metric this snapshot was built with.
    pub fn metric(&self) -> DistanceMetric {
        self.index.metric()
    }

    /// The vector dimension of this snapshot.
    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Search this snapshot for the `k` nearest candidates.
    pub fn search(&self, query: &Vector, k: usize) -> Result<Vec<SearchCandidate>> {
        self.index.search(query, k)
    }

    pub(crate) fn structure(&self) -> &dyn AnnIndex {
        self.index.as_ref()
    }
}

/// Mutation applied to the index through the manager.
#[derive(Debug, Clone)]
pub enum IndexOp {
    /// Insert or replace a vector.
    Insert(u64, Vector),
    /// Remove a vector (tombstoned until the next rebuild).
    Remove(u64),
}

/// Builds and maintains the live ANN structure for one vector collection.
pub struct IndexManager {
    config: IndexConfig,
    current: RwLock<Arc<IndexSnapshot>>,
    /// Serializes mutators; readers never take this.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("IndexManager")
            .field("kind", &snapshot.kind())
            .field("version", &snapshot.version())
            .field("len", &snapshot.len())
            .finish()
    }
}

impl IndexManager {
    /// Create a manager with an empty initial snapshot.
    ///
    /// The initial structure is Flat (or HNSW when configured above a zero
    /// threshold): IVF requires trained centroids and therefore only becomes
    /// live at the first rebuild over real data.
    pub fn new(config: IndexConfig) -> Self {
        let index: Box<dyn AnnIndex> = match config.effective_kind(0) {
            IndexKind::Hnsw => Box::new(HnswIndex::new(
                config.dimension,
                config.metric,
                config.hnsw.clone(),
            )),
            _ => Box::new(FlatIndex::new(config.dimension, config.metric)),
        };

        Self {
            config,
            current: RwLock::new(Arc::new(IndexSnapshot::new(0, index))),
            write_lock: Mutex::new(()),
        }
    }

    /// Restore a manager from a previously persisted snapshot.
    pub(crate) fn from_snapshot(config: IndexConfig, snapshot: IndexSnapshot) -> Self {
        Self {
            config,
            current: RwLock::new(Arc::new(snapshot)),
            write_lock: Mutex::new(()),
        }
    }

    /// The configuration this manager was created with.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The currently published snapshot. Readers search the returned `Arc`
    /// without further coordination.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    fn publish(&self, index: Box<dyn AnnIndex>) -> u64 {
        let mut slot = self.current.write();
        let version = slot.version() + 1;
        *slot = Arc::new(IndexSnapshot::new(version, index));
        version
    }

    /// Insert or replace a single vector.
    pub fn insert(&self, doc_id: u64, embedding: Vector) -> Result<u64> {
        self.apply(vec![IndexOp::Insert(doc_id, embedding)])
    }

    /// Remove a single vector. Removing an absent id is a no-op.
    pub fn remove(&self, doc_id: u64) -> Result<u64> {
        self.apply(vec![IndexOp::Remove(doc_id)])
    }

    /// Apply a batch of mutations as one new snapshot.
    ///
    /// The current structure is cloned once, every operation is applied to
    /// the clone, and the result is published whole. A failing operation
    /// publishes nothing. Batching amortizes the clone, so bulk writers
    /// should prefer this over repeated single inserts.
    pub fn apply(&self, ops: Vec<IndexOp>) -> Result<u64> {
        let _guard = self.write_lock.lock();

        let mut index = self.snapshot().structure().clone_box();
        for op in ops {
            match op {
                IndexOp::Insert(doc_id, embedding) => index.insert(doc_id, embedding)?,
                IndexOp::Remove(doc_id) => index.remove(doc_id),
            }
        }

        Ok(self.publish(index))
    }

    /// Atomically replace the live structure with one built from a
    /// point-in-time vector set.
    ///
    /// The build runs against a private structure; readers keep the previous
    /// snapshot until the swap. Cancellation is honored between batches and
    /// leaves the previous snapshot authoritative. Tombstones accumulated by
    /// `remove` are reclaimed because the new structure only sees the given
    /// vector set.
    pub fn rebuild(&self, vectors: Vec<(u64, Vector)>, cancel: &CancelToken) -> Result<u64> {
        let _guard = self.write_lock.lock();

        let check_cancelled = || {
            if cancel.is_cancelled() {
                Err(SagittaError::cancelled("index rebuild"))
            } else {
                Ok(())
            }
        };
        check_cancelled()?;

        let kind = self.config.effective_kind(vectors.len());
        let mut index: Box<dyn AnnIndex> = match kind {
            IndexKind::Flat => Box::new(FlatIndex::new(self.config.dimension, self.config.metric)),
            IndexKind::Hnsw => Box::new(HnswIndex::new(
                self.config.dimension,
                self.config.metric,
                self.config.hnsw.clone(),
            )),
            IndexKind::IvfFlat => {
                let trained = IvfIndex::train(
                    self.config.dimension,
                    self.config.metric,
                    self.config.ivf.clone(),
                    &vectors,
                )?;
                check_cancelled()?;
                Box::new(trained)
            }
        };

        for batch in vectors.chunks(REBUILD_BATCH) {
            check_cancelled()?;
            for (doc_id, embedding) in batch {
                index.insert(*doc_id, embedding.clone()).map_err(|e| {
                    SagittaError::index_build(format!("rebuild failed at vector {doc_id}: {e}"))
                })?;
            }
        }
        check_cancelled()?;

        let version = self.publish(index);
        log::info!(
            "index rebuilt: kind={} vectors={} version={}",
            kind.name(),
            self.snapshot().len(),
            version
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> IndexManager {
        IndexManager::new(IndexConfig {
            dimension: 2,
            metric: DistanceMetric::L2,
            ..Default::default()
        })
    }

    fn vectors(n: u64) -> Vec<(u64, Vector)> {
        (0..n)
            .map(|i| (i, Vector::new(vec![i as f32, 0.0])))
            .collect()
    }

    #[test]
    fn test_mutations_bump_versions() {
        let manager = manager();
        assert_eq!(manager.snapshot().version(), 0);

        manager.insert(1, Vector::new(vec![1.0, 0.0])).unwrap();
        assert_eq!(manager.snapshot().version(), 1);
        assert_eq!(manager.snapshot().len(), 1);

        manager.remove(1).unwrap();
        assert_eq!(manager.snapshot().version(), 2);
        assert_eq!(manager.snapshot().len(), 0);
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let manager = manager();
        manager.insert(1, Vector::new(vec![1.0, 0.0])).unwrap();

        let before = manager.snapshot();
        manager.insert(2, Vector::new(vec![2.0, 0.0])).unwrap();

        // The old Arc still sees exactly one vector.
        assert_eq!(before.len(), 1);
        assert_eq!(manager.snapshot().len(), 2);
    }

    #[test]
    fn test_failed_batch_publishes_nothing() {
        let manager = manager();
        manager.insert(1, Vector::new(vec![1.0, 0.0])).unwrap();
        let version = manager.snapshot().version();

        let err = manager
            .apply(vec![
                IndexOp::Insert(2, Vector::new(vec![2.0, 0.0])),
                IndexOp::Insert(3, Vector::new(vec![1.0])), // wrong dimension
            ])
            .unwrap_err();
        assert!(matches!(err, SagittaError::DimensionMismatch { .. }));

        // Nothing from the failed batch is visible.
        assert_eq!(manager.snapshot().version(), version);
        assert_eq!(manager.snapshot().len(), 1);
    }

    #[test]
    fn test_rebuild_replaces_structure() {
        let manager = manager();
        manager.insert(99, Vector::new(vec![9.0, 9.0])).unwrap();

        manager.rebuild(vectors(5), &CancelToken::new()).unwrap();

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.len(), 5);
        let results = snapshot.search(&Vector::new(vec![0.0, 0.0]), 10).unwrap();
        assert!(results.iter().all(|c| c.doc_id != 99));
    }

    #[test]
    fn test_cancelled_rebuild_keeps_previous_snapshot() {
        let manager = manager();
        manager.insert(1, Vector::new(vec![1.0, 0.0])).unwrap();
        let before = manager.snapshot().version();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = manager.rebuild(vectors(5), &cancel).unwrap_err();
        assert!(matches!(err, SagittaError::OperationCancelled(_)));

        assert_eq!(manager.snapshot().version(), before);
        assert_eq!(manager.snapshot().len(), 1);
    }

    #[test]
    fn test_rebuild_selects_structure_by_size() {
        let manager = IndexManager::new(IndexConfig {
            dimension: 2,
            metric: DistanceMetric::L2,
            kind: IndexKind::Hnsw,
            flat_threshold: 10,
            ..Default::default()
        });

        manager.rebuild(vectors(5), &CancelToken::new()).unwrap();
        assert_eq!(manager.snapshot().kind(), IndexKind::Flat);

        manager.rebuild(vectors(20), &CancelToken::new()).unwrap();
        assert_eq!(manager.snapshot().kind(), IndexKind::Hnsw);
    }
}
