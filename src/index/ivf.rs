//! IVFFlat (inverted-file) vector index.
//!
//! The embedding space is partitioned into `lists` clusters via k-means over
//! the build set; every vector lives in the inverted list of its nearest
//! centroid. Search computes distances to centroids first and scans only the
//! `probes` nearest lists, so recall rises monotonically with `probes` and
//! reaches the exact result at `probes == lists`.
//!
//! Centroids are trained once per build and are not recomputed on insert;
//! vectors inserted later attach to the nearest existing centroid. Periodic
//! rebuilds keep clusters balanced as the data drifts.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagittaError};
use crate::index::{AnnIndex, IndexKind, SearchCandidate, sort_candidates};
use crate::vector::{DistanceMetric, Vector};

/// Configuration for IVFFlat construction and search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfConfig {
    /// Number of clusters. When unset, defaults to `sqrt(n)` over the build
    /// set, clamped to `[1, 10_000]`.
    pub lists: Option<usize>,
    /// Number of clusters probed per search. Clamped to `[1, lists]`.
    pub probes: usize,
    /// Maximum k-means iterations.
    pub max_iterations: usize,
    /// Mean centroid movement below which k-means stops early.
    pub convergence_epsilon: f32,
    /// Seed for centroid initialization. Unset draws from the thread rng.
    pub seed: Option<u64>,
}

impl Default for IvfConfig {
    fn default() -> Self {
        Self {
            lists: None,
            probes: 4,
            max_iterations: 25,
            convergence_epsilon: 1e-3,
            seed: None,
        }
    }
}

impl IvfConfig {
    /// Number of clusters for a build over `n` vectors.
    fn effective_lists(&self, n: usize) -> usize {
        let lists = self
            .lists
            .unwrap_or_else(|| (n as f64).sqrt() as usize)
            .clamp(1, 10_000);
        lists.min(n).max(1)
    }
}

/// Inverted-file index over k-means clusters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfIndex {
    dimension: usize,
    metric: DistanceMetric,
    probes: usize,
    centroids: Vec<Vector>,
    inverted_lists: Vec<Vec<(u64, Vector)>>,
    /// Current list of every physically present id, tombstoned or not.
    assignments: HashMap<u64, usize, ahash::RandomState>,
    /// Removed ids awaiting reclamation by the next rebuild.
    tombstones: HashSet<u64, ahash::RandomState>,
}

impl IvfIndex {
    /// Train centroids with k-means over a representative sample, producing
    /// an index with empty inverted lists.
    ///
    /// Training over an empty set fails: centroids require a full pass over
    /// representative data before the first insert.
    pub fn train(
        dimension: usize,
        metric: DistanceMetric,
        config: IvfConfig,
        sample: &[(u64, Vector)],
    ) -> Result<Self> {
        if sample.is_empty() {
            return Err(SagittaError::index_build(
                "cannot train IVF centroids on an empty vector set",
            ));
        }

        let lists = config.effective_lists(sample.len());
        let probes = config.probes.clamp(1, lists);

        let seed = config.seed.unwrap_or_else(|| rand::rng().random::<u64>());
        let mut rng = StdRng::seed_from_u64(seed);

        let centroids = train_centroids(sample, lists, metric, &config, &mut rng)?;

        Ok(Self {
            dimension,
            metric,
            probes,
            centroids,
            inverted_lists: vec![Vec::new(); lists],
            assignments: HashMap::default(),
            tombstones: HashSet::default(),
        })
    }

    /// Build an index from a vector set: train centroids, then assign every
    /// vector to its nearest one.
    pub fn build(
        dimension: usize,
        metric: DistanceMetric,
        config: IvfConfig,
        vectors: Vec<(u64, Vector)>,
    ) -> Result<Self> {
        let mut index = Self::train(dimension, metric, config, &vectors)?;
        for (doc_id, vector) in vectors {
            index.insert(doc_id, vector)?;
        }
        Ok(index)
    }

    /// Number of clusters.
    pub fn lists(&self) -> usize {
        self.centroids.len()
    }

    /// Number of clusters probed per search.
    pub fn probes(&self) -> usize {
        self.probes
    }

    /// Override the probe count, clamped to `[1, lists]`.
    pub fn set_probes(&mut self, probes: usize) {
        self.probes = probes.clamp(1, self.lists());
    }

    fn nearest_centroid(&self, vector: &Vector) -> usize {
        nearest_centroid(&self.centroids, vector, self.metric)
    }

    /// Indices of the `probes` centroids nearest to the query.
    fn probe_lists(&self, query: &Vector) -> Vec<usize> {
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, centroid)| {
                let distance = self
                    .metric
                    .distance(&query.data, &centroid.data)
                    .unwrap_or(f32::INFINITY);
                (i, distance)
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(self.probes);
        ranked.into_iter().map(|(i, _)| i).collect()
    }
}

impl AnnIndex for IvfIndex {
    fn insert(&mut self, doc_id: u64, embedding: Vector) -> Result<()> {
        embedding.validate_dimension(self.dimension)?;
        if self.centroids.is_empty() {
            return Err(SagittaError::index_build(
                "IVF index has no trained centroids",
            ));
        }

        // Purge any previous physical entry so a replaced or re-inserted id
        // cannot resurface from a stale list.
        if let Some(old_list) = self.assignments.get(&doc_id).copied() {
            self.inverted_lists[old_list].retain(|(id, _)| *id != doc_id);
        }
        self.tombstones.remove(&doc_id);

        let list = self.nearest_centroid(&embedding);
        self.inverted_lists[list].push((doc_id, embedding));
        self.assignments.insert(doc_id, list);
        Ok(())
    }

    fn remove(&mut self, doc_id: u64) {
        if self.assignments.contains_key(&doc_id) {
            self.tombstones.insert(doc_id);
        }
    }

    fn search(&self, query: &Vector, k: usize) -> Result<Vec<SearchCandidate>> {
        query.validate_dimension(self.dimension)?;

        let mut candidates = Vec::new();
        for list in self.probe_lists(query) {
            for (doc_id, vector) in &self.inverted_lists[list] {
                if self.tombstones.contains(doc_id) {
                    continue;
                }
                let distance = self.metric.distance(&query.data, &vector.data)?;
                candidates.push(SearchCandidate::new(*doc_id, distance));
            }
        }

        sort_candidates(&mut candidates);
        candidates.truncate(k);
        Ok(candidates)
    }

    fn len(&self) -> usize {
        self.assignments.len() - self.tombstones.len()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::IvfFlat
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn clone_box(&self) -> Box<dyn AnnIndex> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn nearest_centroid(centroids: &[Vector], vector: &Vector, metric: DistanceMetric) -> usize {
    let mut best_cluster = 0;
    let mut best_distance = f32::INFINITY;

    for (i, centroid) in centroids.iter().enumerate() {
        if let Ok(distance) = metric.distance(&vector.data, &centroid.data)
            && distance < best_distance
        {
            best_distance = distance;
            best_cluster = i;
        }
    }

    best_cluster
}

/// Train `lists` centroids with k-means over the build set.
fn train_centroids(
    vectors: &[(u64, Vector)],
    lists: usize,
    metric: DistanceMetric,
    config: &IvfConfig,
    rng: &mut StdRng,
) -> Result<Vec<Vector>> {
    let dimension = vectors[0].1.dimension();
    let mut centroids = init_centroids_kmeans_plus_plus(vectors, lists, metric, rng);

    for _ in 0..config.max_iterations {
        let assignments = assign_to_clusters(vectors, &centroids, metric);

        let mut cluster_sums = vec![vec![0.0f32; dimension]; lists];
        let mut cluster_counts = vec![0usize; lists];
        for (i, (_, vector)) in vectors.iter().enumerate() {
            let cluster = assignments[i];
            cluster_counts[cluster] += 1;
            for (j, &value) in vector.data.iter().enumerate() {
                cluster_sums[cluster][j] += value;
            }
        }

        let mut movement = 0.0f32;
        for (i, (sum, count)) in cluster_sums.iter().zip(cluster_counts.iter()).enumerate() {
            if *count == 0 {
                // Keep the old centroid if no vectors were assigned.
                continue;
            }
            let new_data: Vec<f32> = sum.iter().map(|&s| s / *count as f32).collect();
            let new_centroid = Vector::new(new_data);
            movement += metric
                .distance(&centroids[i].data, &new_centroid.data)
                .unwrap_or(0.0);
            centroids[i] = new_centroid;
        }

        if movement / (lists as f32) < config.convergence_epsilon {
            break;
        }
    }

    Ok(centroids)
}

/// Choose initial centroids with k-means++: each subsequent centroid is
/// drawn with probability proportional to its squared distance from the
/// nearest already-chosen centroid.
fn init_centroids_kmeans_plus_plus(
    vectors: &[(u64, Vector)],
    lists: usize,
    metric: DistanceMetric,
    rng: &mut StdRng,
) -> Vec<Vector> {
    let mut centroids = Vec::with_capacity(lists);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(vectors[first_idx].1.clone());

    while centroids.len() < lists {
        let mut weights = Vec::with_capacity(vectors.len());
        let mut total_weight = 0.0f32;

        for (_, vector) in vectors {
            let min_dist = centroids
                .iter()
                .map(|centroid| {
                    metric
                        .distance(&vector.data, &centroid.data)
                        .unwrap_or(f32::INFINITY)
                })
                .fold(f32::INFINITY, f32::min);
            let weight = min_dist * min_dist;
            weights.push(weight);
            total_weight += weight;
        }

        if total_weight == 0.0 || !total_weight.is_finite() {
            // All remaining points coincide with a centroid.
            let idx = rng.random_range(0..vectors.len());
            centroids.push(vectors[idx].1.clone());
            continue;
        }

        let target = rng.random::<f32>() * total_weight;
        let mut cumsum = 0.0f32;
        let mut chosen = vectors.len() - 1;
        for (i, &weight) in weights.iter().enumerate() {
            cumsum += weight;
            if cumsum >= target {
                chosen = i;
                break;
            }
        }
        centroids.push(vectors[chosen].1.clone());
    }

    centroids
}

fn assign_to_clusters(
    vectors: &[(u64, Vector)],
    centroids: &[Vector],
    metric: DistanceMetric,
) -> Vec<usize> {
    if vectors.len() > 1000 {
        vectors
            .par_iter()
            .map(|(_, vector)| nearest_centroid(centroids, vector, metric))
            .collect()
    } else {
        vectors
            .iter()
            .map(|(_, vector)| nearest_centroid(centroids, vector, metric))
            .collect()
    }
}
