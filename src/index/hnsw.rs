//! HNSW (Hierarchical Navigable Small World) vector index.
//!
//! A multi-layer proximity graph. Every node lives in layer 0; each higher
//! layer holds an exponentially sparser subset, so a search can enter at the
//! top, greedily descend to the neighborhood of the query, and finish with a
//! width-`ef` beam search at layer 0. `m`, `ef_construction`, and
//! `ef_search` trade memory and latency for recall; recall is probabilistic
//! and not guaranteed to be 100%.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::{AnnIndex, IndexKind, SearchCandidate, sort_candidates};
use crate::vector::{DistanceMetric, Vector};

/// Configuration for HNSW construction and search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Neighbors kept per node on layers above 0.
    pub m: usize,
    /// Neighbors kept per node on layer 0. Conventionally `2 * m`.
    pub m_max0: usize,
    /// Candidate-list width during insertion.
    pub ef_construction: usize,
    /// Candidate-list width during search. Raised to `k` when smaller.
    pub ef_search: usize,
    /// Level normalization factor. `1/ln(2)` halves occupancy per layer.
    pub ml: f64,
    /// Hard cap on layer assignment.
    pub max_level: usize,
    /// Seed for the level generator. Unset draws from the thread rng.
    pub seed: Option<u64>,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            m_max0: 32,
            ef_construction: 200,
            ef_search: 50,
            ml: 1.0 / std::f64::consts::LN_2,
            max_level: 16,
            seed: None,
        }
    }
}

/// A node in the HNSW graph. Internal to the index module.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    embedding: Vector,
    max_layer: usize,
    /// `connections[layer]` = neighbor doc ids at that layer.
    connections: Vec<Vec<u64>>,
}

impl HnswNode {
    fn new(embedding: Vector, max_layer: usize) -> Self {
        Self {
            embedding,
            max_layer,
            connections: vec![Vec::new(); max_layer + 1],
        }
    }

    fn neighbors_at(&self, layer: usize) -> &[u64] {
        self.connections.get(layer).map_or(&[], |c| c.as_slice())
    }
}

/// A candidate during graph traversal, ordered as a min-heap on distance.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    doc_id: u64,
    distance: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.doc_id == other.doc_id
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering turns std's max-heap into a min-heap on distance.
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.doc_id.cmp(&self.doc_id))
    }
}

/// Max-heap wrapper tracking the worst element of the working result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FarthestCandidate(Candidate);

impl PartialOrd for FarthestCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FarthestCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .distance
            .partial_cmp(&other.0.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.0.doc_id.cmp(&other.0.doc_id))
    }
}

/// Hierarchical navigable small world graph index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    dimension: usize,
    metric: DistanceMetric,
    config: HnswConfig,
    nodes: HashMap<u64, HnswNode, ahash::RandomState>,
    entry_point: Option<u64>,
    max_layer: usize,
    /// Removed ids awaiting reclamation by the next rebuild. Tombstoned
    /// nodes still conduct traversal but never appear in results.
    tombstones: HashSet<u64, ahash::RandomState>,
    rng_state: u64,
}

impl HnswIndex {
    /// Create an empty HNSW index.
    pub fn new(dimension: usize, metric: DistanceMetric, config: HnswConfig) -> Self {
        let seed = config
            .seed
            .unwrap_or_else(|| rand::Rng::random::<u64>(&mut rand::rng()));
        Self {
            dimension,
            metric,
            config,
            nodes: HashMap::default(),
            entry_point: None,
            max_layer: 0,
            tombstones: HashSet::default(),
            rng_state: seed | 1,
        }
    }

    /// The configuration this index was built with.
    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Override the search-time candidate width.
    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.config.ef_search = ef_search;
    }

    /// Draw a layer for a new node from an exponential distribution.
    fn generate_level(&mut self) -> usize {
        // xorshift64; nonzero state stays nonzero.
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;

        let uniform = (x as f64) / (u64::MAX as f64);
        let level = (-uniform.ln() * self.config.ml).floor() as usize;
        level.min(self.config.max_level)
    }

    fn distance(&self, a: &Vector, b: &Vector) -> f32 {
        self.metric
            .distance(&a.data, &b.data)
            .unwrap_or(f32::INFINITY)
    }

    fn distance_to_node(&self, query: &Vector, doc_id: u64) -> Option<f32> {
        self.nodes
            .get(&doc_id)
            .map(|node| self.distance(query, &node.embedding))
    }

    /// Greedy beam search within one layer, returning the `ef` closest
    /// candidates sorted by distance.
    fn search_layer(
        &self,
        query: &Vector,
        entry_points: &[u64],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut results: BinaryHeap<FarthestCandidate> = BinaryHeap::new();
        let mut visited: HashSet<u64, ahash::RandomState> = HashSet::default();

        for &ep in entry_points {
            if let Some(distance) = self.distance_to_node(query, ep) {
                visited.insert(ep);
                let candidate = Candidate {
                    doc_id: ep,
                    distance,
                };
                candidates.push(candidate);
                results.push(FarthestCandidate(candidate));
            }
        }

        while let Some(current) = candidates.pop() {
            let furthest = results.peek().map_or(f32::INFINITY, |c| c.0.distance);
            if current.distance > furthest {
                break;
            }

            if let Some(node) = self.nodes.get(&current.doc_id) {
                for &neighbor_id in node.neighbors_at(layer) {
                    if !visited.insert(neighbor_id) {
                        continue;
                    }
                    if let Some(distance) = self.distance_to_node(query, neighbor_id) {
                        let furthest = results.peek().map_or(f32::INFINITY, |c| c.0.distance);
                        if results.len() < ef || distance < furthest {
                            let candidate = Candidate {
                                doc_id: neighbor_id,
                                distance,
                            };
                            candidates.push(candidate);
                            results.push(FarthestCandidate(candidate));
                            if results.len() > ef {
                                results.pop();
                            }
                        }
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_iter().map(|c| c.0).collect();
        out.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        out
    }

    /// Select up to `m` connection targets, preferring candidates that are
    /// closer to the query than to any already-selected neighbor so the
    /// neighborhood stays diverse.
    fn select_neighbors(&self, candidates: &[Candidate], m: usize) -> Vec<u64> {
        if candidates.len() <= m {
            return candidates.iter().map(|c| c.doc_id).collect();
        }

        let mut selected: Vec<u64> = Vec::with_capacity(m);
        for candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let embedding = match self.nodes.get(&candidate.doc_id) {
                Some(node) => &node.embedding,
                None => continue,
            };

            let diverse = selected.iter().all(|&selected_id| {
                self.nodes
                    .get(&selected_id)
                    .map(|node| self.distance(embedding, &node.embedding) >= candidate.distance)
                    .unwrap_or(true)
            });

            if diverse || selected.is_empty() {
                selected.push(candidate.doc_id);
            }
        }

        // Backfill with the closest skipped candidates.
        if selected.len() < m {
            for candidate in candidates {
                if selected.len() >= m {
                    break;
                }
                if !selected.contains(&candidate.doc_id) {
                    selected.push(candidate.doc_id);
                }
            }
        }

        selected
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        }
    }

    /// Trim a node's connection list at `layer` back to the limit, keeping
    /// a diverse set of the closest neighbors.
    fn prune_connections(&mut self, doc_id: u64, layer: usize) {
        let limit = self.max_connections(layer);
        let Some(node) = self.nodes.get(&doc_id) else {
            return;
        };
        if node.neighbors_at(layer).len() <= limit {
            return;
        }

        let embedding = node.embedding.clone();
        let mut ranked: Vec<Candidate> = node
            .neighbors_at(layer)
            .iter()
            .filter_map(|&neighbor_id| {
                self.distance_to_node(&embedding, neighbor_id)
                    .map(|distance| Candidate {
                        doc_id: neighbor_id,
                        distance,
                    })
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });

        let kept = self.select_neighbors(&ranked, limit);
        if let Some(node) = self.nodes.get_mut(&doc_id) {
            node.connections[layer] = kept;
        }
    }

    /// Physically remove a node and its incoming links. Used when a vector
    /// is replaced in place; plain removal only tombstones.
    fn detach(&mut self, doc_id: u64) {
        let Some(node) = self.nodes.remove(&doc_id) else {
            return;
        };
        for layer in 0..=node.max_layer {
            for &neighbor_id in &node.connections[layer] {
                if let Some(neighbor) = self.nodes.get_mut(&neighbor_id)
                    && layer < neighbor.connections.len()
                {
                    neighbor.connections[layer].retain(|&id| id != doc_id);
                }
            }
        }

        if self.entry_point == Some(doc_id) {
            let new_entry = self
                .nodes
                .iter()
                .max_by_key(|(_, node)| node.max_layer)
                .map(|(&id, node)| (id, node.max_layer));
            match new_entry {
                Some((id, max_layer)) => {
                    self.entry_point = Some(id);
                    self.max_layer = max_layer;
                }
                None => {
                    self.entry_point = None;
                    self.max_layer = 0;
                }
            }
        }
    }
}

impl AnnIndex for HnswIndex {
    fn insert(&mut self, doc_id: u64, embedding: Vector) -> Result<()> {
        embedding.validate_dimension(self.dimension)?;

        if self.nodes.contains_key(&doc_id) {
            self.detach(doc_id);
        }
        self.tombstones.remove(&doc_id);

        let level = self.generate_level();

        let Some(entry_point) = self.entry_point else {
            self.nodes.insert(doc_id, HnswNode::new(embedding, level));
            self.entry_point = Some(doc_id);
            self.max_layer = level;
            return Ok(());
        };

        // Greedy descent through the layers above the new node's level.
        let mut ep = entry_point;
        for layer in ((level + 1)..=self.max_layer).rev() {
            if let Some(closest) = self.search_layer(&embedding, &[ep], 1, layer).first() {
                ep = closest.doc_id;
            }
        }

        self.nodes
            .insert(doc_id, HnswNode::new(embedding.clone(), level));

        // Connect downward from the entry layer, widening to ef_construction.
        for layer in (0..=level.min(self.max_layer)).rev() {
            let candidates =
                self.search_layer(&embedding, &[ep], self.config.ef_construction, layer);
            let filtered: Vec<Candidate> = candidates
                .iter()
                .copied()
                .filter(|c| c.doc_id != doc_id)
                .collect();
            if filtered.is_empty() {
                continue;
            }

            let neighbors = self.select_neighbors(&filtered, self.config.m);
            for &neighbor_id in &neighbors {
                if let Some(node) = self.nodes.get_mut(&doc_id)
                    && !node.connections[layer].contains(&neighbor_id)
                {
                    node.connections[layer].push(neighbor_id);
                }
                if let Some(neighbor) = self.nodes.get_mut(&neighbor_id)
                    && layer < neighbor.connections.len()
                    && !neighbor.connections[layer].contains(&doc_id)
                {
                    neighbor.connections[layer].push(doc_id);
                }
            }
            for &neighbor_id in &neighbors {
                self.prune_connections(neighbor_id, layer);
            }

            ep = filtered[0].doc_id;
        }

        if level > self.max_layer {
            self.entry_point = Some(doc_id);
            self.max_layer = level;
        }
        Ok(())
    }

    fn remove(&mut self, doc_id: u64) {
        if self.nodes.contains_key(&doc_id) {
            self.tombstones.insert(doc_id);
        }
    }

    fn search(&self, query: &Vector, k: usize) -> Result<Vec<SearchCandidate>> {
        query.validate_dimension(self.dimension)?;

        let Some(entry_point) = self.entry_point else {
            return Ok(Vec::new());
        };

        // Descend greedily to layer 1, then beam-search layer 0. The beam
        // is widened past ef so tombstoned hits cannot starve the result.
        let mut ep = entry_point;
        for layer in (1..=self.max_layer).rev() {
            if let Some(closest) = self.search_layer(query, &[ep], 1, layer).first() {
                ep = closest.doc_id;
            }
        }

        let ef = self.config.ef_search.max(k) + self.tombstones.len().min(k);
        let candidates = self.search_layer(query, &[ep], ef, 0);

        let mut results: Vec<SearchCandidate> = candidates
            .into_iter()
            .filter(|c| !self.tombstones.contains(&c.doc_id))
            .map(|c| SearchCandidate::new(c.doc_id, c.distance))
            .collect();
        sort_candidates(&mut results);
        results.truncate(k);
        Ok(results)
    }

    fn len(&self) -> usize {
        self.nodes.len() - self.tombstones.len()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Hnsw
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

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_config() -> HnswConfig {
        HnswConfig {
            seed: Some(7),
            ..Default::default()
        }
    }

    fn grid_index(side: u64) -> HnswIndex {
        let mut index = HnswIndex::new(2, DistanceMetric::L2, seeded_config());
        for x in 0..side {
            for y in 0..side {
                let doc_id = x * side + y;
                index
                    .insert(doc_id, Vector::new(vec![x as f32, y as f32]))
                    .unwrap();
            }
        }
        index
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = HnswIndex::new(2, DistanceMetric::L2, seeded_config());
        let results = index.search(&Vector::new(vec![0.0, 0.0]), 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_single_node() {
        let mut index = HnswIndex::new(2, DistanceMetric::L2, seeded_config());
        index.insert(1, Vector::new(vec![1.0, 1.0])).unwrap();

        let results = index.search(&Vector::new(vec![0.0, 0.0]), 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, 1);
    }

    #[test]
    fn test_search_finds_nearest_on_grid() {
        let index = grid_index(10);
        let results = index.search(&Vector::new(vec![4.1, 4.1]), 1).unwrap();
        // Nearest grid point to (4.1, 4.1) is (4, 4) = id 44.
        assert_eq!(results[0].doc_id, 44);
    }

    #[test]
    fn test_results_sorted_with_id_tie_break() {
        let index = grid_index(5);
        let results = index.search(&Vector::new(vec![2.0, 2.0]), 10).unwrap();

        for window in results.windows(2) {
            assert!(
                window[0].distance < window[1].distance
                    || (window[0].distance == window[1].distance
                        && window[0].doc_id < window[1].doc_id)
            );
        }
    }

    #[test]
    fn test_remove_excludes_from_results() {
        let mut index = grid_index(5);
        index.remove(12); // (2, 2)

        let results = index.search(&Vector::new(vec![2.0, 2.0]), 5).unwrap();
        assert!(results.iter().all(|c| c.doc_id != 12));
        assert_eq!(index.len(), 24);
    }

    #[test]
    fn test_reinsert_after_remove() {
        let mut index = grid_index(3);
        index.remove(4);
        index.insert(4, Vector::new(vec![1.0, 1.0])).unwrap();

        let results = index.search(&Vector::new(vec![1.0, 1.0]), 1).unwrap();
        assert_eq!(results[0].doc_id, 4);
        assert_eq!(index.len(), 9);
    }

    #[test]
    fn test_insert_replaces_vector() {
        let mut index = grid_index(3);
        index.insert(0, Vector::new(vec![100.0, 100.0])).unwrap();
        assert_eq!(index.len(), 9);

        let results = index.search(&Vector::new(vec![100.0, 100.0]), 1).unwrap();
        assert_eq!(results[0].doc_id, 0);
    }

    #[test]
    fn test_level_generation_is_bounded() {
        let mut index = HnswIndex::new(2, DistanceMetric::L2, seeded_config());
        for _ in 0..1000 {
            assert!(index.generate_level() <= index.config.max_level);
        }
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = HnswIndex::new(2, DistanceMetric::L2, seeded_config());
        assert!(index.insert(1, Vector::new(vec![1.0])).is_err());
    }
}
