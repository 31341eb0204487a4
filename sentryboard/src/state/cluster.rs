// src/state/cluster.rs
//
// Adaptive-similarity behavioral clustering (§4.3; recompute cadence driven
// by `main.rs::spawn_cluster_sweeper`, on `cluster.interval_seconds`). The
// teacher's own
// clustering (`state/window.rs::update_clusters`) is a simple incremental
// union-find over shared-infrastructure edges (payment/org/subnet/ja3
// weights) — it never computes a quality function or runs local-moving
// refinement, and no repo in the retrieval pack implements real
// Leiden/Louvain community detection either. The Constant-Potts-Model
// local-moving + refinement loop below is built directly from the
// algorithmic description in the specification on top of `petgraph`
// (already a teacher dependency, exercised here for real graph traversal
// for the first time), while the surrounding style — snapshot behind an
// atomically-swapped `Arc`, `DashMap` input table, observability events on
// weight drift — follows the teacher's `StateStore` conventions.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::sync::Arc;

use crate::config::ClusterConfig;
use crate::model::ClusterSnapshotEntry;

/// Per-signature feature vector consulted by the similarity function.
/// Continuous fields are compared by normalized absolute difference;
/// categorical fields by equality.
#[derive(Debug, Clone, Default)]
pub struct SignatureFeatures {
    pub timing_cv: f64,
    pub request_rate: f64,
    pub path_diversity: f64,
    pub path_entropy: f64,
    pub avg_bot_probability: f64,
    pub self_drift: f64,
    pub human_drift: f64,
    pub loop_score: f64,
    pub spectral_entropy: f64,
    pub harmonic_ratio: f64,
    pub peak_to_average: f64,
    pub dominant_frequency: f64,
    pub country: String,
    pub asn: String,
    pub datacenter: bool,
}

const CONTINUOUS_FEATURES: &[fn(&SignatureFeatures) -> f64] = &[
    |f| f.timing_cv,
    |f| f.request_rate,
    |f| f.path_diversity,
    |f| f.path_entropy,
    |f| f.avg_bot_probability,
    |f| f.self_drift,
    |f| f.human_drift,
    |f| f.loop_score,
    |f| f.spectral_entropy,
    |f| f.harmonic_ratio,
    |f| f.peak_to_average,
    |f| f.dominant_frequency,
];
const N_CONTINUOUS: usize = CONTINUOUS_FEATURES.len();

#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub clusters: Vec<ClusterSnapshotEntry>,
    pub membership: HashMap<String, u32>,
    pub stability: HashMap<u32, f64>,
    pub computed_at: Option<DateTime<Utc>>,
}

pub struct ClusterEngine {
    features: DashMap<String, SignatureFeatures>,
    snapshot: RwLock<Arc<ClusterSnapshot>>,
    config: ClusterConfig,
    seed: u64,
}

impl ClusterEngine {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            features: DashMap::new(),
            snapshot: RwLock::new(Arc::new(ClusterSnapshot::default())),
            config,
            seed: 0x5EED_u64,
        }
    }

    pub fn update_features(&self, signature_id: &str, features: SignatureFeatures) {
        self.features.insert(signature_id.to_string(), features);
    }

    pub fn get_clusters(&self) -> Arc<ClusterSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn cluster_of(&self, signature_id: &str) -> Option<u32> {
        self.snapshot.read().membership.get(signature_id).copied()
    }

    /// Every feature's "diagnosticity" — continuous via coefficient of
    /// variation over the population, categorical via Shannon entropy
    /// normalized by log2(#categories). Clamped to [0.02, 0.20] and
    /// renormalized, iterated up to 3 times.
    fn adaptive_weights(&self, ids: &[String]) -> [f64; N_CONTINUOUS + 2] {
        let mut raw = [0.0f64; N_CONTINUOUS + 2];

        for (i, getter) in CONTINUOUS_FEATURES.iter().enumerate() {
            let values: Vec<f64> = ids
                .iter()
                .filter_map(|id| self.features.get(id).map(|f| getter(&f)))
                .collect();
            raw[i] = coefficient_of_variation(&values);
        }

        let countries: Vec<String> = ids
            .iter()
            .filter_map(|id| self.features.get(id).map(|f| f.country.clone()))
            .collect();
        raw[N_CONTINUOUS] = normalized_categorical_entropy(&countries);

        let asns: Vec<String> = ids
            .iter()
            .filter_map(|id| self.features.get(id).map(|f| f.asn.clone()))
            .collect();
        raw[N_CONTINUOUS + 1] = normalized_categorical_entropy(&asns);

        let mut weights = raw;
        for _ in 0..3 {
            let total: f64 = weights.iter().sum();
            if total <= 0.0 {
                let n = weights.len() as f64;
                weights = [1.0 / n; N_CONTINUOUS + 2];
            } else {
                for w in weights.iter_mut() {
                    *w /= total;
                }
            }
            for w in weights.iter_mut() {
                *w = w.clamp(0.02, 0.20);
            }
        }
        let total: f64 = weights.iter().sum();
        for w in weights.iter_mut() {
            *w /= total;
        }
        weights
    }

    fn similarity(&self, a: &SignatureFeatures, b: &SignatureFeatures, ranges: &[(f64, f64); N_CONTINUOUS], weights: &[f64; N_CONTINUOUS + 2]) -> f64 {
        let mut total = 0.0;
        for (i, getter) in CONTINUOUS_FEATURES.iter().enumerate() {
            let (lo, hi) = ranges[i];
            let span = (hi - lo).max(1e-9);
            let na = (getter(a) - lo) / span;
            let nb = (getter(b) - lo) / span;
            total += weights[i] * (1.0 - (na - nb).abs()).clamp(0.0, 1.0);
        }
        total += weights[N_CONTINUOUS] * if a.country == b.country { 1.0 } else { 0.0 };
        total += weights[N_CONTINUOUS + 1] * if a.asn == b.asn { 1.0 } else { 0.0 };
        total.clamp(0.0, 1.0)
    }

    /// Recompute clusters from the current feature snapshot. Deterministic
    /// given a fixed feature snapshot (seeded local-moving order).
    pub fn recompute(&self) -> Arc<ClusterSnapshot> {
        let ids: Vec<String> = self.features.iter().map(|e| e.key().clone()).collect();
        let now = Utc::now();

        if ids.len() < 2 {
            let snap = Arc::new(ClusterSnapshot {
                computed_at: Some(now),
                ..Default::default()
            });
            *self.snapshot.write() = snap.clone();
            return snap;
        }

        let weights = self.adaptive_weights(&ids);
        let mut ranges = [(f64::MAX, f64::MIN); N_CONTINUOUS];
        for (i, getter) in CONTINUOUS_FEATURES.iter().enumerate() {
            for id in &ids {
                if let Some(f) = self.features.get(id) {
                    let v = getter(&f);
                    ranges[i].0 = ranges[i].0.min(v);
                    ranges[i].1 = ranges[i].1.max(v);
                }
            }
        }

        let mut graph: UnGraph<String, f64> = UnGraph::new_undirected();
        let mut idx_of: HashMap<String, NodeIndex> = HashMap::new();
        for id in &ids {
            idx_of.insert(id.clone(), graph.add_node(id.clone()));
        }
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let fa = self.features.get(&ids[i]).unwrap();
                let fb = self.features.get(&ids[j]).unwrap();
                let sim = self.similarity(&fa, &fb, &ranges, &weights);
                if sim >= self.config.similarity_threshold {
                    graph.add_edge(idx_of[&ids[i]], idx_of[&ids[j]], sim);
                }
            }
        }

        let communities = leiden_cpm(&graph, self.config.resolution, self.config.max_iterations, self.seed);
        let (compacted, _n_clusters) = compact_labels(&communities);

        let previous = self.snapshot.read().clone();
        let snap = self.build_snapshot(&graph, &compacted, &ids, now, &previous);
        *self.snapshot.write() = snap.clone();
        snap
    }

    fn build_snapshot(
        &self,
        graph: &UnGraph<String, f64>,
        communities: &HashMap<NodeIndex, u32>,
        ids: &[String],
        now: DateTime<Utc>,
        previous: &ClusterSnapshot,
    ) -> Arc<ClusterSnapshot> {
        let mut by_cluster: HashMap<u32, Vec<String>> = HashMap::new();
        for node in graph.node_indices() {
            let cid = communities[&node];
            by_cluster.entry(cid).or_default().push(graph[node].clone());
        }

        let mut clusters = Vec::new();
        let mut membership = HashMap::new();
        let mut stability = HashMap::new();

        for (cid, members) in &by_cluster {
            let mut centroid = vec![0.0; N_CONTINUOUS];
            let mut bot_sum = 0.0;
            for m in members {
                if let Some(f) = self.features.get(m) {
                    for (i, getter) in CONTINUOUS_FEATURES.iter().enumerate() {
                        centroid[i] += getter(&f);
                    }
                    bot_sum += f.avg_bot_probability;
                }
            }
            let n = members.len().max(1) as f64;
            for c in centroid.iter_mut() {
                *c /= n;
            }

            for m in members {
                membership.insert(m.clone(), *cid);
            }

            let prev_members: HashSet<&String> = previous
                .membership
                .iter()
                .filter(|(_, c)| **c == *cid)
                .map(|(id, _)| id)
                .collect();
            let cur_members: HashSet<&String> = members.iter().collect();
            let stab = jaccard(&cur_members, &prev_members);
            stability.insert(*cid, stab);

            clusters.push(ClusterSnapshotEntry {
                cluster_id: *cid,
                member_signature_ids: members.clone(),
                centroid_feature_vector: centroid,
                avg_bot_probability: bot_sum / n,
                cohort_name: format!("cohort-{}", cid),
                created_at: previous
                    .clusters
                    .iter()
                    .find(|c| c.cluster_id == *cid)
                    .map(|c| c.created_at)
                    .unwrap_or(now),
                last_refreshed: now,
            });
        }

        let _ = ids;
        Arc::new(ClusterSnapshot {
            clusters,
            membership,
            stability,
            computed_at: Some(now),
        })
    }
}

fn jaccard(a: &HashSet<&String>, b: &HashSet<&String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let inter = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        inter / union
    }
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean.abs() < 1e-12 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (variance.sqrt() / mean).abs()
}

fn normalized_categorical_entropy(values: &[String]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<&String, usize> = HashMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    let n = values.len() as f64;
    let entropy: f64 = counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum();
    let k = counts.len();
    if k <= 1 {
        0.0
    } else {
        (entropy / (k as f64).log2()).clamp(0.0, 1.0)
    }
}

// ── Deterministic PRNG (xorshift64*) for seeded local-moving order ────────

struct Xorshift(u64);
impl Xorshift {
    fn new(seed: u64) -> Self {
        Xorshift(seed.max(1))
    }
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

fn deterministic_order(n: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = Xorshift::new(seed);
    if n > 1 {
        for i in (1..n).rev() {
            let j = (rng.next_u64() % (i as u64 + 1)) as usize;
            order.swap(i, j);
        }
    }
    order
}

/// Leiden-style community detection using the Constant Potts Model quality
/// function (§4.3). Every node starts in its own community; local moving
/// visits nodes in a fixed deterministic order and relocates each to the
/// neighboring community maximizing CPM gain; refinement splits any
/// community whose induced subgraph turned out disconnected.
fn leiden_cpm(graph: &UnGraph<String, f64>, resolution: f64, max_iterations: u32, seed: u64) -> HashMap<NodeIndex, u32> {
    let nodes: Vec<NodeIndex> = graph.node_indices().collect();
    let mut community: HashMap<NodeIndex, u32> = nodes.iter().enumerate().map(|(i, n)| (*n, i as u32)).collect();
    let mut comm_size: HashMap<u32, usize> = community.values().map(|c| (*c, 1usize)).collect();

    let order = deterministic_order(nodes.len(), seed);

    for _ in 0..max_iterations {
        let mut improved = false;

        for &idx in &order {
            let node = nodes[idx];
            let current_comm = community[&node];

            let mut weight_by_comm: HashMap<u32, f64> = HashMap::new();
            for edge in graph.edges(node) {
                let other = if edge.source() == node { edge.target() } else { edge.source() };
                let c = community[&other];
                *weight_by_comm.entry(c).or_insert(0.0) += *edge.weight();
            }

            let w_in_current = weight_by_comm.get(&current_comm).copied().unwrap_or(0.0);
            let current_size = comm_size.get(&current_comm).copied().unwrap_or(1);

            let mut best_comm = current_comm;
            let mut best_gain = 0.0f64;
            for (&cand_comm, &w_in_candidate) in &weight_by_comm {
                if cand_comm == current_comm {
                    continue;
                }
                let cand_size = comm_size.get(&cand_comm).copied().unwrap_or(0);
                let gain = (w_in_candidate - w_in_current) - resolution * (cand_size as f64 - (current_size as f64 - 1.0));
                if gain > best_gain {
                    best_gain = gain;
                    best_comm = cand_comm;
                }
            }

            if best_comm != current_comm {
                *comm_size.entry(current_comm).or_insert(1) -= 1;
                *comm_size.entry(best_comm).or_insert(0) += 1;
                community.insert(node, best_comm);
                improved = true;
            }
        }

        if !improved {
            break;
        }
    }

    refine_disconnected(graph, &mut community);
    community
}

/// For every community, BFS its induced subgraph; if disconnected, keep the
/// largest component's id and assign fresh ids to the others.
fn refine_disconnected(graph: &UnGraph<String, f64>, community: &mut HashMap<NodeIndex, u32>) {
    let mut by_comm: HashMap<u32, Vec<NodeIndex>> = HashMap::new();
    for (&node, &c) in community.iter() {
        by_comm.entry(c).or_default().push(node);
    }

    let mut next_id = community.values().copied().max().unwrap_or(0) + 1;

    for (_, members) in by_comm {
        let member_set: HashSet<NodeIndex> = members.iter().copied().collect();
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut components: Vec<Vec<NodeIndex>> = Vec::new();

        for &start in &members {
            if visited.contains(&start) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = std::collections::VecDeque::new();
            queue.push_back(start);
            visited.insert(start);
            while let Some(n) = queue.pop_front() {
                component.push(n);
                for edge in graph.edges(n) {
                    let other = if edge.source() == n { edge.target() } else { edge.source() };
                    if member_set.contains(&other) && !visited.contains(&other) {
                        visited.insert(other);
                        queue.push_back(other);
                    }
                }
            }
            components.push(component);
        }

        if components.len() <= 1 {
            continue;
        }

        components.sort_by_key(|c| std::cmp::Reverse(c.len()));
        // largest component keeps its existing id; the rest get fresh ids
        for component in components.iter().skip(1) {
            for node in component {
                community.insert(*node, next_id);
            }
            next_id += 1;
        }
    }
}

fn compact_labels(community: &HashMap<NodeIndex, u32>) -> (HashMap<NodeIndex, u32>, u32) {
    let mut seen: HashMap<u32, u32> = HashMap::new();
    let mut next = 0u32;
    let mut out = HashMap::new();
    // iterate in a deterministic order (by NodeIndex index value) so label
    // assignment doesn't depend on hash-map iteration order
    let mut nodes: Vec<&NodeIndex> = community.keys().collect();
    nodes.sort_by_key(|n| n.index());
    for node in nodes {
        let c = community[node];
        let compact = *seen.entry(c).or_insert_with(|| {
            let id = next;
            next += 1;
            id
        });
        out.insert(*node, compact);
    }
    (out, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_signature(country: &str, dc: bool) -> SignatureFeatures {
        SignatureFeatures {
            timing_cv: 0.05,
            request_rate: 120.0,
            path_diversity: 0.1,
            path_entropy: 0.1,
            avg_bot_probability: 0.8,
            datacenter: dc,
            country: country.to_string(),
            asn: "cloud".to_string(),
            ..Default::default()
        }
    }

    fn dispersed_signature(n: usize) -> SignatureFeatures {
        SignatureFeatures {
            timing_cv: 0.5 + (n as f64) * 0.05,
            request_rate: 2.0 + (n as f64),
            path_diversity: 0.8,
            path_entropy: 0.9,
            avg_bot_probability: 0.2,
            datacenter: false,
            country: format!("c{}", n),
            asn: format!("asn{}", n),
            ..Default::default()
        }
    }

    #[test]
    fn dense_cluster_forms_one_dominant_community() {
        let engine = ClusterEngine::new(ClusterConfig::default());
        for i in 0..12 {
            engine.update_features(&format!("dense{}", i), dense_signature("us", true));
        }
        for i in 0..8 {
            engine.update_features(&format!("disp{}", i), dispersed_signature(i));
        }
        let snap = engine.recompute();
        let dense_cluster_ids: HashSet<u32> = (0..12)
            .filter_map(|i| snap.membership.get(&format!("dense{}", i)).copied())
            .collect();
        assert_eq!(dense_cluster_ids.len(), 1, "all dense signatures should land in one cluster");
        let cid = *dense_cluster_ids.iter().next().unwrap();
        let entry = snap.clusters.iter().find(|c| c.cluster_id == cid).unwrap();
        assert!(entry.avg_bot_probability > 0.7);
        assert_eq!(entry.member_signature_ids.len(), 12);
    }

    #[test]
    fn deterministic_given_same_input() {
        let build = || {
            let engine = ClusterEngine::new(ClusterConfig::default());
            for i in 0..10 {
                engine.update_features(&format!("s{}", i), dense_signature("us", i % 2 == 0));
            }
            engine.recompute()
        };
        let a = build();
        let b = build();
        assert_eq!(a.membership, b.membership);
    }

    #[test]
    fn adaptive_weights_sum_to_one_and_respect_bounds() {
        let engine = ClusterEngine::new(ClusterConfig::default());
        for i in 0..10 {
            engine.update_features(&format!("s{}", i), dispersed_signature(i));
        }
        let ids: Vec<String> = (0..10).map(|i| format!("s{}", i)).collect();
        let weights = engine.adaptive_weights(&ids);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        for w in weights {
            assert!(w >= 0.02 - 1e-9 && w <= 0.20 + 1e-9);
        }
    }
}
