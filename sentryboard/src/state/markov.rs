// src/state/markov.rs
//
// Per-signature, time-decayed transition matrix over normalized path classes
// (§4.2). Grounded in the teacher's `workers/sequence_model.rs::MarkovChain`
// (marginal + transition arrays over a fixed topic set, Shannon-entropy
// scoring) but generalized from 12 fixed topic buckets to an open,
// LRU-bounded per-signature edge table, and extended with the
// Jensen-Shannon-divergence drift metrics the teacher never computes.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::config::MarkovConfig;
use crate::model::DriftSignals;

#[derive(Debug, Clone)]
struct RecentTransition {
    from: String,
    to: String,
    was_novel: bool,
}

/// Mutable per-signature state. Guarded by a single `parking_lot::RwLock`
/// per signature (§5: "per-signature lock on matrix mutation").
struct SignatureMarkov {
    /// from -> (to -> decayed weight). Bounded to `max_edges_per_node`
    /// outgoing edges per `from`.
    edges: HashMap<String, HashMap<String, f64>>,
    /// Decayed visit counts per path class, used for drift/entropy.
    marginal: HashMap<String, f64>,
    recent: VecDeque<RecentTransition>,
    last_update: DateTime<Utc>,
    /// A snapshot of `marginal` (normalized) taken roughly every 10 minutes,
    /// used as the "10-minute-old distribution" baseline for `self_drift`.
    snapshot: Option<(DateTime<Utc>, HashMap<String, f64>, f64)>, // (taken_at, dist, entropy)
}

impl SignatureMarkov {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            edges: HashMap::new(),
            marginal: HashMap::new(),
            recent: VecDeque::new(),
            last_update: now,
            snapshot: None,
        }
    }

    fn decay(&mut self, now: DateTime<Utc>, half_life_hours: f64) {
        let elapsed_hours = (now - self.last_update).num_milliseconds() as f64 / 3_600_000.0;
        if elapsed_hours <= 0.0 {
            return;
        }
        let factor = 0.5f64.powf(elapsed_hours / half_life_hours.max(1e-6));
        for targets in self.edges.values_mut() {
            for w in targets.values_mut() {
                *w *= factor;
            }
        }
        for v in self.marginal.values_mut() {
            *v *= factor;
        }
        self.last_update = now;
    }

    fn normalized_marginal(&self) -> HashMap<String, f64> {
        normalize_dist(&self.marginal)
    }
}

fn normalize_dist(counts: &HashMap<String, f64>) -> HashMap<String, f64> {
    let total: f64 = counts.values().sum();
    if total <= 0.0 {
        return HashMap::new();
    }
    counts.iter().map(|(k, v)| (k.clone(), v / total)).collect()
}

/// Shannon entropy in bits.
fn shannon_entropy(dist: &HashMap<String, f64>) -> f64 {
    dist.values()
        .filter(|p| **p > 0.0)
        .map(|p| -p * p.log2())
        .sum()
}

/// Jensen-Shannon divergence in bits, over the union of keys. Returns 0 for
/// two empty distributions (no evidence, no divergence).
fn jsd(p: &HashMap<String, f64>, q: &HashMap<String, f64>) -> f64 {
    if p.is_empty() && q.is_empty() {
        return 0.0;
    }
    let keys: std::collections::HashSet<&String> = p.keys().chain(q.keys()).collect();
    let mut m: HashMap<String, f64> = HashMap::new();
    for k in &keys {
        let pv = p.get(*k).copied().unwrap_or(0.0);
        let qv = q.get(*k).copied().unwrap_or(0.0);
        m.insert((*k).clone(), (pv + qv) / 2.0);
    }
    fn kl(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
        a.iter()
            .filter(|(_, v)| **v > 0.0)
            .map(|(k, v)| {
                let bv = b.get(k).copied().unwrap_or(0.0);
                if bv <= 0.0 {
                    0.0
                } else {
                    v * (v / bv).log2()
                }
            })
            .sum()
    }
    let d = 0.5 * kl(p, &m) + 0.5 * kl(q, &m);
    // JSD in bits is bounded in [0, 1]; clamp away tiny float overshoot.
    d.clamp(0.0, 1.0)
}

pub struct MarkovTracker {
    signatures: DashMap<String, RwLock<SignatureMarkov>>,
    /// Process-wide approximation of the "known-human" baseline: the
    /// aggregate marginal distribution across all signatures, decayed at
    /// the global half-life. A labeled human corpus isn't available here
    /// (out of scope per §1), so the population itself — mostly human
    /// traffic in steady state — stands in as the reference distribution.
    global_human: RwLock<(HashMap<String, f64>, DateTime<Utc>)>,
    config: MarkovConfig,
}

impl MarkovTracker {
    pub fn new(config: MarkovConfig) -> Self {
        Self {
            signatures: DashMap::new(),
            global_human: RwLock::new((HashMap::new(), Utc::now())),
            config,
        }
    }

    fn decay_global(&self, now: DateTime<Utc>) {
        let mut g = self.global_human.write();
        let elapsed_hours = (now - g.1).num_milliseconds() as f64 / 3_600_000.0;
        if elapsed_hours <= 0.0 {
            return;
        }
        let factor = 0.5f64.powf(elapsed_hours / self.config.global_half_life_hours.max(1e-6));
        for v in g.0.values_mut() {
            *v *= factor;
        }
        g.1 = now;
    }

    pub fn record_transition(&self, signature_id: &str, from_class: &str, to_class: &str, timestamp: DateTime<Utc>) {
        let lock = self
            .signatures
            .entry(signature_id.to_string())
            .or_insert_with(|| RwLock::new(SignatureMarkov::new(timestamp)));
        let mut sig = lock.write();
        sig.decay(timestamp, self.config.signature_half_life_hours);

        let targets = sig.edges.entry(from_class.to_string()).or_default();
        let was_novel = !targets.contains_key(to_class) || targets.get(to_class).copied().unwrap_or(0.0) <= 0.0;
        *targets.entry(to_class.to_string()).or_insert(0.0) += 1.0;

        if targets.len() > self.config.max_edges_per_node {
            if let Some((min_key, _)) = targets
                .iter()
                .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(k, v)| (k.clone(), *v))
            {
                targets.remove(&min_key);
            }
        }

        *sig.marginal.entry(to_class.to_string()).or_insert(0.0) += 1.0;

        sig.recent.push_back(RecentTransition {
            from: from_class.to_string(),
            to: to_class.to_string(),
            was_novel,
        });
        while sig.recent.len() > self.config.recent_window {
            sig.recent.pop_front();
        }

        let needs_snapshot = match &sig.snapshot {
            None => true,
            Some((taken_at, _, _)) => (timestamp - *taken_at).num_minutes() >= 10,
        };
        if needs_snapshot {
            let dist = sig.normalized_marginal();
            let entropy = shannon_entropy(&dist);
            sig.snapshot = Some((timestamp, dist, entropy));
        }

        drop(sig);

        self.decay_global(timestamp);
        let mut g = self.global_human.write();
        *g.0.entry(to_class.to_string()).or_insert(0.0) += 1.0;
    }

    /// Drift metrics per §4.2. All ranges match invariant 5 in §8.
    pub fn drift_signals(&self, signature_id: &str) -> DriftSignals {
        let Some(lock) = self.signatures.get(signature_id) else {
            return DriftSignals::default();
        };
        let sig = lock.read();
        let current = sig.normalized_marginal();
        let current_entropy = shannon_entropy(&current);

        let (self_drift, entropy_delta) = match &sig.snapshot {
            Some((_, prev_dist, prev_entropy)) => (jsd(prev_dist, &current), current_entropy - prev_entropy),
            None => (0.0, 0.0),
        };

        let human_dist = self.global_human.read().0.clone();
        let human_dist = normalize_dist(&human_dist);
        let human_drift = jsd(&current, &human_dist);

        let k = sig.recent.len().max(1) as f64;
        let mut loop_hits = 0usize;
        let recent: Vec<&RecentTransition> = sig.recent.iter().collect();
        for window in recent.windows(2) {
            // A -> B -> A cycles: window[i].from == window[i+1].to
            if window[0].from == window[1].to {
                loop_hits += 1;
            }
        }
        let loop_score = (loop_hits as f64 / k).clamp(0.0, 1.0);

        let novel_hits = sig.recent.iter().filter(|t| t.was_novel).count();
        let transition_novelty = (novel_hits as f64 / k).clamp(0.0, 1.0);

        let vocab = sig.marginal.len().max(1) as f64;
        let alpha = 1.0;
        let mut surprise_sum = 0.0;
        for t in &sig.recent {
            let targets = sig.edges.get(&t.from);
            let (num, denom) = match targets {
                Some(tg) => {
                    let total: f64 = tg.values().sum();
                    (tg.get(&t.to).copied().unwrap_or(0.0) + alpha, total + alpha * vocab)
                }
                None => (alpha, alpha * vocab),
            };
            let p = (num / denom).clamp(1e-9, 1.0);
            surprise_sum += -p.log2();
        }
        let sequence_surprise = surprise_sum / k;

        DriftSignals {
            self_drift,
            human_drift,
            loop_score,
            sequence_surprise,
            transition_novelty,
            entropy_delta,
        }
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_ranges_hold() {
        let tracker = MarkovTracker::new(MarkovConfig::default());
        let t0 = Utc::now();
        let classes = ["home", "list", "detail", "list", "detail", "home"];
        for (i, w) in classes.windows(2).enumerate() {
            tracker.record_transition("sig1", w[0], w[1], t0 + chrono::Duration::seconds(i as i64));
        }
        let d = tracker.drift_signals("sig1");
        assert!((0.0..=1.0).contains(&d.self_drift));
        assert!((0.0..=1.0).contains(&d.human_drift));
        assert!((0.0..=1.0).contains(&d.loop_score));
        assert!((0.0..=1.0).contains(&d.transition_novelty));
        assert!(d.sequence_surprise >= 0.0);
    }

    #[test]
    fn unknown_signature_returns_default() {
        let tracker = MarkovTracker::new(MarkovConfig::default());
        let d = tracker.drift_signals("ghost");
        assert_eq!(d.self_drift, 0.0);
    }

    #[test]
    fn max_edges_per_node_enforced() {
        let mut cfg = MarkovConfig::default();
        cfg.max_edges_per_node = 3;
        let tracker = MarkovTracker::new(cfg);
        let t0 = Utc::now();
        for i in 0..10 {
            let to = format!("class{}", i);
            tracker.record_transition("sig2", "root", &to, t0 + chrono::Duration::seconds(i));
        }
        let lock = tracker.signatures.get("sig2").unwrap();
        let sig = lock.read();
        assert!(sig.edges.get("root").unwrap().len() <= 3);
    }

    #[test]
    fn jsd_identical_distributions_is_zero() {
        let mut p = HashMap::new();
        p.insert("a".to_string(), 0.5);
        p.insert("b".to_string(), 0.5);
        assert!(jsd(&p, &p) < 1e-9);
    }
}
