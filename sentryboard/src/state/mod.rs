// src/state/mod.rs
//
// Cross-request state bundle (§4.1-§4.3): reputation, Markov drift and
// cluster membership, each owned by its own singleton and shared behind an
// `Arc`, mirroring the teacher's single `StateStore` that bundled window
// counters, cluster unionfind and topic Markov chains behind one `Arc` in
// `main.rs`.

pub mod behavior;
pub mod cluster;
pub mod markov;
pub mod normalize;
pub mod reputation;

use std::sync::Arc;

use crate::config::Config;

pub use behavior::BehaviorTracker;
pub use cluster::{ClusterEngine, ClusterSnapshot, SignatureFeatures};
pub use markov::MarkovTracker;
pub use reputation::ReputationStore;

/// Shared, `Arc`-wrapped cross-request state handed to every detector and
/// to the learning-event consumer. Cheap to clone (clones the `Arc`s).
#[derive(Clone)]
pub struct SharedState {
    pub reputation: Arc<ReputationStore>,
    pub markov: Arc<MarkovTracker>,
    pub cluster: Arc<ClusterEngine>,
    pub behavior: Arc<BehaviorTracker>,
}

impl SharedState {
    pub fn new(config: &Config) -> Self {
        Self {
            reputation: Arc::new(ReputationStore::new(config.reputation.clone())),
            markov: Arc::new(MarkovTracker::new(config.markov.clone())),
            cluster: Arc::new(ClusterEngine::new(config.cluster.clone())),
            behavior: Arc::new(BehaviorTracker::new()),
        }
    }
}
