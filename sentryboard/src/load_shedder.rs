// src/load_shedder.rs
//
// Graceful load shedding (ambient stack — under sustained overload the
// pipeline sheds low-value work rather than building an unbounded queue).
// Priority tiers and watermark structure are the teacher's `load_shedder.rs`
// verbatim; the classification itself is reworked from "account has a
// cluster / has history" to "signature has a cluster / has reputation
// history", computed from the same `SharedState` detectors already read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::RequestSnapshot;
use crate::state::normalize::{hash_pattern_id, normalize_ua};
use crate::state::SharedState;

const LOW_WATER: usize = 4_096;
const MID_WATER: usize = 8_192;
const HIGH_WATER: usize = 12_288;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    P0Critical,
    P1Cluster,
    P2Known,
    P3New,
}

pub struct LoadShedder {
    pub shed_total: AtomicU64,
    pub accepted_p0: AtomicU64,
    pub accepted_p1: AtomicU64,
    pub accepted_p2: AtomicU64,
    pub accepted_p3: AtomicU64,
    state: Arc<SharedState>,
}

impl LoadShedder {
    pub fn new(state: Arc<SharedState>) -> Arc<Self> {
        Arc::new(Self {
            shed_total: AtomicU64::new(0),
            accepted_p0: AtomicU64::new(0),
            accepted_p1: AtomicU64::new(0),
            accepted_p2: AtomicU64::new(0),
            accepted_p3: AtomicU64::new(0),
            state,
        })
    }

    /// Returns true if this request should be fully scored; false if it
    /// should be shed (fast-pathed to a default "unknown" verdict).
    /// `queue_depth` is the current orchestrator work-queue depth.
    pub fn should_process(&self, request: &RequestSnapshot, queue_depth: usize) -> bool {
        let priority = self.classify(request);

        let accept = match priority {
            Priority::P0Critical => true,
            Priority::P1Cluster => queue_depth < HIGH_WATER,
            Priority::P2Known => queue_depth < MID_WATER,
            Priority::P3New => queue_depth < LOW_WATER,
        };

        if accept {
            match priority {
                Priority::P0Critical => self.accepted_p0.fetch_add(1, Ordering::Relaxed),
                Priority::P1Cluster => self.accepted_p1.fetch_add(1, Ordering::Relaxed),
                Priority::P2Known => self.accepted_p2.fetch_add(1, Ordering::Relaxed),
                Priority::P3New => self.accepted_p3.fetch_add(1, Ordering::Relaxed),
            };
        } else {
            self.shed_total.fetch_add(1, Ordering::Relaxed);
        }

        accept
    }

    fn classify(&self, request: &RequestSnapshot) -> Priority {
        let ip_prefix = crate::state::normalize::normalize_ip(&request.remote_ip);
        let ua_class = normalize_ua(&request.user_agent);
        let signature_id = crate::state::normalize::signature_id(
            &ip_prefix,
            &ua_class,
            request.tls_ja3.as_deref(),
            b"sentryboard-signature-key",
        );

        if let Some(cluster_id) = self.state.cluster.cluster_of(&signature_id) {
            let members = self
                .state
                .cluster
                .get_clusters()
                .clusters
                .iter()
                .find(|c| c.cluster_id == cluster_id)
                .map(|c| c.member_signature_ids.len())
                .unwrap_or(0);
            return if members >= 5 { Priority::P0Critical } else { Priority::P1Cluster };
        }

        let pattern_id = hash_pattern_id(&ua_class, b"sentryboard-pattern-key");
        if self.state.reputation.get(&pattern_id).is_some() {
            return Priority::P2Known;
        }

        Priority::P3New
    }

    pub fn stats(&self) -> ShedStats {
        ShedStats {
            shed_total: self.shed_total.load(Ordering::Relaxed),
            accepted_p0: self.accepted_p0.load(Ordering::Relaxed),
            accepted_p1: self.accepted_p1.load(Ordering::Relaxed),
            accepted_p2: self.accepted_p2.load(Ordering::Relaxed),
            accepted_p3: self.accepted_p3.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShedStats {
    pub shed_total: u64,
    pub accepted_p0: u64,
    pub accepted_p1: u64,
    pub accepted_p2: u64,
    pub accepted_p3: u64,
}

impl ShedStats {
    pub fn total_accepted(&self) -> u64 {
        self.accepted_p0 + self.accepted_p1 + self.accepted_p2 + self.accepted_p3
    }

    pub fn shed_rate(&self) -> f64 {
        let total = self.total_accepted() + self.shed_total;
        if total == 0 {
            0.0
        } else {
            self.shed_total as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn snapshot(ua: &str, ip: &str) -> RequestSnapshot {
        RequestSnapshot {
            method: "GET".into(),
            path: "/".into(),
            query: String::new(),
            headers: Vec::new(),
            remote_ip: ip.into(),
            user_agent: ua.into(),
            tls_ja3: None,
            tls_ja3s: None,
            cookies: Default::default(),
            body_excerpt: String::new(),
            referer: None,
            client_fingerprint: None,
        }
    }

    #[test]
    fn new_signature_is_p3_and_sheds_under_low_water() {
        let config = Config::default();
        let state = Arc::new(SharedState::new(&config));
        let shedder = LoadShedder::new(state);

        assert!(!shedder.should_process(&snapshot("curl/8.0", "203.0.113.4"), LOW_WATER + 1));
        assert_eq!(shedder.stats().shed_total, 1);
    }

    #[test]
    fn new_signature_accepted_below_low_water() {
        let config = Config::default();
        let state = Arc::new(SharedState::new(&config));
        let shedder = LoadShedder::new(state);

        assert!(shedder.should_process(&snapshot("curl/8.0", "203.0.113.4"), 10));
    }
}
