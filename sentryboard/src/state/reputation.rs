// src/state/reputation.rs
//
// Time-decayed per-pattern reputation store (§4.1). Sharded concurrent map
// in the teacher's idiom (`state/window.rs`'s `DashMap<String, ...>` —
// `DashMap` already gives the per-bucket read-write lock sharding §5 asks
// for, so no extra lock wrapper is needed per entry).

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::config::ReputationConfig;
use crate::model::{PatternReputation, PatternType, ReputationState};

pub struct ReputationStore {
    table: DashMap<String, PatternReputation>,
    config: ReputationConfig,
}

impl ReputationStore {
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            table: DashMap::new(),
            config,
        }
    }

    fn half_life_hours(&self, pattern_type: PatternType) -> f64 {
        match pattern_type {
            PatternType::UserAgent => self.config.ua_half_life_hours,
            PatternType::IpPrefix | PatternType::Asn => self.config.ip_half_life_hours,
            PatternType::TlsFingerprint | PatternType::Composite => {
                // No dedicated half-life in the closed config; split the
                // difference between the two named tiers.
                (self.config.ua_half_life_hours + self.config.ip_half_life_hours) / 2.0
            }
        }
    }

    /// Exponential decay of `(score - 0.5)` toward 0 with the configured
    /// half-life; support decays by a much slower factor (10x the score
    /// half-life) so active patterns keep their confidence.
    fn apply_time_decay(&self, rep: &mut PatternReputation, now: DateTime<Utc>) {
        let elapsed_hours = (now - rep.last_seen).num_milliseconds() as f64 / 3_600_000.0;
        if elapsed_hours <= 0.0 {
            return;
        }
        let half_life = self.half_life_hours(rep.pattern_type).max(1e-6);
        let decay = 0.5f64.powf(elapsed_hours / half_life);
        rep.bot_score = 0.5 + (rep.bot_score - 0.5) * decay;

        let support_half_life = half_life * 10.0;
        let support_decay = 0.5f64.powf(elapsed_hours / support_half_life);
        rep.support = (rep.support * support_decay).max(0.0);
    }

    fn promote(&self, rep: &mut PatternReputation) {
        // Whitelisted is sticky once earned by sustained low scores, but
        // sustained contrary evidence (score climbing back up) demotes it —
        // recomputed fresh from current score/support every call, so
        // demotion falls out naturally.
        rep.state = if rep.bot_score >= 0.85 && rep.support >= 10.0 {
            ReputationState::Confirmed
        } else if rep.bot_score >= 0.65 {
            ReputationState::Suspect
        } else if rep.bot_score < 0.2 && rep.support >= 20.0 {
            ReputationState::Whitelisted
        } else {
            ReputationState::New
        };
    }

    /// `bot_signal` in [-1, +1]; rescaled internally to the [0,1] "observed"
    /// space the blend formula in §4.1 works in. `evidence_weight` is the
    /// weight of this single observation (defaults to 1.0 per call site).
    pub fn apply_evidence(
        &self,
        pattern_id: &str,
        pattern_type: PatternType,
        bot_signal: f64,
        evidence_weight: f64,
    ) -> PatternReputation {
        let now = Utc::now();
        let observed = ((bot_signal.clamp(-1.0, 1.0)) + 1.0) / 2.0;

        let mut entry = self.table.entry(pattern_id.to_string()).or_insert_with(|| PatternReputation {
            pattern_id: pattern_id.to_string(),
            pattern_type,
            bot_score: 0.5,
            support: 0.0,
            state: ReputationState::New,
            first_seen: now,
            last_seen: now,
        });

        if entry.support > 0.0 {
            self.apply_time_decay(entry.value_mut(), now);
        }

        let support_cap = self.config.support_cap as f64;
        let new_support = (entry.support + evidence_weight).min(support_cap);
        entry.bot_score = (entry.bot_score * entry.support + evidence_weight * observed)
            / (entry.support + evidence_weight).max(1e-9);
        entry.support = new_support.max(1.0);
        entry.last_seen = now;
        self.promote(entry.value_mut());
        entry.value().clone()
    }

    /// Returns the current decayed view, persisting the decay (§4.1: "lazily
    /// on read").
    pub fn get(&self, pattern_id: &str) -> Option<PatternReputation> {
        let mut entry = self.table.get_mut(pattern_id)?;
        let now = Utc::now();
        self.apply_time_decay(entry.value_mut(), now);
        self.promote(entry.value_mut());
        Some(entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ReputationStore {
        ReputationStore::new(ReputationConfig::default())
    }

    #[test]
    fn absent_pattern_inserts_neutral() {
        let s = store();
        let rep = s.apply_evidence("p1", PatternType::UserAgent, 1.0, 1.0);
        assert!(rep.support >= 1.0);
        assert!(rep.bot_score > 0.5);
    }

    #[test]
    fn decay_at_zero_elapsed_is_identity() {
        let s = store();
        let before = s.apply_evidence("p2", PatternType::UserAgent, 1.0, 1.0);
        let mut r = before.clone();
        s.apply_time_decay(&mut r, before.last_seen);
        assert!((r.bot_score - before.bot_score).abs() < 1e-12);
        assert!((r.support - before.support).abs() < 1e-9);
    }

    #[test]
    fn reputation_promotion_sequence() {
        let s = store();
        let mut last = None;
        for _ in 0..20 {
            last = Some(s.apply_evidence("p3", PatternType::UserAgent, 1.0, 1.0));
        }
        let r = last.unwrap();
        assert_eq!(r.state, ReputationState::Confirmed);
        assert!(r.bot_score >= 0.85);
    }

    #[test]
    fn support_cap_enforced() {
        let mut cfg = ReputationConfig::default();
        cfg.support_cap = 5;
        let s = ReputationStore::new(cfg);
        let mut last = None;
        for _ in 0..50 {
            last = Some(s.apply_evidence("p4", PatternType::UserAgent, 1.0, 1.0));
        }
        assert!(last.unwrap().support <= 5.0);
    }
}
