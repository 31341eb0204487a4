// src/config.rs
//
// Closed configuration option set (spec §6). Loaded once at startup from
// TOML/JSON/env via `serde`; validated with `validate()` before the
// orchestrator is built. An invalid config produces `ConfigurationError`
// and detection stays disabled (§7) — callers should treat a failed
// `Config::validate()` as "do not build the orchestrator", not as
// something to patch over with defaults.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::blackboard::policy::PolicyRule;
use crate::errors::DetectionError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    pub bot_threshold: f32,
    pub soft_deadline_ms: u64,
    pub hard_deadline_ms: u64,
    pub detectors: HashMap<String, DetectorConfig>,
    pub reputation: ReputationConfig,
    pub markov: MarkovConfig,
    pub cluster: ClusterConfig,
    pub aggregator: AggregatorConfig,
    pub policies: Vec<PolicyRule>,
    pub learning: LearningConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_threshold: 0.7,
            soft_deadline_ms: 100,
            hard_deadline_ms: 500,
            detectors: HashMap::new(),
            reputation: ReputationConfig::default(),
            markov: MarkovConfig::default(),
            cluster: ClusterConfig::default(),
            aggregator: AggregatorConfig::default(),
            policies: crate::blackboard::policy::default_policies(),
            learning: LearningConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub enabled: bool,
    pub weight_scale: f32,
    pub trigger_timeout_ms: u64,
    pub execution_timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight_scale: 1.0,
            trigger_timeout_ms: 20,
            execution_timeout_ms: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub ua_half_life_hours: f64,
    pub ip_half_life_hours: f64,
    pub support_cap: u32,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            ua_half_life_hours: 6.0,
            ip_half_life_hours: 24.0,
            support_cap: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkovConfig {
    pub signature_half_life_hours: f64,
    pub cohort_half_life_hours: f64,
    pub global_half_life_hours: f64,
    pub max_edges_per_node: usize,
    pub recent_window: usize,
}

impl Default for MarkovConfig {
    fn default() -> Self {
        Self {
            signature_half_life_hours: 1.0,
            cohort_half_life_hours: 6.0,
            global_half_life_hours: 24.0,
            max_edges_per_node: 20,
            recent_window: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub interval_seconds: u64,
    pub resolution: f64,
    pub similarity_threshold: f64,
    pub max_iterations: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            resolution: 1.0,
            similarity_threshold: 0.7,
            max_iterations: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub confidence_scale: f32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { confidence_scale: 3.0 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    DropOldest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), DetectionError> {
        if self.soft_deadline_ms == 0 || self.hard_deadline_ms == 0 {
            return Err(DetectionError::ConfigurationError(
                "deadlines must be non-zero".into(),
            ));
        }
        if self.soft_deadline_ms > self.hard_deadline_ms {
            return Err(DetectionError::ConfigurationError(
                "soft_deadline_ms must be <= hard_deadline_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.bot_threshold) {
            return Err(DetectionError::ConfigurationError(
                "bot_threshold must be in [0,1]".into(),
            ));
        }
        if self.cluster.similarity_threshold < 0.0 || self.cluster.similarity_threshold > 1.0 {
            return Err(DetectionError::ConfigurationError(
                "cluster.similarity_threshold must be in [0,1]".into(),
            ));
        }
        if self.cluster.max_iterations == 0 {
            return Err(DetectionError::ConfigurationError(
                "cluster.max_iterations must be > 0".into(),
            ));
        }
        if self.aggregator.confidence_scale <= 0.0 {
            return Err(DetectionError::ConfigurationError(
                "aggregator.confidence_scale must be > 0".into(),
            ));
        }
        if self.learning.capacity == 0 {
            return Err(DetectionError::ConfigurationError(
                "learning.capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn detector(&self, name: &str) -> DetectorConfig {
        self.detectors.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn soft_deadline_over_hard_rejected() {
        let mut cfg = Config::default();
        cfg.soft_deadline_ms = 1000;
        cfg.hard_deadline_ms = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_threshold_rejected() {
        let mut cfg = Config::default();
        cfg.bot_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }
}
