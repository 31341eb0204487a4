// src/model.rs
//
// Core data model shared across the orchestrator: the per-request
// blackboard, contributions, the aggregated verdict, and the cross-request
// entities (reputation, signature behavior, cluster) that outlive any one
// request.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::response_hook::ResponseAnalysisContext;

/// Per-request allocations are bounded by a small fixed ceiling (§5).
pub const MAX_SIGNALS: usize = 64;
pub const MAX_CONTRIBUTIONS: usize = 32;

// ── Request snapshot (ingress, §6) ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    pub query: String,
    /// Multimap semantics: order and duplicate keys both matter to the
    /// Header detector, so this is a `Vec` of pairs, not a `HashMap`.
    pub headers: Vec<(String, String)>,
    pub remote_ip: String,
    pub user_agent: String,
    pub tls_ja3: Option<String>,
    pub tls_ja3s: Option<String>,
    pub cookies: HashMap<String, String>,
    /// Length-capped; consulted only by honeypot / security-tool detectors.
    pub body_excerpt: String,
    pub referer: Option<String>,
    pub client_fingerprint: Option<String>,
}

impl RequestSnapshot {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ── Blackboard signal registry (§3) ───────────────────────────────────────
//
// Keys are a finite enum, never a free-form string, so a detector cannot
// accidentally leak a PII-bearing key into the shared blackboard.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKey {
    UaIsBot,
    UaIsKnownBot,
    UaBotName,
    UaHeadless,
    HdrMissingAccept,
    HdrSuspiciousOrder,
    IpIsDatacenter,
    IpAsn,
    IpCountry,
    IpIsTor,
    TlsJa3Hash,
    TlsClientClass,
    ClientAvailable,
    ClientConsistent,
    BehaviorRate,
    BehaviorPathEntropy,
    BehaviorTimingCv,
    MarkovSelfDrift,
    MarkovHumanDrift,
    MarkovLoopScore,
    MarkovSequenceSurprise,
    MarkovTransitionNovelty,
    MarkovEntropyDelta,
    ClusterId,
    ClusterAvgBotProb,
    RepUaScore,
    RepIpScore,
    InconsistencyScore,
    InconsistencyReasons,
    HoneypotHit,
    SecTool,
    SystemRequestId,
    SystemElapsedMs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Tagged { tag: String, value: serde_json::Value },
}

impl SignalValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SignalValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            SignalValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SignalValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

// ── Contributions (§3) ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    UserAgent,
    Header,
    Ip,
    Behavioral,
    Fingerprint,
    Cluster,
    Reputation,
    Heuristic,
    Ml,
    Inconsistency,
    Honeypot,
    SecurityTool,
}

pub const ALL_CATEGORIES: &[Category] = &[
    Category::UserAgent,
    Category::Header,
    Category::Ip,
    Category::Behavioral,
    Category::Fingerprint,
    Category::Cluster,
    Category::Reputation,
    Category::Heuristic,
    Category::Ml,
    Category::Inconsistency,
    Category::Honeypot,
    Category::SecurityTool,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotType {
    VerifiedBot,
    MaliciousBot,
    Scraper,
    Crawler,
    Automation,
    Unknown,
}

/// A single detector's signed, weighted evidence. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionContribution {
    pub detector_name: String,
    pub category: Category,
    /// Signed: negative = human-like, positive = bot-like. In [-1, 1].
    pub confidence_delta: f32,
    pub weight: f32,
    pub reason: String,
    /// Tie-breaker; lower = earlier wave / higher priority.
    pub priority: i32,
    pub bot_type: Option<BotType>,
    pub bot_name: Option<String>,
    pub whitelisted: bool,
}

impl DetectionContribution {
    pub fn clamp_delta(mut self) -> Self {
        self.confidence_delta = self.confidence_delta.clamp(-1.0, 1.0);
        self.weight = self.weight.max(0.0);
        self
    }
}

// ── Aggregated evidence (§4.6) ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    VeryLow,
    Low,
    Elevated,
    Medium,
    High,
    VeryHigh,
    Unknown,
}

impl RiskBand {
    /// Fixed thresholds from §4.6 step 4.
    pub fn from_probability(p: f32) -> RiskBand {
        if p < 0.1 {
            RiskBand::VeryLow
        } else if p < 0.3 {
            RiskBand::Low
        } else if p < 0.5 {
            RiskBand::Elevated
        } else if p < 0.7 {
            RiskBand::Medium
        } else if p < 0.9 {
            RiskBand::High
        } else {
            RiskBand::VeryHigh
        }
    }

    /// Severity rank for threshold predicates (`RiskBandAtLeast`). `Unknown`
    /// ranks below `VeryLow` — it means no evidence was gathered at all, the
    /// fail-open default, and must never satisfy an "at least" check that a
    /// derived variant-declaration-order `Ord` would otherwise place above
    /// `VeryHigh`.
    pub fn severity(self) -> u8 {
        match self {
            RiskBand::Unknown => 0,
            RiskBand::VeryLow => 1,
            RiskBand::Low => 2,
            RiskBand::Elevated => 3,
            RiskBand::Medium => 4,
            RiskBand::High => 5,
            RiskBand::VeryHigh => 6,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub score: f32,
    pub total_weight: f32,
    pub contribution_count: u32,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedEvidence {
    pub bot_probability: f32,
    pub confidence: f32,
    pub risk_band: RiskBand,
    pub category_breakdown: HashMap<Category, CategoryBreakdown>,
    pub contributing_detectors: HashSet<String>,
    pub primary_bot_name: Option<String>,
    pub primary_bot_type: Option<BotType>,
    pub ledger: Vec<DetectionContribution>,
}

// ── Blackboard (§3, §5) ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DetectorRunOrder {
    pub priority: i32,
    pub name_rank: u32,
}

pub struct Blackboard {
    pub request_id: String,
    pub started_at: Instant,
    pub signals: HashMap<SignalKey, SignalValue>,
    pub contributions: Vec<DetectionContribution>,
    pub completed_detectors: HashSet<String>,
    pub failed_detectors: HashSet<String>,
    pub skipped_detectors: HashSet<String>,
    pub current_risk_score: f32,
    /// Accumulates response-analysis requests from detectors across waves
    /// (§4.9); upgrade-only, folded in by the orchestrator as each wave
    /// completes.
    pub response_analysis: ResponseAnalysisContext,
}

impl Blackboard {
    pub fn new(request_id: String) -> Self {
        let mut signals = HashMap::new();
        signals.insert(
            SignalKey::SystemRequestId,
            SignalValue::Text(request_id.clone()),
        );
        Self {
            request_id,
            started_at: Instant::now(),
            signals,
            contributions: Vec::new(),
            completed_detectors: HashSet::new(),
            failed_detectors: HashSet::new(),
            skipped_detectors: HashSet::new(),
            current_risk_score: 0.0,
            response_analysis: ResponseAnalysisContext::default(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn signal(&self, key: SignalKey) -> Option<&SignalValue> {
        self.signals.get(&key)
    }

    /// Applies a detector's proposed signal updates. Detectors never mutate
    /// `signals` directly (§5) — they return proposals which the
    /// orchestrator applies here, honoring the resource ceiling.
    pub fn apply_signals(&mut self, proposals: Vec<(SignalKey, SignalValue)>) {
        for (k, v) in proposals {
            if self.signals.len() >= MAX_SIGNALS && !self.signals.contains_key(&k) {
                tracing::warn!(request_id = %self.request_id, "signal ceiling reached, dropping write");
                continue;
            }
            self.signals.insert(k, v);
        }
    }

    /// Appends contributions in the order the detector emitted them, then
    /// recomputes the running risk score as a weighted category mean.
    pub fn apply_contributions(&mut self, mut new_contribs: Vec<DetectionContribution>) {
        for c in new_contribs.drain(..) {
            if self.contributions.len() >= MAX_CONTRIBUTIONS {
                tracing::warn!(request_id = %self.request_id, "contribution ceiling reached, dropping write");
                break;
            }
            self.contributions.push(c.clamp_delta());
        }
        self.current_risk_score = crate::blackboard::aggregator::running_probability(&self.contributions);
    }
}

// ── Cross-request entities (§3) ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    UserAgent,
    IpPrefix,
    Asn,
    TlsFingerprint,
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationState {
    New,
    Suspect,
    Confirmed,
    Whitelisted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternReputation {
    pub pattern_id: String,
    pub pattern_type: PatternType,
    pub bot_score: f64,
    pub support: f64,
    pub state: ReputationState,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftSignals {
    pub self_drift: f64,
    pub human_drift: f64,
    pub loop_score: f64,
    pub sequence_surprise: f64,
    pub transition_novelty: f64,
    pub entropy_delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureBehaviorSummary {
    pub signature_id: String,
    pub request_rate: f64,
    pub path_diversity: f64,
    pub path_entropy: f64,
    pub timing_cv: f64,
    pub drift_signals: DriftSignals,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshotEntry {
    pub cluster_id: u32,
    pub member_signature_ids: Vec<String>,
    pub centroid_feature_vector: Vec<f64>,
    pub avg_bot_probability: f64,
    pub cohort_name: String,
    pub created_at: DateTime<Utc>,
    pub last_refreshed: DateTime<Utc>,
}

// ── Learning events (§4.8) ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearningEvent {
    HighConfidenceDetection {
        request_id: String,
        pattern_id: String,
        pattern_type: PatternType,
        bot_signal: f32,
        confidence: f32,
    },
    FullDetection {
        request_id: String,
        evidence_summary: String,
        bot_probability: f32,
    },
    PatternDiscovered {
        pattern_id: String,
        pattern_type: PatternType,
    },
    InconsistencyDetected {
        request_id: String,
        reasons: Vec<String>,
    },
    FastPathDriftDetected {
        signature_id: String,
        self_drift: f64,
    },
    SignatureFeedback {
        signature_id: String,
        path_class: String,
        timestamp: DateTime<Utc>,
    },
    UserFeedback {
        request_id: String,
        label: bool,
    },
}
