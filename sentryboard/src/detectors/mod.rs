// src/detectors/mod.rs
//
// Detector interface and trigger evaluation (§4.4). The teacher's workers
// (`workers::run_all`) are a flat `tokio::join!` over every worker on every
// event — no enable flag, no trigger, no priority. Detectors here declare
// when they're eligible to run; the orchestrator (`blackboard/orchestrator.rs`)
// is what actually wave-schedules them.

pub mod behavioral;
pub mod client_side;
pub mod cluster;
pub mod header;
pub mod heuristic;
pub mod honeypot;
pub mod inconsistency;
pub mod ip;
pub mod llm;
pub mod markov_drift;
pub mod reputation;
pub mod tls;
pub mod user_agent;

use std::time::Duration;

use crate::config::Config;
use crate::errors::DetectionError;
use crate::model::{Blackboard, DetectionContribution, SignalKey, SignalValue};
use crate::response_hook::{AnalysisMode, Thoroughness};
use crate::state::SharedState;

/// Closed sum type of trigger conditions, evaluated against the blackboard's
/// current signals (§4.4).
#[derive(Debug, Clone)]
pub enum Trigger {
    SignalExists(SignalKey),
    SignalEquals(SignalKey, SignalValue),
    SignalPredicate(SignalKey, fn(&SignalValue) -> bool),
    AnyOf(Vec<Trigger>),
    AllOf(Vec<Trigger>),
    DetectorCount(usize),
    RiskThreshold(f32),
}

impl Trigger {
    pub fn evaluate(&self, board: &Blackboard) -> bool {
        match self {
            Trigger::SignalExists(key) => board.signal(*key).is_some(),
            Trigger::SignalEquals(key, value) => board.signal(*key) == Some(value),
            Trigger::SignalPredicate(key, pred) => board.signal(*key).map(pred).unwrap_or(false),
            Trigger::AnyOf(ts) => ts.iter().any(|t| t.evaluate(board)),
            Trigger::AllOf(ts) => ts.iter().all(|t| t.evaluate(board)),
            Trigger::DetectorCount(min) => board.completed_detectors.len() >= *min,
            Trigger::RiskThreshold(min_score) => board.current_risk_score >= *min_score,
        }
    }
}

/// Outcome of one detector's run, as reported to the orchestrator. A
/// detector never mutates `signals` itself (§5) — it proposes updates which
/// the orchestrator applies between waves.
pub struct DetectorOutput {
    pub contributions: Vec<DetectionContribution>,
    pub signal_proposals: Vec<(SignalKey, SignalValue)>,
    pub response_analysis: Option<ResponseAnalysisRequest>,
}

/// A detector's request to analyze the response side of this exchange
/// (§4.9). Carried on `DetectorOutput` rather than applied directly, since
/// detectors only ever propose — the orchestrator folds it into the
/// blackboard's single `ResponseAnalysisContext` between waves, same as
/// signals and contributions.
pub struct ResponseAnalysisRequest {
    pub mode: AnalysisMode,
    pub thoroughness: Thoroughness,
    pub priority: i32,
    pub streaming: bool,
    pub trigger_name: &'static str,
    pub trigger_value: String,
}

impl DetectorOutput {
    pub fn empty() -> Self {
        Self {
            contributions: Vec::new(),
            signal_proposals: Vec::new(),
            response_analysis: None,
        }
    }

    pub fn with_contribution(mut self, c: DetectionContribution) -> Self {
        self.contributions.push(c);
        self
    }

    pub fn with_signal(mut self, key: SignalKey, value: SignalValue) -> Self {
        self.signal_proposals.push((key, value));
        self
    }

    pub fn with_response_analysis(mut self, req: ResponseAnalysisRequest) -> Self {
        self.response_analysis = Some(req);
        self
    }
}

/// Read-only view handed to a detector: the current request snapshot, the
/// blackboard as it stood when the wave started, shared cross-request
/// state, and the resolved config (§4.4: "receive a read-mostly snapshot
/// plus a contribution sink").
pub struct DetectorContext<'a> {
    pub request: &'a crate::model::RequestSnapshot,
    pub board: &'a Blackboard,
    pub state: &'a SharedState,
    pub config: &'a Config,
}

#[async_trait::async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower = earlier wave, per the reference catalog in §4.4.
    fn priority(&self) -> i32;

    fn is_enabled(&self, config: &Config) -> bool {
        config
            .detectors
            .get(self.name())
            .map(|d| d.enabled)
            .unwrap_or(true)
    }

    /// Empty list means eligible in the first wave.
    fn trigger_conditions(&self) -> Vec<Trigger> {
        Vec::new()
    }

    fn trigger_timeout(&self, config: &Config) -> Duration {
        config
            .detectors
            .get(self.name())
            .map(|d| Duration::from_millis(d.trigger_timeout_ms))
            .unwrap_or(Duration::from_millis(50))
    }

    fn execution_timeout(&self, config: &Config) -> Duration {
        config
            .detectors
            .get(self.name())
            .map(|d| Duration::from_millis(d.execution_timeout_ms))
            .unwrap_or(Duration::from_millis(30))
    }

    fn is_optional(&self) -> bool {
        false
    }

    /// `Err` means the detector faulted (§4.4 failure semantics); the
    /// orchestrator folds it into `WaveOutcome::Faulted` and the request
    /// falls back to the safe default verdict rather than aborting.
    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError>;
}

/// Convenience constructor shared by every detector for a single-reason
/// contribution, mirroring the teacher's `DetectionSignal { .. }` literal.
pub fn contribution(
    detector_name: &'static str,
    category: crate::model::Category,
    delta: f32,
    weight: f32,
    reason: impl Into<String>,
    priority: i32,
) -> DetectionContribution {
    DetectionContribution {
        detector_name: detector_name.to_string(),
        category,
        confidence_delta: delta,
        weight,
        reason: reason.into(),
        priority,
        bot_type: None,
        bot_name: None,
        whitelisted: false,
    }
}

/// Returns the full, ordered reference catalog (§4.4 table). Order here is
/// the tie-break order within a priority when names would otherwise collide.
pub fn default_registry() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(user_agent::UserAgentDetector),
        Box::new(header::HeaderDetector),
        Box::new(ip::IpDetector),
        Box::new(tls::TlsDetector),
        Box::new(client_side::ClientSideDetector),
        Box::new(honeypot::HoneypotDetector),
        Box::new(behavioral::BehavioralDetector),
        Box::new(markov_drift::MarkovDriftDetector),
        Box::new(cluster::ClusterDetector),
        Box::new(reputation::ReputationDetector),
        Box::new(inconsistency::InconsistencyDetector),
        Box::new(heuristic::HeuristicDetector),
        Box::new(llm::LlmDetector),
    ]
}
