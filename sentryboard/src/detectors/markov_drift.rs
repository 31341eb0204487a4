// src/detectors/markov_drift.rs
//
// Runs after `Behavioral` (§4.4 table row `Markov/Drift`), reading the
// drift metrics `state/markov.rs` just computed for this request's
// signature. Grounded in the same `workers/sequence_model.rs` lineage as
// `state/markov.rs` itself — this file is the detector-side consumer.

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::{Category, SignalKey, SignalValue};

use super::behavioral::BehavioralDetector;
use super::{contribution, Detector, DetectorContext, DetectorOutput, Trigger};

pub struct MarkovDriftDetector;

#[async_trait]
impl Detector for MarkovDriftDetector {
    fn name(&self) -> &'static str {
        "markov_drift"
    }

    fn priority(&self) -> i32 {
        2
    }

    fn trigger_conditions(&self) -> Vec<Trigger> {
        vec![Trigger::SignalExists(SignalKey::BehaviorRate)]
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let sig_id = BehavioralDetector::derive_signature_id(ctx);
        let drift = ctx.state.markov.drift_signals(&sig_id);

        let mut out = DetectorOutput::empty()
            .with_signal(SignalKey::MarkovSelfDrift, SignalValue::Number(drift.self_drift))
            .with_signal(SignalKey::MarkovHumanDrift, SignalValue::Number(drift.human_drift))
            .with_signal(SignalKey::MarkovLoopScore, SignalValue::Number(drift.loop_score))
            .with_signal(SignalKey::MarkovSequenceSurprise, SignalValue::Number(drift.sequence_surprise))
            .with_signal(SignalKey::MarkovTransitionNovelty, SignalValue::Number(drift.transition_novelty))
            .with_signal(SignalKey::MarkovEntropyDelta, SignalValue::Number(drift.entropy_delta));

        if drift.human_drift > 0.6 {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Behavioral,
                (drift.human_drift as f32 - 0.3).clamp(0.0, 1.0),
                0.5,
                format!("path_sequence_diverges_from_human_baseline:{:.2}", drift.human_drift),
                self.priority(),
            ));
        }

        if drift.loop_score > 0.5 {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Behavioral,
                drift.loop_score as f32 * 0.6,
                0.4,
                format!("repetitive_navigation_loop:{:.2}", drift.loop_score),
                self.priority(),
            ));
        }

        Ok(out)
    }
}
