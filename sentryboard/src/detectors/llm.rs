// src/detectors/llm.rs
//
// Optional external classifier call (§4.4 table row `LLM (optional)`).
// "Any integration is a black-box classifier returning a single
// contribution" (§9 design note) — `LlmClassifier` is the seam a host
// integration implements; the default is a no-op so the detector is a safe
// no-op out of the box. Timeout handling follows the teacher's
// `tokio::time::sleep`/deadline style used throughout `main.rs`.

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::Category;

use super::{contribution, Detector, DetectorContext, DetectorOutput};

/// A single call to an external bot classifier, returning a signed delta in
/// [-1, 1] plus a short rationale. Implementations integrate whatever
/// classifier the host operates; none is bundled here.
#[async_trait]
pub trait LlmClassifier: Send + Sync {
    async fn classify(&self, request: &crate::model::RequestSnapshot) -> Option<(f32, String)>;
}

pub struct NoopClassifier;

#[async_trait]
impl LlmClassifier for NoopClassifier {
    async fn classify(&self, _request: &crate::model::RequestSnapshot) -> Option<(f32, String)> {
        None
    }
}

pub struct LlmDetector;

#[async_trait]
impl Detector for LlmDetector {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn priority(&self) -> i32 {
        4
    }

    fn is_optional(&self) -> bool {
        true
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let classifier = NoopClassifier;
        let budget = self.execution_timeout(ctx.config);

        let result = tokio::time::timeout(budget, classifier.classify(ctx.request)).await;

        let mut out = DetectorOutput::empty();
        match result {
            Ok(Some((delta, reason))) => {
                out = out.with_contribution(contribution(self.name(), Category::Ml, delta, 0.8, reason, self.priority()));
            }
            Ok(None) => {}
            Err(_) => {
                // This is the detector's own internal classifier-call budget,
                // separate from the orchestrator's wave timeout; it degrades
                // to an empty contribution rather than a fault since the
                // detector being optional already covers the failure mode.
                tracing::warn!(detector = self.name(), "llm classifier call timed out");
            }
        }
        Ok(out)
    }
}
