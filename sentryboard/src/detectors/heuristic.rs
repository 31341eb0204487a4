// src/detectors/heuristic.rs
//
// Final-wave re-weighting pass (§4.4 table row `Heuristic`: "contribution
// only; runs after primary signals; may re-weight"). Grounded in the
// teacher's `workers/pivot.rs`/`workers/hydra.rs` style of boosting a score
// when multiple independently-weak signals co-occur — here, when several
// categories already carry a mild positive lean, that coordination itself
// becomes evidence, since no single detector saw the whole picture.

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::Category;

use super::{contribution, Detector, DetectorContext, DetectorOutput, Trigger};

pub struct HeuristicDetector;

#[async_trait]
impl Detector for HeuristicDetector {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn priority(&self) -> i32 {
        4
    }

    fn trigger_conditions(&self) -> Vec<Trigger> {
        vec![Trigger::DetectorCount(4)]
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let mut weak_positive_categories = std::collections::HashSet::new();
        for c in &ctx.board.contributions {
            if c.confidence_delta > 0.1 && c.confidence_delta < 0.6 {
                weak_positive_categories.insert(c.category);
            }
        }

        let mut out = DetectorOutput::empty();
        if weak_positive_categories.len() < 3 {
            return Ok(out);
        }

        let mut categories: Vec<Category> = weak_positive_categories.into_iter().collect();
        categories.sort_by_key(|c| format!("{:?}", c));
        let boost = (0.15 + 0.05 * categories.len() as f32).min(0.45);

        out = out.with_contribution(contribution(
            self.name(),
            Category::Heuristic,
            boost,
            0.5,
            format!(
                "coordinated_weak_signals_across:{}",
                categories.iter().map(|c| format!("{:?}", c)).collect::<Vec<_>>().join(",")
            ),
            self.priority(),
        ));

        Ok(out)
    }
}
