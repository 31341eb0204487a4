// src/detectors/reputation.rs
//
// Time-decayed reputation lookup (§4.4 table row `Reputation`), grounded in
// `state/reputation.rs` — this file is the request-path consumer, reading
// scores the learning-event consumer (§4.8) keeps updated asynchronously.

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::{Category, SignalKey, SignalValue};
use crate::state::normalize::{hash_pattern_id, normalize_ip, normalize_ua};

use super::{contribution, Detector, DetectorContext, DetectorOutput};

const HASH_KEY: &[u8] = b"sentryboard-pattern-key";

pub struct ReputationDetector;

#[async_trait]
impl Detector for ReputationDetector {
    fn name(&self) -> &'static str {
        "reputation"
    }

    fn priority(&self) -> i32 {
        3
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let ua_id = hash_pattern_id(&normalize_ua(&ctx.request.user_agent), HASH_KEY);
        let ip_id = hash_pattern_id(&normalize_ip(&ctx.request.remote_ip), HASH_KEY);

        let mut out = DetectorOutput::empty();

        if let Some(rep) = ctx.state.reputation.get(&ua_id) {
            out = out.with_signal(SignalKey::RepUaScore, SignalValue::Number(rep.bot_score));
            if rep.bot_score > 0.65 {
                out = out.with_contribution(contribution(
                    self.name(),
                    Category::Reputation,
                    ((rep.bot_score - 0.5) * 2.0) as f32,
                    (rep.support / 10.0).min(1.0) as f32,
                    format!("ua_reputation:{:?}:{:.2}", rep.state, rep.bot_score),
                    self.priority(),
                ));
            }
        }

        if let Some(rep) = ctx.state.reputation.get(&ip_id) {
            out = out.with_signal(SignalKey::RepIpScore, SignalValue::Number(rep.bot_score));
            if rep.bot_score > 0.65 {
                out = out.with_contribution(contribution(
                    self.name(),
                    Category::Reputation,
                    ((rep.bot_score - 0.5) * 2.0) as f32,
                    (rep.support / 10.0).min(1.0) as f32,
                    format!("ip_reputation:{:?}:{:.2}", rep.state, rep.bot_score),
                    self.priority(),
                ));
            }
        }

        Ok(out)
    }
}
