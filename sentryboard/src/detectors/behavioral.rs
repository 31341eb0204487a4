// src/detectors/behavioral.rs
//
// Per-signature rolling-window behavioral analysis, grounded in the
// teacher's `workers/velocity.rs` (rate/timing-CV scoring, §4.4 table row
// `Behavioral`). Reads the signature id the `UserAgent`/`IP`/`TLS` detectors
// implicitly establish, records this request into the behavior tracker and
// Markov tracker, and scores rate + timing regularity + path diversity the
// same way the teacher scores request-per-hour + interarrival CV.

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::{Category, SignalKey, SignalValue};
use crate::state::normalize::{normalize_ip, normalize_ua, path_class, signature_id};

use super::{contribution, Detector, DetectorContext, DetectorOutput};

pub struct BehavioralDetector;

impl BehavioralDetector {
    /// Derives the stable per-request signature id the way `markov_drift`
    /// and `cluster` also do, from normalized IP prefix + UA class.
    pub fn derive_signature_id(ctx: &DetectorContext<'_>) -> String {
        let ip_prefix = normalize_ip(&ctx.request.remote_ip);
        let ua_class = normalize_ua(&ctx.request.user_agent);
        signature_id(&ip_prefix, &ua_class, ctx.request.tls_ja3.as_deref(), b"sentryboard-signature-key")
    }
}

#[async_trait]
impl Detector for BehavioralDetector {
    fn name(&self) -> &'static str {
        "behavioral"
    }

    fn priority(&self) -> i32 {
        2
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let sig_id = Self::derive_signature_id(ctx);
        let class = path_class(&crate::state::normalize::normalize_path(&ctx.request.path));

        ctx.state.behavior.record(&sig_id, &class, chrono::Utc::now());
        ctx.state.markov.record_transition(&sig_id, "_entry", &class, chrono::Utc::now());

        let snapshot = ctx.state.behavior.snapshot(&sig_id);

        let mut out = DetectorOutput::empty()
            .with_signal(SignalKey::BehaviorRate, SignalValue::Number(snapshot.request_rate))
            .with_signal(SignalKey::BehaviorPathEntropy, SignalValue::Number(snapshot.path_entropy))
            .with_signal(SignalKey::BehaviorTimingCv, SignalValue::Number(snapshot.timing_cv));

        if snapshot.request_rate > 200.0 {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Behavioral,
                0.5,
                0.7,
                format!("extreme_velocity:{:.0}rph", snapshot.request_rate),
                self.priority(),
            ));
        } else if snapshot.request_rate > 60.0 {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Behavioral,
                0.3,
                0.5,
                format!("high_velocity:{:.0}rph", snapshot.request_rate),
                self.priority(),
            ));
        }

        // `timing_cv` defaults to 0.0 when there isn't enough history yet
        // (fewer than two timestamps); guard on `request_rate` so a brand
        // new signature doesn't read as maximally scripted.
        if snapshot.request_rate > 0.0 && snapshot.timing_cv < 0.3 {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Behavioral,
                0.35,
                0.6,
                format!("scripted_timing:{:.2}", snapshot.timing_cv),
                self.priority(),
            ));
        }

        if snapshot.path_diversity < 0.15 && snapshot.request_rate > 10.0 {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Behavioral,
                0.25,
                0.4,
                format!("low_path_diversity:{:.2}", snapshot.path_diversity),
                self.priority(),
            ));
        }

        Ok(out)
    }
}
