// src/detectors/inconsistency.rs
//
// Cross-signal correlation (§4.4 table row `Inconsistency`), grounded in the
// teacher's `workers/h2_grpc.rs` "impossible combination" checks (browser
// JA3 paired with script-only JA3S) and `workers/role_preamble.rs`'s
// cross-factor scoring style — generalized from one specific TLS/H2
// mismatch into a small rule table over whatever signals already landed on
// the blackboard from earlier waves.

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::{Category, SignalKey, SignalValue};

use super::{contribution, Detector, DetectorContext, DetectorOutput, Trigger};

pub struct InconsistencyDetector;

#[async_trait]
impl Detector for InconsistencyDetector {
    fn name(&self) -> &'static str {
        "inconsistency"
    }

    fn priority(&self) -> i32 {
        3
    }

    fn trigger_conditions(&self) -> Vec<Trigger> {
        vec![Trigger::DetectorCount(2)]
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let mut reasons = Vec::new();
        let mut score = 0.0f32;

        let ua_headless = ctx.board.signal(SignalKey::UaHeadless).and_then(|v| v.as_bool()).unwrap_or(false);
        let tls_class = ctx.board.signal(SignalKey::TlsClientClass).and_then(|v| v.as_text()).map(str::to_string);
        let client_consistent = ctx.board.signal(SignalKey::ClientConsistent).and_then(|v| v.as_bool());
        let ip_datacenter = ctx.board.signal(SignalKey::IpIsDatacenter).and_then(|v| v.as_bool()).unwrap_or(false);
        let hdr_missing = ctx.board.signal(SignalKey::HdrMissingAccept).and_then(|v| v.as_bool()).unwrap_or(false);
        let rep_ua_score = ctx.board.signal(SignalKey::RepUaScore).and_then(|v| v.as_number());

        if let Some("script") = tls_class.as_deref() {
            if !ua_headless && !hdr_missing {
                score += 0.5;
                reasons.push("tls_script_but_headers_browser_like".to_string());
            }
        }

        if client_consistent == Some(false) {
            score += 0.3;
            reasons.push("client_fingerprint_contradicts_ua".to_string());
        }

        if ip_datacenter && !hdr_missing && tls_class.as_deref() == Some("browser") {
            score -= 0.2;
            reasons.push("datacenter_ip_but_full_browser_signature".to_string());
        }

        if let Some(rep) = rep_ua_score {
            if rep < 0.2 && ip_datacenter {
                score += 0.2;
                reasons.push("clean_ua_reputation_but_datacenter_ip".to_string());
            }
        }

        let mut out = DetectorOutput::empty();
        if reasons.is_empty() {
            return Ok(out);
        }

        out = out
            .with_signal(SignalKey::InconsistencyScore, SignalValue::Number(score as f64))
            .with_signal(SignalKey::InconsistencyReasons, SignalValue::Text(reasons.join(",")))
            .with_contribution(contribution(
                self.name(),
                Category::Inconsistency,
                score.clamp(-1.0, 1.0),
                0.7,
                reasons.join(";"),
                self.priority(),
            ));
        Ok(out)
    }
}
