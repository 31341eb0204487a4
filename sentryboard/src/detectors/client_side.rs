// src/detectors/client_side.rs
//
// Client-side fingerprint consistency, grounded in the teacher's
// `workers/h2_grpc.rs` SETTINGS-fingerprint-vs-UA consistency check (§4.4
// table row `ClientSide`) — fires only when a fingerprint cookie/header is
// present on the request, same guard style as the teacher's
// `if let Some(settings) = &event.h2_settings`.

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::{Category, SignalKey, SignalValue};

use super::{contribution, Detector, DetectorContext, DetectorOutput};

/// (fingerprint prefix, UA family substrings it's consistent with).
const KNOWN_FINGERPRINTS: &[(&str, &[&str])] = &[
    ("chrome", &["chrome", "edg/"]),
    ("firefox", &["firefox"]),
    ("safari", &["safari"]),
    ("edge", &["edg/"]),
];

pub struct ClientSideDetector;

#[async_trait]
impl Detector for ClientSideDetector {
    fn name(&self) -> &'static str {
        "client_side"
    }

    fn priority(&self) -> i32 {
        1
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let mut out = DetectorOutput::empty();
        let Some(fp) = &ctx.request.client_fingerprint else {
            return Ok(out);
        };

        out = out.with_signal(SignalKey::ClientAvailable, SignalValue::Bool(true));

        let fp_lower = fp.to_lowercase();
        let ua_lower = ctx.request.user_agent.to_lowercase();

        let matched = KNOWN_FINGERPRINTS.iter().find(|(prefix, _)| fp_lower.starts_with(prefix));
        let consistent = match matched {
            Some((_, ua_needles)) => ua_needles.iter().any(|n| ua_lower.contains(n)),
            None => true, // unrecognized fingerprint, nothing to contradict
        };

        out = out.with_signal(SignalKey::ClientConsistent, SignalValue::Bool(consistent));

        if !consistent {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Fingerprint,
                0.6,
                0.8,
                format!("client_fingerprint_mismatch:{}", fp_lower),
                self.priority(),
            ));
        }

        Ok(out)
    }
}
