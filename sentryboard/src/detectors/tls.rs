// src/detectors/tls.rs
//
// TLS ClientHello fingerprinting, grounded directly in the teacher's
// `workers/fingerprint.rs` `SCRIPT_JA3`/`BROWSER_JA3` tables (§4.4 table row
// `TLS/JA3`) — only fires when a fingerprint is actually present on the
// connection, matching the teacher's `if let Some(ref ja3) = event.ja3_hash`
// guard.

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::{Category, SignalKey, SignalValue};

use super::{contribution, Detector, DetectorContext, DetectorOutput};

const SCRIPT_JA3: &[&str] = &[
    "3b5074b1b5d032e5620f69f9159a2749",
    "6734f37431670b3ab4292b8f60f29984",
    "b32309a26951912be7dba376398abc3b",
    "a0e9f5d64349fb13191bc781f81f42e1",
    "66918128f1b9b03303d77c6f2ead419b",
];

const BROWSER_JA3: &[&str] = &[
    "cd08e31494f9531f560d64c695473da9",
    "b64f9d5a40cce26a6deaa70ef2d7cd5c",
    "773906b0efdefa24a7f2b8eb6985bf37",
    "37f463bf4616ecd445d4a1937da06e19",
];

pub struct TlsDetector;

#[async_trait]
impl Detector for TlsDetector {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn priority(&self) -> i32 {
        1
    }

    fn trigger_conditions(&self) -> Vec<super::Trigger> {
        Vec::new()
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let mut out = DetectorOutput::empty();
        let Some(ja3) = &ctx.request.tls_ja3 else {
            return Ok(out);
        };

        let is_script = SCRIPT_JA3.contains(&ja3.as_str());
        let is_browser_fp = BROWSER_JA3.contains(&ja3.as_str());
        let client_class = if is_script {
            "script"
        } else if is_browser_fp {
            "browser"
        } else {
            "unknown"
        };

        out = out
            .with_signal(SignalKey::TlsJa3Hash, SignalValue::Text(ja3.clone()))
            .with_signal(SignalKey::TlsClientClass, SignalValue::Text(client_class.to_string()));

        if is_script {
            let ua_claims_browser = ["mozilla", "chrome", "firefox", "safari", "edge"]
                .iter()
                .any(|b| ctx.request.user_agent.to_lowercase().contains(b));
            if ua_claims_browser {
                out = out.with_contribution(contribution(
                    self.name(),
                    Category::Fingerprint,
                    0.75,
                    1.0,
                    format!("ua_tls_mismatch:ua=browser,ja3=script:{}", &ja3[..8.min(ja3.len())]),
                    self.priority(),
                ));
            } else {
                out = out.with_contribution(contribution(
                    self.name(),
                    Category::Fingerprint,
                    0.2,
                    0.5,
                    format!("script_client_ja3:{}", &ja3[..8.min(ja3.len())]),
                    self.priority(),
                ));
            }
        }

        Ok(out)
    }
}
