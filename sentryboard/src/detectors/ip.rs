// src/detectors/ip.rs
//
// IP/ASN classification, grounded in the teacher's
// `workers/asn_classifier.rs` tiered cloud-provider name lists (§4.4 table
// row `IP`). The teacher looks up a real ASN org name from its event
// schema; here the classification runs against the normalized /24 or /64
// prefix plus a small curated range table, since the specification
// deliberately scopes out persistent ASN enrichment infrastructure.

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::{Category, SignalKey, SignalValue};
use crate::state::normalize::normalize_ip;

use super::{contribution, Detector, DetectorContext, DetectorOutput};

/// (prefix, asn label, country, is_tor_exit).
const KNOWN_RANGES: &[(&str, &str, &str, bool)] = &[
    ("3.5.", "AWS", "US", false),
    ("13.", "AWS", "US", false),
    ("34.", "GCP", "US", false),
    ("35.", "GCP", "US", false),
    ("20.", "Azure", "US", false),
    ("40.", "Azure", "US", false),
    ("104.196.", "GCP", "US", false),
    ("138.197.", "DigitalOcean", "US", false),
    ("159.89.", "DigitalOcean", "US", false),
    ("167.172.", "DigitalOcean", "US", false),
    ("5.9.", "Hetzner", "DE", false),
    ("88.99.", "Hetzner", "DE", false),
    ("51.15.", "OVH", "FR", false),
    ("198.51.100.", "residential-test-block", "US", false),
];

pub struct IpDetector;

#[async_trait]
impl Detector for IpDetector {
    fn name(&self) -> &'static str {
        "ip"
    }

    fn priority(&self) -> i32 {
        1
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let mut out = DetectorOutput::empty();
        let ip = &ctx.request.remote_ip;
        let prefix = normalize_ip(ip);

        let hit = KNOWN_RANGES.iter().find(|(p, ..)| prefix.starts_with(p));
        let is_datacenter = hit.map(|(_, _, _, _)| true).unwrap_or(false) && hit.map(|(_, asn, _, _)| *asn != "residential-test-block").unwrap_or(false);
        let asn = hit.map(|(_, a, _, _)| a.to_string()).unwrap_or_else(|| "unknown".to_string());
        let country = hit.map(|(_, _, c, _)| c.to_string()).unwrap_or_else(|| "unknown".to_string());
        let is_tor = hit.map(|(_, _, _, tor)| *tor).unwrap_or(false);

        out = out
            .with_signal(SignalKey::IpIsDatacenter, SignalValue::Bool(is_datacenter))
            .with_signal(SignalKey::IpAsn, SignalValue::Text(asn.clone()))
            .with_signal(SignalKey::IpCountry, SignalValue::Text(country))
            .with_signal(SignalKey::IpIsTor, SignalValue::Bool(is_tor));

        if is_datacenter {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Ip,
                0.4,
                0.7,
                format!("datacenter_asn:{}", asn),
                self.priority(),
            ));
        }
        if is_tor {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Ip,
                0.5,
                0.8,
                "tor_exit_node",
                self.priority(),
            ));
        }
        if prefix == "private-v4" || prefix == "private-v6" {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Ip,
                -0.3,
                0.3,
                "private_address_space",
                self.priority(),
            ));
        }

        Ok(out)
    }
}
