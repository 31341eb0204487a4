// src/detectors/header.rs
//
// Header order/presence analysis, grounded in the teacher's
// `workers/fingerprint.rs::header_entropy`/`kendall_tau` (§4.4 table row
// `Header`). The teacher scores header order against one browser and one
// script reference order; kept verbatim as the entropy proxy, generalized
// to also flag missing standard browser headers.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::{Category, SignalKey, SignalValue};

use super::{contribution, Detector, DetectorContext, DetectorOutput};

const REQUIRED_BROWSER_HEADERS: &[&str] = &["accept", "accept-language", "accept-encoding"];

const CHROME_ORDER: &[&str] = &[
    "host",
    "connection",
    "sec-ch-ua",
    "sec-ch-ua-mobile",
    "sec-ch-ua-platform",
    "upgrade-insecure-requests",
    "user-agent",
    "accept",
    "sec-fetch-site",
    "sec-fetch-mode",
    "sec-fetch-dest",
    "referer",
    "accept-encoding",
    "accept-language",
    "cookie",
];

const SCRIPT_ORDER: &[&str] = &[
    "host",
    "user-agent",
    "accept-encoding",
    "accept",
    "connection",
    "content-length",
    "content-type",
    "authorization",
];

fn kendall_tau(observed: &[String], ref_pos: &HashMap<&str, usize>) -> f64 {
    let pairs: Vec<(usize, usize)> = observed
        .iter()
        .enumerate()
        .filter_map(|(i, h)| ref_pos.get(h.as_str()).map(|&r| (i, r)))
        .collect();
    if pairs.len() < 2 {
        return 0.0;
    }
    let (mut concordant, mut discordant) = (0i64, 0i64);
    for i in 0..pairs.len() {
        for j in (i + 1)..pairs.len() {
            let (a, b) = (pairs[i], pairs[j]);
            if (a.0 as i64 - b.0 as i64).signum() == (a.1 as i64 - b.1 as i64).signum() {
                concordant += 1;
            } else {
                discordant += 1;
            }
        }
    }
    let total = (concordant + discordant).max(1) as f64;
    (concordant - discordant) as f64 / total
}

fn header_order_score(observed: &[String]) -> f32 {
    let chrome_pos: HashMap<&str, usize> = CHROME_ORDER.iter().enumerate().map(|(i, h)| (*h, i)).collect();
    let script_pos: HashMap<&str, usize> = SCRIPT_ORDER.iter().enumerate().map(|(i, h)| (*h, i)).collect();
    let chrome_sim = kendall_tau(observed, &chrome_pos);
    let script_sim = kendall_tau(observed, &script_pos);
    ((script_sim - chrome_sim + 1.0) / 2.0).clamp(0.0, 1.0) as f32
}

pub struct HeaderDetector;

#[async_trait]
impl Detector for HeaderDetector {
    fn name(&self) -> &'static str {
        "header"
    }

    fn priority(&self) -> i32 {
        1
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let mut out = DetectorOutput::empty();

        let observed: Vec<String> = ctx.request.headers.iter().map(|(k, _)| k.to_lowercase()).collect();
        let present: HashSet<&str> = observed.iter().map(|s| s.as_str()).collect();

        let missing_accept = REQUIRED_BROWSER_HEADERS.iter().any(|h| !present.contains(h));
        out = out.with_signal(SignalKey::HdrMissingAccept, SignalValue::Bool(missing_accept));

        if observed.is_empty() {
            // No headers at all is a stronger tell than just missing Accept:
            // every real browser and every polite script sends at least
            // Host/User-Agent, so a completely bare request is the maximal
            // form of this signal, not the absence of one.
            out = out.with_contribution(contribution(
                self.name(),
                Category::Header,
                0.8,
                0.8,
                "no_headers_at_all",
                self.priority(),
            ));
            return Ok(out);
        }

        let suspicion = header_order_score(&observed);
        let suspicious_order = suspicion > 0.6;
        out = out.with_signal(SignalKey::HdrSuspiciousOrder, SignalValue::Bool(suspicious_order));

        if missing_accept {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Header,
                0.35,
                0.6,
                "missing_browser_accept_headers",
                self.priority(),
            ));
        }
        if suspicious_order {
            out = out.with_contribution(contribution(
                self.name(),
                Category::Header,
                suspicion,
                0.6,
                format!("header_order_script_like:{:.2}", suspicion),
                self.priority(),
            ));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_order_scores_low_suspicion() {
        let observed: Vec<String> = CHROME_ORDER.iter().map(|s| s.to_string()).collect();
        assert!(header_order_score(&observed) < 0.5);
    }

    #[test]
    fn script_order_scores_high_suspicion() {
        let observed: Vec<String> = SCRIPT_ORDER.iter().map(|s| s.to_string()).collect();
        assert!(header_order_score(&observed) > 0.5);
    }

    #[tokio::test]
    async fn no_headers_at_all_contributes_more_than_missing_accept_alone() {
        use crate::config::Config;
        use crate::model::{Blackboard, RequestSnapshot};
        use crate::state::SharedState;
        use std::collections::HashMap;

        let config = Config::default();
        let state = SharedState::new(&config);
        let board = Blackboard::new("r1".into());

        let mut req = RequestSnapshot {
            method: "GET".into(),
            path: "/api/data".into(),
            query: "".into(),
            headers: vec![("Accept".into(), "text/html".into())],
            remote_ip: "198.51.100.1".into(),
            user_agent: "curl/8.4.0".into(),
            tls_ja3: None,
            tls_ja3s: None,
            cookies: HashMap::new(),
            body_excerpt: String::new(),
            referer: None,
            client_fingerprint: None,
        };
        let ctx = DetectorContext { request: &req, board: &board, state: &state, config: &config };
        let missing_accept_only = HeaderDetector.contribute(&ctx).await.unwrap();
        let missing_delta: f32 = missing_accept_only.contributions.iter().map(|c| c.confidence_delta).sum();

        req.headers.clear();
        let ctx = DetectorContext { request: &req, board: &board, state: &state, config: &config };
        let bare = HeaderDetector.contribute(&ctx).await.unwrap();
        let bare_delta: f32 = bare.contributions.iter().map(|c| c.confidence_delta).sum();

        assert!(bare_delta > missing_delta, "bare={bare_delta} missing={missing_delta}");
    }
}
