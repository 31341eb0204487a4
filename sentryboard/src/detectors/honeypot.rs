// src/detectors/honeypot.rs
//
// Honeypot path / security-tool fingerprint matching, grounded in the
// teacher's `workers/cot.rs` Aho-Corasick automaton pattern (O(n) scan
// regardless of pattern count, built once behind a `OnceLock`), repurposed
// from prompt-text scanning to path/body scanning (§4.4 table row
// `Honeypot/SecurityTool`).

use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::{Category, SignalKey, SignalValue};
use crate::response_hook::{AnalysisMode, Thoroughness};

use super::{contribution, Detector, DetectorContext, DetectorOutput, ResponseAnalysisRequest};

static HONEYPOT_AC: OnceLock<(AhoCorasick, Vec<&'static str>)> = OnceLock::new();
static SECTOOL_AC: OnceLock<(AhoCorasick, Vec<&'static str>)> = OnceLock::new();

const HONEYPOT_PATTERNS: &[(&str, &str)] = &[
    ("/wp-admin", "wp_admin_probe"),
    ("/wp-login", "wp_login_probe"),
    ("/.env", "dotenv_probe"),
    ("/.git/config", "gitconfig_probe"),
    ("/phpmyadmin", "phpmyadmin_probe"),
    ("/.aws/credentials", "aws_creds_probe"),
    ("/admin/config", "admin_config_probe"),
    ("/actuator/env", "spring_actuator_probe"),
    ("/__debug__", "debug_endpoint_probe"),
    ("/trap", "honeypot_field"),
];

const SECTOOL_PATTERNS: &[(&str, &str)] = &[
    ("sqlmap", "sqlmap"),
    ("nikto", "nikto"),
    ("nmap", "nmap"),
    ("masscan", "masscan"),
    ("gobuster", "gobuster"),
    ("nuclei", "nuclei"),
    ("dirbuster", "dirbuster"),
    ("zgrab", "zgrab"),
    ("burpsuite", "burp_suite"),
    ("<script>alert", "xss_probe"),
    ("union select", "sqli_probe"),
    ("' or '1'='1", "sqli_probe"),
];

fn honeypot_automaton() -> &'static (AhoCorasick, Vec<&'static str>) {
    HONEYPOT_AC.get_or_init(|| {
        let patterns: Vec<&str> = HONEYPOT_PATTERNS.iter().map(|(p, _)| *p).collect();
        let labels: Vec<&str> = HONEYPOT_PATTERNS.iter().map(|(_, l)| *l).collect();
        let ac = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(&patterns)
            .expect("honeypot AC build failed");
        (ac, labels)
    })
}

fn sectool_automaton() -> &'static (AhoCorasick, Vec<&'static str>) {
    SECTOOL_AC.get_or_init(|| {
        let patterns: Vec<&str> = SECTOOL_PATTERNS.iter().map(|(p, _)| *p).collect();
        let labels: Vec<&str> = SECTOOL_PATTERNS.iter().map(|(_, l)| *l).collect();
        let ac = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(&patterns)
            .expect("sectool AC build failed");
        (ac, labels)
    })
}

pub struct HoneypotDetector;

#[async_trait]
impl Detector for HoneypotDetector {
    fn name(&self) -> &'static str {
        "honeypot"
    }

    fn priority(&self) -> i32 {
        1
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        let mut out = DetectorOutput::empty();
        let (hp_ac, hp_labels) = honeypot_automaton();
        let haystack = format!("{} {}", ctx.request.path, ctx.request.query);

        if let Some(m) = hp_ac.find(&haystack) {
            let label = hp_labels[m.pattern().as_usize()];
            out = out
                .with_signal(SignalKey::HoneypotHit, SignalValue::Bool(true))
                .with_contribution(contribution(
                    self.name(),
                    Category::Honeypot,
                    0.9,
                    1.0,
                    format!("honeypot_path:{}", label),
                    self.priority(),
                ))
                // A honeypot hit is worth inspecting in depth regardless of
                // what else fires this request (§4.9).
                .with_response_analysis(ResponseAnalysisRequest {
                    mode: AnalysisMode::Inline,
                    thoroughness: Thoroughness::Deep,
                    priority: 9,
                    streaming: false,
                    trigger_name: "honeypot",
                    trigger_value: label.to_string(),
                });
        }

        let (sec_ac, sec_labels) = sectool_automaton();
        let sec_haystack = format!("{} {} {}", ctx.request.user_agent, ctx.request.path, ctx.request.body_excerpt);
        if let Some(m) = sec_ac.find(&sec_haystack) {
            let label = sec_labels[m.pattern().as_usize()];
            out = out
                .with_signal(SignalKey::SecTool, SignalValue::Text(label.to_string()))
                .with_contribution(contribution(
                    self.name(),
                    Category::SecurityTool,
                    0.85,
                    1.0,
                    format!("security_tool_signature:{}", label),
                    self.priority(),
                ));
        }

        Ok(out)
    }
}
