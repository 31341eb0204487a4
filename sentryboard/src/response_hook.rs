// src/response_hook.rs
//
// Response-analysis hook (§4.9). Net new — the teacher has no response-side
// pipeline at all (its eBPF capture is request/response symmetric but only
// ever inspects inbound ssl_read traffic). Modeled as plain data a detector
// stores on the blackboard; the host integration reads it after the
// response is generated and dispatches to response-side detectors, which
// are out of scope here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    Async,
    Inline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Thoroughness {
    Minimal,
    Standard,
    Thorough,
    Deep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAnalysisContext {
    pub enable: bool,
    pub mode: AnalysisMode,
    pub thoroughness: Thoroughness,
    pub enable_streaming: bool,
    pub priority: i32,
    pub trigger_signals: HashMap<String, String>,
}

impl Default for ResponseAnalysisContext {
    fn default() -> Self {
        Self {
            enable: false,
            mode: AnalysisMode::Async,
            thoroughness: Thoroughness::Minimal,
            enable_streaming: false,
            priority: 0,
            trigger_signals: HashMap::new(),
        }
    }
}

impl ResponseAnalysisContext {
    /// Any detector may request response analysis; repeated requests within
    /// the same wave pipeline can only upgrade priority/thoroughness, never
    /// downgrade them (§4.9: "later triggers can only upgrade").
    pub fn request(
        &mut self,
        mode: AnalysisMode,
        thoroughness: Thoroughness,
        priority: i32,
        streaming: bool,
        trigger_name: &str,
        trigger_value: impl Into<String>,
    ) {
        self.enable = true;
        if priority > self.priority {
            self.priority = priority;
            self.mode = mode;
        }
        if thoroughness > self.thoroughness {
            self.thoroughness = thoroughness;
        }
        self.enable_streaming = self.enable_streaming || streaming;
        self.trigger_signals.insert(trigger_name.to_string(), trigger_value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default() {
        let ctx = ResponseAnalysisContext::default();
        assert!(!ctx.enable);
        assert_eq!(ctx.thoroughness, Thoroughness::Minimal);
    }

    #[test]
    fn thoroughness_and_priority_only_upgrade() {
        let mut ctx = ResponseAnalysisContext::default();
        ctx.request(AnalysisMode::Async, Thoroughness::Thorough, 5, false, "honeypot", "hit");
        assert_eq!(ctx.thoroughness, Thoroughness::Thorough);
        assert_eq!(ctx.priority, 5);

        ctx.request(AnalysisMode::Inline, Thoroughness::Minimal, 2, true, "cluster", "dense");
        // lower priority/thoroughness must not regress the prior upgrade
        assert_eq!(ctx.thoroughness, Thoroughness::Thorough);
        assert_eq!(ctx.priority, 5);
        assert!(ctx.enable_streaming);
        assert_eq!(ctx.trigger_signals.len(), 2);
    }

    #[test]
    fn higher_priority_upgrades_mode() {
        let mut ctx = ResponseAnalysisContext::default();
        ctx.request(AnalysisMode::Async, Thoroughness::Minimal, 1, false, "a", "1");
        ctx.request(AnalysisMode::Inline, Thoroughness::Deep, 9, false, "b", "2");
        assert_eq!(ctx.mode, AnalysisMode::Inline);
        assert_eq!(ctx.thoroughness, Thoroughness::Deep);
    }
}
