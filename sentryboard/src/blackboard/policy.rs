// src/blackboard/policy.rs
//
// Action policy evaluator (§4.7). Grounded in the teacher's
// `engine/fusion.rs` tier→action match (`Critical => SuspendAccount`, …)
// and `engine/dispatcher.rs`'s action routing, generalized from a fixed
// three-tier match into an ordered, data-driven rule list so operators can
// reconfigure policy without a rebuild — matching the closed config option
// set in §6 (`policies: ordered list of {predicate, action, args}`).

use serde::{Deserialize, Serialize};

use crate::model::{AggregatedEvidence, BotType, Category, RiskBand};

/// Closed predicate sum type evaluated against the aggregated verdict. Pure
/// data (no closures) so it round-trips through config serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Always,
    RiskBandAtLeast(RiskBand),
    RiskBandIs(RiskBand),
    BotTypeIs(BotType),
    PathPrefix(String),
    MethodIs(String),
    CategoryScoreAtLeast(Category, f32),
    AnyOf(Vec<Predicate>),
    AllOf(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, evidence: &AggregatedEvidence, path: &str, method: &str) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::RiskBandAtLeast(band) => evidence.risk_band.severity() >= band.severity(),
            Predicate::RiskBandIs(band) => evidence.risk_band == *band,
            Predicate::BotTypeIs(bt) => evidence.primary_bot_type == Some(*bt),
            Predicate::PathPrefix(prefix) => path.starts_with(prefix.as_str()),
            Predicate::MethodIs(m) => method.eq_ignore_ascii_case(m),
            Predicate::CategoryScoreAtLeast(cat, min) => {
                evidence.category_breakdown.get(cat).map(|b| b.score >= *min).unwrap_or(false)
            }
            Predicate::AnyOf(ps) => ps.iter().any(|p| p.matches(evidence, path, method)),
            Predicate::AllOf(ps) => ps.iter().all(|p| p.matches(evidence, path, method)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    LogOnly,
    AddHeaders,
    Challenge,
    Block(u16),
    Redirect(String),
    Holodeck(String),
    Tarpit(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    pub predicate: Predicate,
    pub action: Action,
}

/// Find the first matching rule; falls back to `Allow` + `AddHeaders` per
/// the default rule in §4.7.
pub fn evaluate(rules: &[PolicyRule], evidence: &AggregatedEvidence, path: &str, method: &str) -> Action {
    rules
        .iter()
        .find(|r| r.predicate.matches(evidence, path, method))
        .map(|r| r.action.clone())
        .unwrap_or(Action::AddHeaders)
}

/// Ordered default policy set: whitelisted bots pass, very-high risk is
/// blocked, high risk is challenged, medium+ is logged with headers added,
/// everything else passes silently with detection headers attached.
pub fn default_policies() -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            name: "verified_bot_allow".into(),
            predicate: Predicate::BotTypeIs(BotType::VerifiedBot),
            action: Action::Allow,
        },
        PolicyRule {
            name: "very_high_risk_block".into(),
            predicate: Predicate::RiskBandAtLeast(RiskBand::VeryHigh),
            action: Action::Block(403),
        },
        PolicyRule {
            name: "high_risk_challenge".into(),
            predicate: Predicate::RiskBandAtLeast(RiskBand::High),
            action: Action::Challenge,
        },
        PolicyRule {
            name: "medium_risk_log".into(),
            predicate: Predicate::RiskBandAtLeast(RiskBand::Medium),
            action: Action::AddHeaders,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn evidence(band: RiskBand, bot_type: Option<BotType>) -> AggregatedEvidence {
        AggregatedEvidence {
            bot_probability: 0.5,
            confidence: 0.5,
            risk_band: band,
            category_breakdown: HashMap::new(),
            contributing_detectors: HashSet::new(),
            primary_bot_name: None,
            primary_bot_type: bot_type,
            ledger: Vec::new(),
        }
    }

    #[test]
    fn verified_bot_always_allowed() {
        let rules = default_policies();
        let ev = evidence(RiskBand::VeryHigh, Some(BotType::VerifiedBot));
        assert_eq!(evaluate(&rules, &ev, "/", "GET"), Action::Allow);
    }

    #[test]
    fn very_high_risk_blocks() {
        let rules = default_policies();
        let ev = evidence(RiskBand::VeryHigh, None);
        assert_eq!(evaluate(&rules, &ev, "/api", "GET"), Action::Block(403));
    }

    #[test]
    fn unmatched_defaults_to_add_headers() {
        let ev = evidence(RiskBand::Low, None);
        assert_eq!(evaluate(&default_policies(), &ev, "/", "GET"), Action::AddHeaders);
    }

    #[test]
    fn unknown_risk_band_never_matches_an_at_least_rule() {
        let ev = evidence(RiskBand::Unknown, None);
        assert_eq!(evaluate(&default_policies(), &ev, "/", "GET"), Action::AddHeaders);
        assert!(!Predicate::RiskBandAtLeast(RiskBand::VeryHigh).matches(&ev, "/", "GET"));
        assert!(!Predicate::RiskBandAtLeast(RiskBand::Medium).matches(&ev, "/", "GET"));
    }
}
