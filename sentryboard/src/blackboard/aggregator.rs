// src/blackboard/aggregator.rs
//
// Evidence aggregation (§4.6). Grounded in the teacher's
// `engine/fusion.rs::fuse` — weighted-sum composite score, confidence
// scaling, deterministic tier selection — generalized from a fixed
// 10-worker weight table to a per-category bucket computed from whatever
// contributions actually landed this request.

use std::collections::{HashMap, HashSet};

use crate::config::AggregatorConfig;
use crate::model::{AggregatedEvidence, BotType, Category, CategoryBreakdown, DetectionContribution, RiskBand, ALL_CATEGORIES};

/// The running risk score the blackboard keeps after every wave — the
/// overall probability from step 2 of the algorithm, recomputed on every
/// `apply_contributions` call. This is the function `model.rs` calls.
pub fn running_probability(contributions: &[DetectionContribution]) -> f32 {
    aggregate(contributions, &AggregatorConfig::default()).bot_probability
}

/// Full aggregation (§4.6 steps 1-5).
pub fn aggregate(ledger: &[DetectionContribution], config: &AggregatorConfig) -> AggregatedEvidence {
    let mut breakdown: HashMap<Category, CategoryBreakdown> = HashMap::new();
    let mut contributing_detectors = HashSet::new();

    for cat in ALL_CATEGORIES {
        breakdown.insert(*cat, CategoryBreakdown::default());
    }

    for c in ledger {
        contributing_detectors.insert(c.detector_name.clone());
        let entry = breakdown.entry(c.category).or_default();
        let rescaled = (c.confidence_delta + 1.0) / 2.0;
        let w = c.weight;
        // running weighted mean: new_mean = old_mean + w*(x - old_mean)/(total_w + w)
        let new_total = entry.total_weight + w;
        if new_total > 0.0 {
            entry.score = entry.score + w * (rescaled - entry.score) / new_total;
        }
        entry.total_weight = new_total;
        entry.contribution_count += 1;
        if !entry.reasons.contains(&c.reason) {
            entry.reasons.push(c.reason.clone());
        }
    }

    let total_weight: f32 = breakdown.values().map(|b| b.total_weight).sum();

    let bot_probability = if total_weight <= 0.0 {
        0.5
    } else {
        (breakdown.values().map(|b| b.total_weight * b.score).sum::<f32>() / total_weight).clamp(0.0, 1.0)
    };

    let confidence = 1.0 - (-total_weight / config.confidence_scale.max(1e-6)).exp();

    let mut risk_band = if ledger.is_empty() {
        RiskBand::Unknown
    } else {
        RiskBand::from_probability(bot_probability)
    };

    // Primary bot identification (§4.6 step 5): highest weight*|delta| among
    // contributions carrying a bot_name.
    let primary = ledger
        .iter()
        .filter(|c| c.bot_name.is_some())
        .max_by(|a, b| {
            let sa = a.weight * a.confidence_delta.abs();
            let sb = b.weight * b.confidence_delta.abs();
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
        });

    let (primary_bot_name, primary_bot_type) = match primary {
        Some(c) if c.whitelisted => {
            risk_band = RiskBand::VeryLow;
            (c.bot_name.clone(), Some(BotType::VerifiedBot))
        }
        Some(c) => (c.bot_name.clone(), c.bot_type),
        None => (None, None),
    };

    AggregatedEvidence {
        bot_probability,
        confidence,
        risk_band,
        category_breakdown: breakdown,
        contributing_detectors,
        primary_bot_name,
        primary_bot_type,
        ledger: ledger.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;

    fn contrib(delta: f32, weight: f32) -> DetectionContribution {
        DetectionContribution {
            detector_name: "test".into(),
            category: Category::Heuristic,
            confidence_delta: delta,
            weight,
            reason: "r".into(),
            priority: 1,
            bot_type: None,
            bot_name: None,
            whitelisted: false,
        }
    }

    #[test]
    fn empty_ledger_is_neutral_unknown() {
        let ev = aggregate(&[], &AggregatorConfig::default());
        assert_eq!(ev.bot_probability, 0.5);
        assert_eq!(ev.risk_band, RiskBand::Unknown);
        assert!(ev.primary_bot_name.is_none());
    }

    #[test]
    fn single_max_contribution_is_very_high() {
        let ev = aggregate(&[contrib(1.0, 1.0)], &AggregatorConfig::default());
        assert!((ev.bot_probability - 1.0).abs() < 1e-6);
        assert_eq!(ev.risk_band, RiskBand::VeryHigh);
    }

    #[test]
    fn equal_and_opposite_contributions_cancel() {
        let ev = aggregate(&[contrib(1.0, 1.0), contrib(-1.0, 1.0)], &AggregatorConfig::default());
        assert!((ev.bot_probability - 0.5).abs() < 1e-6);
    }

    #[test]
    fn zero_weight_contribution_never_moves_probability() {
        let base = aggregate(&[contrib(1.0, 1.0)], &AggregatorConfig::default());
        let with_zero = aggregate(&[contrib(1.0, 1.0), contrib(-1.0, 0.0)], &AggregatorConfig::default());
        assert!((base.bot_probability - with_zero.bot_probability).abs() < 1e-6);
    }

    #[test]
    fn whitelisted_bot_forces_very_low_regardless_of_score() {
        let mut c = contrib(1.0, 1.0);
        c.bot_name = Some("Google Search".into());
        c.whitelisted = true;
        let ev = aggregate(&[c], &AggregatorConfig::default());
        assert_eq!(ev.risk_band, RiskBand::VeryLow);
    }

    #[test]
    fn probability_always_in_unit_range() {
        let ledger: Vec<DetectionContribution> = (0..20)
            .map(|i| contrib(if i % 2 == 0 { 0.9 } else { -0.3 }, (i as f32 % 5.0) + 0.1))
            .collect();
        let ev = aggregate(&ledger, &AggregatorConfig::default());
        assert!((0.0..=1.0).contains(&ev.bot_probability));
    }
}
