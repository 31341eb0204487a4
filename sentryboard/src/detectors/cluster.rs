// src/detectors/cluster.rs
//
// Cluster membership lookup (§4.4 table row `Cluster`), grounded in the
// teacher's `workers/hydra.rs` cluster-size/aggregate scoring. Feature
// ingestion happens here (every request updates the signature's feature
// vector); the actual recompute runs on the `cluster.interval_seconds`
// cadence from a background task (`main.rs::spawn_cluster_sweeper`),
// matching the teacher's `StateStore::update_clusters` split between
// per-event ingestion and periodic recompute.

use async_trait::async_trait;

use crate::errors::DetectionError;
use crate::model::{Category, SignalKey, SignalValue};
use crate::response_hook::{AnalysisMode, Thoroughness};
use crate::state::cluster::SignatureFeatures;

use super::behavioral::BehavioralDetector;
use super::{contribution, Detector, DetectorContext, DetectorOutput, ResponseAnalysisRequest, Trigger};

pub struct ClusterDetector;

#[async_trait]
impl Detector for ClusterDetector {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn priority(&self) -> i32 {
        3
    }

    fn trigger_conditions(&self) -> Vec<Trigger> {
        vec![Trigger::DetectorCount(2)]
    }

    async fn contribute(&self, ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
        // `sig_id` already folds the normalized IP prefix in via
        // `derive_signature_id` (§4.4), so there's no separate use for it here.
        let sig_id = BehavioralDetector::derive_signature_id(ctx);

        let behavior = ctx.state.behavior.snapshot(&sig_id);
        let drift = ctx.state.markov.drift_signals(&sig_id);
        let country = ctx
            .board
            .signal(SignalKey::IpCountry)
            .and_then(|v| v.as_text())
            .unwrap_or("unknown")
            .to_string();
        let asn = ctx
            .board
            .signal(SignalKey::IpAsn)
            .and_then(|v| v.as_text())
            .unwrap_or("unknown")
            .to_string();
        let datacenter = ctx.board.signal(SignalKey::IpIsDatacenter).and_then(|v| v.as_bool()).unwrap_or(false);

        ctx.state.cluster.update_features(
            &sig_id,
            SignatureFeatures {
                timing_cv: behavior.timing_cv,
                request_rate: behavior.request_rate,
                path_diversity: behavior.path_diversity,
                path_entropy: behavior.path_entropy,
                avg_bot_probability: ctx.board.current_risk_score as f64,
                self_drift: drift.self_drift,
                human_drift: drift.human_drift,
                loop_score: drift.loop_score,
                spectral_entropy: behavior.spectral_entropy,
                harmonic_ratio: behavior.harmonic_ratio,
                peak_to_average: behavior.peak_to_average,
                dominant_frequency: behavior.dominant_frequency,
                country,
                asn,
                datacenter,
            },
        );

        let mut out = DetectorOutput::empty();
        let Some(cluster_id) = ctx.state.cluster.cluster_of(&sig_id) else {
            return Ok(out);
        };
        let snapshot = ctx.state.cluster.get_clusters();
        let Some(entry) = snapshot.clusters.iter().find(|c| c.cluster_id == cluster_id) else {
            return Ok(out);
        };

        out = out
            .with_signal(SignalKey::ClusterId, SignalValue::Number(cluster_id as f64))
            .with_signal(SignalKey::ClusterAvgBotProb, SignalValue::Number(entry.avg_bot_probability));

        if entry.member_signature_ids.len() >= 5 {
            let size_score = (entry.member_signature_ids.len() as f32 / 25.0).min(1.0) * 0.4;
            out = out.with_contribution(contribution(
                self.name(),
                Category::Cluster,
                size_score + entry.avg_bot_probability as f32 * 0.3,
                0.6,
                format!("cluster_{}_size:{}", cluster_id, entry.member_signature_ids.len()),
                self.priority(),
            ));

            // A dense, high-probability cluster is worth a closer look at
            // what the response actually sends back (§4.9).
            if entry.avg_bot_probability > 0.6 {
                out = out.with_response_analysis(ResponseAnalysisRequest {
                    mode: AnalysisMode::Async,
                    thoroughness: Thoroughness::Standard,
                    priority: 4,
                    streaming: false,
                    trigger_name: "cluster",
                    trigger_value: format!("{}_members_avg_{:.2}", entry.member_signature_ids.len(), entry.avg_bot_probability),
                });
            }
        }

        Ok(out)
    }
}
