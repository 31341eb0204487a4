// src/eval/mod.rs
//
// Labeled dataset evaluation harness (ambient stack — the teacher ships one
// for its distillation-campaign labels; §8's testable properties call for
// the equivalent here: per-detector and aggregate precision/recall/F1/FPR).
//
// Dataset format (one JSON object per line): the `RequestSnapshot` fields
// flattened with a `bot_label: bool` ground-truth field alongside.
//
// Run:
//   sentryboard --mode eval --path labeled_dataset.jsonl --eval-threshold 0.7

pub mod report;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::blackboard::Orchestrator;
use crate::model::RequestSnapshot;

#[derive(Debug, Deserialize)]
pub struct LabeledRequest {
    #[serde(flatten)]
    pub snapshot: RequestSnapshot,
    pub bot_label: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DetectorMetrics {
    pub tp: u64,
    pub fp: u64,
    pub tn: u64,
    pub fn_: u64,
}

impl DetectorMetrics {
    pub fn precision(&self) -> f64 {
        let denom = self.tp + self.fp;
        if denom == 0 {
            1.0
        } else {
            self.tp as f64 / denom as f64
        }
    }

    pub fn recall(&self) -> f64 {
        let denom = self.tp + self.fn_;
        if denom == 0 {
            0.0
        } else {
            self.tp as f64 / denom as f64
        }
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn fpr(&self) -> f64 {
        let denom = self.fp + self.tn;
        if denom == 0 {
            0.0
        } else {
            self.fp as f64 / denom as f64
        }
    }
}

#[derive(Debug)]
pub struct EvalResult {
    pub n_requests: usize,
    pub n_positive: usize,
    pub n_negative: usize,
    pub threshold: f32,
    pub global: DetectorMetrics,
    pub per_detector: HashMap<String, DetectorMetrics>,
    pub risk_band_counts: HashMap<String, u64>,
    pub score_histogram: Vec<(f32, usize)>,
}

impl EvalResult {
    pub fn print_report(&self) {
        println!("\n## Bot Detection Evaluation Report\n");
        println!("| Metric    | Value  |");
        println!("|-----------|--------|");
        println!("| Requests  | {}     |", self.n_requests);
        println!("| Positive  | {}     |", self.n_positive);
        println!("| Negative  | {}     |", self.n_negative);
        println!("| Threshold | {:.3}  |", self.threshold);
        println!("| Precision | {:.4}  |", self.global.precision());
        println!("| Recall    | {:.4}  |", self.global.recall());
        println!("| F1        | {:.4}  |", self.global.f1());
        println!("| FPR       | {:.4}  |", self.global.fpr());
        println!();

        println!("### Per-Detector Performance\n");
        println!("| Detector | P | R | F1 | FPR |");
        println!("|----------|---|---|----|-----|");
        let mut detectors: Vec<_> = self.per_detector.iter().collect();
        detectors.sort_by(|a, b| b.1.f1().partial_cmp(&a.1.f1()).unwrap());
        for (name, m) in detectors {
            println!(
                "| {:15} | {:.3} | {:.3} | {:.3} | {:.4} |",
                name,
                m.precision(),
                m.recall(),
                m.f1(),
                m.fpr()
            );
        }

        println!("\n### Score Distribution\n");
        for (lower, count) in &self.score_histogram {
            let bar: String = "#".repeat((*count as f64 / self.n_requests.max(1) as f64 * 80.0) as usize);
            println!("{:.2}-{:.2} | {:5} | {}", lower, lower + 0.05, count, bar);
        }
    }
}

pub struct Evaluator {
    threshold: f32,
}

impl Evaluator {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub async fn run_dataset(&self, path: &Path, orchestrator: Arc<Orchestrator>) -> Result<EvalResult> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut requests: Vec<LabeledRequest> = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<LabeledRequest>(line) {
                Ok(r) => requests.push(r),
                Err(e) => tracing::warn!("eval dataset parse error: {}", e),
            }
        }

        info!("loaded {} requests from {}", requests.len(), path.display());
        self.evaluate(requests, orchestrator).await
    }

    async fn evaluate(&self, requests: Vec<LabeledRequest>, orchestrator: Arc<Orchestrator>) -> Result<EvalResult> {
        let n_requests = requests.len();
        let n_positive = requests.iter().filter(|r| r.bot_label).count();
        let n_negative = n_requests - n_positive;

        let mut global = DetectorMetrics::default();
        let mut per_detector: HashMap<String, DetectorMetrics> = HashMap::new();
        let mut risk_band_counts: HashMap<String, u64> = HashMap::new();
        let mut score_bins = vec![0usize; 20];

        for (i, req) in requests.iter().enumerate() {
            let result = orchestrator.detect(&req.snapshot, format!("eval-{i}")).await;
            let is_positive = req.bot_label;
            let alerted = result.evidence.bot_probability >= self.threshold;

            for c in &result.evidence.ledger {
                let m = per_detector.entry(c.detector_name.clone()).or_default();
                let fired = c.confidence_delta >= 0.3;
                match (fired, is_positive) {
                    (true, true) => m.tp += 1,
                    (true, false) => m.fp += 1,
                    (false, true) => m.fn_ += 1,
                    (false, false) => m.tn += 1,
                }
            }

            match (alerted, is_positive) {
                (true, true) => global.tp += 1,
                (true, false) => global.fp += 1,
                (false, true) => global.fn_ += 1,
                (false, false) => global.tn += 1,
            }

            let bin = ((result.evidence.bot_probability / 0.05) as usize).min(19);
            score_bins[bin] += 1;
            *risk_band_counts.entry(format!("{:?}", result.evidence.risk_band)).or_default() += 1;
        }

        let score_histogram = score_bins.iter().enumerate().map(|(i, &c)| (i as f32 * 0.05, c)).collect();

        Ok(EvalResult {
            n_requests,
            n_positive,
            n_negative,
            threshold: self.threshold,
            global,
            per_detector,
            risk_band_counts,
            score_histogram,
        })
    }
}
