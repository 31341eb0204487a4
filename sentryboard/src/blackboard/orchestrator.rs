// src/blackboard/orchestrator.rs
//
// Wave-scheduled detector driver (§4.5). Concurrency pattern — spawn a
// bounded set of futures, join them, fold results into shared state — is
// grounded in the teacher's `main.rs::Pipeline::process` and the flat
// `workers::run_all` (`tokio::join!` over every worker). The extension here
// — priority-ordered waves, per-detector trigger evaluation, soft/hard
// deadline budgets — has no teacher counterpart; the teacher runs every
// worker on every event unconditionally.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::blackboard::{aggregator, policy};
use crate::config::Config;
use crate::detectors::{Detector, DetectorContext};
use crate::learning::LearningBus;
use crate::model::{AggregatedEvidence, Blackboard, BotType, LearningEvent, PatternType, RequestSnapshot};
use crate::response_hook::ResponseAnalysisContext;
use crate::state::SharedState;

const HIGH_CONFIDENCE_THRESHOLD: f32 = 0.85;

pub struct Orchestrator {
    detectors: Vec<Box<dyn Detector>>,
    config: Config,
    state: SharedState,
    learning: Option<Arc<LearningBus>>,
}

pub struct DetectResult {
    pub evidence: AggregatedEvidence,
    pub action: policy::Action,
    pub response_analysis: ResponseAnalysisContext,
}

impl Orchestrator {
    pub fn new(detectors: Vec<Box<dyn Detector>>, config: Config, state: SharedState) -> Self {
        Self { detectors, config, state, learning: None }
    }

    pub fn with_learning_bus(mut self, bus: Arc<LearningBus>) -> Self {
        self.learning = Some(bus);
        self
    }

    /// §4.5 algorithm. The public contract never returns `Err` (§7): any
    /// internal fault is recovered locally and folds into the default
    /// verdict (`risk_band = Unknown`, action = Allow + LogOnly).
    pub async fn detect(&self, request: &RequestSnapshot, request_id: String) -> DetectResult {
        if !self.config.enabled {
            let evidence = aggregator::aggregate(&[], &self.config.aggregator);
            return DetectResult {
                evidence,
                action: policy::Action::Allow,
                response_analysis: ResponseAnalysisContext::default(),
            };
        }

        let soft = Duration::from_millis(self.config.soft_deadline_ms);
        let hard = Duration::from_millis(self.config.hard_deadline_ms);

        let mut board = Blackboard::new(request_id);
        let mut remaining: Vec<usize> = (0..self.detectors.len()).collect();

        // Partition candidates into priority-ordered waves (§4.5 step 2).
        let mut priorities: Vec<i32> = self.detectors.iter().map(|d| d.priority()).collect();
        priorities.sort_unstable();
        priorities.dedup();

        'waves: for wave_priority in priorities {
            if board.elapsed() >= hard {
                break;
            }

            let mut progressed = true;
            while progressed {
                progressed = false;

                let ready: Vec<usize> = remaining
                    .iter()
                    .copied()
                    .filter(|&i| {
                        let d = &self.detectors[i];
                        d.priority() == wave_priority
                            && d.is_enabled(&self.config)
                            && d.trigger_conditions().iter().all(|t| t.evaluate(&board))
                    })
                    .collect();

                if ready.is_empty() {
                    break;
                }

                let elapsed = board.elapsed();
                if elapsed >= hard {
                    break 'waves;
                }
                let deadline = hard.saturating_sub(elapsed).min(soft.saturating_sub(elapsed.min(soft)));

                let results = run_wave(&self.detectors, &ready, request, &board, &self.state, &self.config, deadline).await;

                for (idx, outcome) in results {
                    remaining.retain(|&r| r != idx);
                    let name = self.detectors[idx].name().to_string();
                    match outcome {
                        WaveOutcome::Completed(output) => {
                            board.apply_signals(output.signal_proposals);
                            let early_exit = output
                                .contributions
                                .iter()
                                .any(|c| c.whitelisted && c.bot_type == Some(BotType::VerifiedBot));
                            board.apply_contributions(output.contributions);
                            if let Some(req) = output.response_analysis {
                                board.response_analysis.request(
                                    req.mode,
                                    req.thoroughness,
                                    req.priority,
                                    req.streaming,
                                    req.trigger_name,
                                    req.trigger_value,
                                );
                            }
                            board.completed_detectors.insert(name);
                            progressed = true;
                            if early_exit {
                                break 'waves;
                            }
                        }
                        WaveOutcome::TimedOut => {
                            board.skipped_detectors.insert(name.clone());
                            if !self.detectors[idx].is_optional() {
                                warn!(detector = %name, "non-optional detector timed out");
                            }
                            progressed = true;
                        }
                        WaveOutcome::Faulted(fault) => {
                            board.failed_detectors.insert(name.clone());
                            if fault.is_fatal_for_required_detector() && !self.detectors[idx].is_optional() {
                                warn!(
                                    detector = %name,
                                    reason = %fault,
                                    "required detector faulted; falling back to safe default for its contribution"
                                );
                            } else {
                                warn!(detector = %name, reason = %fault, "detector faulted");
                            }
                            progressed = true;
                        }
                    }
                }

                if board.elapsed() >= soft {
                    for &i in &remaining {
                        board.skipped_detectors.insert(self.detectors[i].name().to_string());
                    }
                    remaining.clear();
                    break 'waves;
                }
            }
        }

        let evidence = aggregator::aggregate(&board.contributions, &self.config.aggregator);
        let action = policy::evaluate(&self.config.policies, &evidence, &request.path, &request.method);

        self.emit_learning_events(&board.request_id, &evidence);

        DetectResult { evidence, action, response_analysis: board.response_analysis }
    }

    /// §4.5 step 6: a `FullDetection` event fires for every request; a
    /// `HighConfidenceDetection` fires additionally once probability clears
    /// the threshold, carrying the primary pattern so the reputation store
    /// can reinforce it without waiting for the next request.
    fn emit_learning_events(&self, request_id: &str, evidence: &AggregatedEvidence) {
        let Some(bus) = &self.learning else { return };

        bus.publish(LearningEvent::FullDetection {
            request_id: request_id.to_string(),
            evidence_summary: format!("{:?}", evidence.risk_band),
            bot_probability: evidence.bot_probability,
        });

        if evidence.bot_probability >= HIGH_CONFIDENCE_THRESHOLD {
            if let Some(name) = &evidence.primary_bot_name {
                bus.publish(crate::learning::high_confidence_event(
                    request_id,
                    name.clone(),
                    PatternType::UserAgent,
                    evidence.bot_probability,
                    evidence.confidence,
                ));
            }
        }
    }
}

enum WaveOutcome {
    Completed(crate::detectors::DetectorOutput),
    TimedOut,
    Faulted(crate::errors::DetectionError),
}

async fn run_wave(
    detectors: &[Box<dyn Detector>],
    ready: &[usize],
    request: &RequestSnapshot,
    board: &Blackboard,
    state: &SharedState,
    config: &Config,
    deadline: Duration,
) -> Vec<(usize, WaveOutcome)> {
    let ctx = DetectorContext {
        request,
        board,
        state,
        config,
    };

    // Detectors within a wave run concurrently (§5): each gets its own
    // timeout budget, and all run() futures are polled together via
    // `join_all` rather than one-at-a-time.
    let futures = ready.iter().map(|&idx| {
        let detector = &detectors[idx];
        let budget = detector.execution_timeout(config).min(deadline.max(Duration::from_millis(1)));
        let ctx = &ctx;
        async move {
            let _started = Instant::now();
            let result = tokio::time::timeout(budget, detector.contribute(ctx)).await;
            (idx, result)
        }
    });

    futures::future::join_all(futures)
        .await
        .into_iter()
        .map(|(idx, result)| match result {
            Ok(Ok(output)) => (idx, WaveOutcome::Completed(output)),
            Ok(Err(fault)) => (idx, WaveOutcome::Faulted(fault)),
            Err(_) => (idx, WaveOutcome::TimedOut),
        })
        .collect()
}

pub fn build_default_state(config: &Config) -> Arc<SharedState> {
    Arc::new(SharedState::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::DetectorOutput;
    use crate::errors::DetectionError;
    use crate::model::RiskBand;
    use std::collections::HashMap;

    struct FaultyDetector;

    #[async_trait::async_trait]
    impl Detector for FaultyDetector {
        fn name(&self) -> &'static str {
            "faulty"
        }

        fn priority(&self) -> i32 {
            1
        }

        async fn contribute(&self, _ctx: &DetectorContext<'_>) -> Result<DetectorOutput, DetectionError> {
            Err(DetectionError::StoreDegraded("reputation store unreachable".into()))
        }
    }

    fn blank_request() -> RequestSnapshot {
        RequestSnapshot {
            method: "GET".into(),
            path: "/".into(),
            query: "".into(),
            headers: Vec::new(),
            remote_ip: "198.51.100.1".into(),
            user_agent: "curl/8.4.0".into(),
            tls_ja3: None,
            tls_ja3s: None,
            cookies: HashMap::new(),
            body_excerpt: String::new(),
            referer: None,
            client_fingerprint: None,
        }
    }

    #[tokio::test]
    async fn a_faulted_required_detector_falls_back_to_the_safe_default_verdict() {
        let config = Config::default();
        let state = SharedState::new(&config);
        let orchestrator = Orchestrator::new(vec![Box::new(FaultyDetector)], config, state);

        let result = orchestrator.detect(&blank_request(), "orc-1".into()).await;

        // No contributions were ever applied since the only detector
        // faulted instead of completing — the verdict is the fail-open
        // default, never an abort or a panic.
        assert_eq!(result.evidence.risk_band, RiskBand::Unknown);
    }
}
