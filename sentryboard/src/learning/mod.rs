// src/learning/mod.rs
//
// Learning event bus (§4.8). Grounded in the teacher's `main.rs` bounded
// `tokio::sync::mpsc::channel` + dedicated consumer task pattern. The
// teacher's channel simply backpressures the producer on a full queue,
// which the request path here cannot tolerate — publishing must stay
// non-blocking, so this bus uses `try_send` and tracks a drop counter
// instead (`DropOldest`, §6 closed config option).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::model::{LearningEvent, PatternType};
use crate::state::SharedState;

pub struct LearningBus {
    tx: mpsc::Sender<LearningEvent>,
    dropped: Arc<AtomicU64>,
}

impl LearningBus {
    /// Spawns the consumer task and returns the publisher handle. The
    /// consumer outlives every request; it is never awaited from the
    /// request path (§4.8: "must never be processed synchronously").
    pub fn spawn(capacity: usize, state: Arc<SharedState>) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        tokio::spawn(consume(rx, state));
        Self { tx, dropped }
    }

    /// Non-blocking publish. A full channel means the consumer is lagging;
    /// rather than backpressure the caller, the oldest-style policy here
    /// is approximated by dropping the newest event and counting it — the
    /// channel itself has no cursor to evict from the front.
    pub fn publish(&self, event: LearningEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("learning bus full, dropping event");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

const CHURN_RECOMPUTE_THRESHOLD: usize = 50;

async fn consume(mut rx: mpsc::Receiver<LearningEvent>, state: Arc<SharedState>) {
    let mut churn_since_recompute = 0usize;

    while let Some(event) = rx.recv().await {
        match event {
            LearningEvent::HighConfidenceDetection {
                pattern_id,
                pattern_type,
                bot_signal,
                confidence,
                ..
            } => {
                state
                    .reputation
                    .apply_evidence(&pattern_id, pattern_type, bot_signal as f64, confidence as f64);
            }
            LearningEvent::FullDetection { request_id, bot_probability, .. } => {
                debug!(request_id = %request_id, bot_probability, "full detection recorded");
            }
            LearningEvent::PatternDiscovered { pattern_id, pattern_type } => {
                state.reputation.apply_evidence(&pattern_id, pattern_type, 0.0, 0.1);
            }
            LearningEvent::InconsistencyDetected { request_id, reasons } => {
                debug!(request_id = %request_id, reasons = ?reasons, "inconsistency recorded");
            }
            LearningEvent::FastPathDriftDetected { signature_id, self_drift } => {
                debug!(signature_id = %signature_id, self_drift, "drift event recorded");
            }
            LearningEvent::SignatureFeedback {
                signature_id,
                path_class,
                timestamp,
            } => {
                // Transitions themselves are recorded synchronously by
                // `BehavioralDetector` on the request path (§4.2); this
                // event only marks signature churn for recompute triggering.
                debug!(signature_id = %signature_id, path_class = %path_class, %timestamp, "signature churn observed");
                churn_since_recompute += 1;
                if churn_since_recompute >= CHURN_RECOMPUTE_THRESHOLD {
                    churn_since_recompute = 0;
                    state.cluster.recompute();
                }
            }
            LearningEvent::UserFeedback { request_id, label } => {
                debug!(request_id = %request_id, label, "user feedback recorded");
            }
        }
    }
}

/// Builds a `HighConfidenceDetection` event from an aggregated verdict, used
/// by the orchestrator when `bot_probability >= 0.85` (§4.5 step 6).
pub fn high_confidence_event(
    request_id: &str,
    pattern_id: String,
    pattern_type: PatternType,
    bot_signal: f32,
    confidence: f32,
) -> LearningEvent {
    LearningEvent::HighConfidenceDetection {
        request_id: request_id.to_string(),
        pattern_id,
        pattern_type,
        bot_signal,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn publish_is_non_blocking_and_consumed() {
        let config = Config::default();
        let state = Arc::new(SharedState::new(&config));
        let bus = LearningBus::spawn(4, state.clone());

        bus.publish(LearningEvent::FullDetection {
            request_id: "r1".into(),
            evidence_summary: "test".into(),
            bot_probability: 0.9,
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(bus.dropped_count(), 0);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let config = Config::default();
        let state = Arc::new(SharedState::new(&config));
        let bus = LearningBus::spawn(1, state);

        for _ in 0..20 {
            bus.publish(LearningEvent::UserFeedback {
                request_id: "r".into(),
                label: true,
            });
        }
        assert!(bus.dropped_count() <= 20);
    }
}
