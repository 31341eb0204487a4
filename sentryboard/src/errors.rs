// src/errors.rs
//
// Closed error taxonomy for the detection orchestrator. Every variant here
// is recovered locally somewhere in the pipeline — the orchestrator's public
// `detect()` entry point never returns `Err` to its caller. These types exist
// so every recovery site can log a specific, typed reason instead of a bare
// string.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum DetectionError {
    /// A detector's `contribute()` exceeded its `execution_timeout`.
    /// Optional detectors: treated as `Skipped`. Non-optional: folded into
    /// the verdict with zero weight.
    #[error("detector '{detector}' timed out after {budget_ms}ms")]
    DetectorTimeout { detector: String, budget_ms: u64 },

    /// A detector panicked or returned an internal error. Always logged
    /// with detector name + reason; never aborts the request.
    #[error("detector '{detector}' faulted: {reason}")]
    DetectorFault { detector: String, reason: String },

    /// The orchestrator's hard deadline was reached before all waves
    /// completed. The verdict is produced from whatever contributions exist.
    #[error("hard deadline of {hard_deadline_ms}ms exceeded")]
    DeadlineExceeded { hard_deadline_ms: u64 },

    /// Detected at startup. Detection stays disabled until config is valid.
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),

    /// A backing store (reputation / Markov tracker) is unavailable.
    /// Detectors depending on it emit no contribution; the orchestrator
    /// continues.
    #[error("store degraded: {0}")]
    StoreDegraded(String),

    /// An external call (LLM classifier, geo lookup) failed or was refused.
    /// Same treatment as `DetectorTimeout`.
    #[error("external call '{call}' failed: {reason}")]
    ExternalCallFailure { call: String, reason: String },
}

impl DetectionError {
    /// Whether this error should cause a non-optional detector's failure to
    /// fall back to the safe default verdict, per §4.4 failure semantics.
    pub fn is_fatal_for_required_detector(&self) -> bool {
        matches!(
            self,
            DetectionError::DetectorFault { .. } | DetectionError::DetectorTimeout { .. }
        )
    }
}
