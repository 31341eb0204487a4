// src/action_sink.rs
//
// Host-integration boundary (§4.7: "the policy decision is handed to an
// action sink; what the sink does with `Block`/`Tarpit`/etc. is host
// policy, not this crate's concern"). Adapted from the teacher's
// `engine/dispatcher.rs`: JSONL audit trail plus per-action-kind routing
// into separate output files, swapped from enforcement-action kinds to
// the policy `Action` closed set.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::blackboard::Action;
use crate::errors::DetectionError;
use crate::model::AggregatedEvidence;

#[derive(Debug, Serialize)]
struct AuditRecord {
    request_id: String,
    path: String,
    method: String,
    action: String,
    bot_probability: f32,
    risk_band: String,
    primary_bot_name: Option<String>,
    timestamp: DateTime<Utc>,
}

pub struct ActionSink {
    out: PathBuf,
}

impl ActionSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, DetectionError> {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out)
            .map_err(|e| DetectionError::ConfigurationError(format!("cannot create output dir: {e}")))?;
        Ok(Self { out })
    }

    /// Records the policy decision to the audit log and, for actions that
    /// need host follow-up, to a dedicated queue file. Never fails the
    /// request path (§7: detection failures degrade, they don't propagate);
    /// I/O errors are logged and swallowed.
    pub async fn record(&self, request_id: &str, path: &str, method: &str, action: &Action, evidence: &AggregatedEvidence) {
        let record = AuditRecord {
            request_id: request_id.to_string(),
            path: path.to_string(),
            method: method.to_string(),
            action: format!("{action:?}"),
            bot_probability: evidence.bot_probability,
            risk_band: format!("{:?}", evidence.risk_band),
            primary_bot_name: evidence.primary_bot_name.clone(),
            timestamp: Utc::now(),
        };

        let line = match serde_json::to_string(&record) {
            Ok(s) => s + "\n",
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize audit record");
                return;
            }
        };

        if let Err(e) = self.write("audit_log.jsonl", &line).await {
            tracing::warn!(error = %e, "failed to write audit log");
        }

        let queue_file = match action {
            Action::Block(_) => Some("blocked.jsonl"),
            Action::Challenge => Some("challenged.jsonl"),
            Action::Tarpit(_) => Some("tarpitted.jsonl"),
            Action::Redirect(_) | Action::Holodeck(_) => Some("diverted.jsonl"),
            Action::Allow | Action::LogOnly | Action::AddHeaders => None,
        };

        if let Some(file) = queue_file {
            if let Err(e) = self.write(file, &line).await {
                tracing::warn!(error = %e, file, "failed to write action queue file");
            }
            info!(request_id, action = %format!("{action:?}"), "bot action dispatched");
        }
    }

    async fn write(&self, file: &str, content: &str) -> Result<(), std::io::Error> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(file))
            .await?;
        f.write_all(content.as_bytes()).await
    }

    fn path_for(&self, file: &str) -> PathBuf {
        Path::new(&self.out).join(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RiskBand;
    use std::collections::{HashMap, HashSet};

    fn evidence() -> AggregatedEvidence {
        AggregatedEvidence {
            bot_probability: 0.9,
            confidence: 0.8,
            risk_band: RiskBand::VeryHigh,
            category_breakdown: HashMap::new(),
            contributing_detectors: HashSet::new(),
            primary_bot_name: Some("curl".into()),
            primary_bot_type: None,
            ledger: Vec::new(),
        }
    }

    #[tokio::test]
    async fn records_block_to_queue_and_audit() {
        let dir = std::env::temp_dir().join(format!("sentryboard-test-{}", std::process::id()));
        let sink = ActionSink::new(&dir).unwrap();
        sink.record("r1", "/api", "GET", &Action::Block(403), &evidence()).await;

        let audit = tokio::fs::read_to_string(dir.join("audit_log.jsonl")).await.unwrap();
        assert!(audit.contains("r1"));
        let blocked = tokio::fs::read_to_string(dir.join("blocked.jsonl")).await.unwrap();
        assert!(blocked.contains("Block"));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
