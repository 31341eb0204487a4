// src/grpc_api.rs
//
// Lightweight query API (§6: "a gateway can call `detect()` without linking
// the library directly"). Same length-prefixed JSON-over-TCP framing the
// teacher's hand-rolled gRPC-substitute uses in `grpc_api.rs` — kept to
// avoid a protoc build dependency, same tradeoff the teacher made.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::blackboard::{Action, Orchestrator};
use crate::model::{RequestSnapshot, RiskBand};

const MAX_FRAME_BYTES: usize = 1_048_576;

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectRequest {
    pub request_id: String,
    pub snapshot: RequestSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectResponse {
    pub request_id: String,
    pub bot_probability: f32,
    pub confidence: f32,
    pub risk_band: RiskBand,
    pub primary_bot_name: Option<String>,
    pub action: String,
}

pub struct QueryServer {
    orchestrator: Arc<Orchestrator>,
    addr: SocketAddr,
}

impl QueryServer {
    pub fn new(orchestrator: Arc<Orchestrator>, addr: SocketAddr) -> Self {
        Self { orchestrator, addr }
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("query API listening on {}", self.addr);

        loop {
            let (stream, peer) = listener.accept().await?;
            let srv = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = srv.handle_connection(stream).await {
                    warn!("query API connection error from {}: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let mut len_buf = [0u8; 4];
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_BYTES {
                anyhow::bail!("frame too large: {} bytes", len);
            }

            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).await?;

            let req: DetectRequest = serde_json::from_slice(&body)?;
            let resp = self.detect(req).await;
            let resp_bytes = serde_json::to_vec(&resp)?;

            stream.write_all(&(resp_bytes.len() as u32).to_le_bytes()).await?;
            stream.write_all(&resp_bytes).await?;
        }
        Ok(())
    }

    async fn detect(&self, req: DetectRequest) -> DetectResponse {
        let result = self.orchestrator.detect(&req.snapshot, req.request_id.clone()).await;
        let action = match result.action {
            Action::Allow => "allow".to_string(),
            Action::LogOnly => "log_only".to_string(),
            Action::AddHeaders => "add_headers".to_string(),
            Action::Challenge => "challenge".to_string(),
            Action::Block(status) => format!("block:{status}"),
            Action::Redirect(url) => format!("redirect:{url}"),
            Action::Holodeck(url) => format!("holodeck:{url}"),
            Action::Tarpit(delay_ms) => format!("tarpit:{delay_ms}"),
        };

        DetectResponse {
            request_id: req.request_id,
            bot_probability: result.evidence.bot_probability,
            confidence: result.evidence.confidence,
            risk_band: result.evidence.risk_band,
            primary_bot_name: result.evidence.primary_bot_name,
            action,
        }
    }
}
