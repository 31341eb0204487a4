// src/otel.rs
//
// OpenTelemetry/Prometheus-style metrics exporter (ambient stack, §1: a
// Non-goal on shipping to an external collector does not exclude exposing
// local metrics). Structure — atomic counters/gauges, hand-rolled
// Prometheus text exposition, a bare `TcpListener` loop instead of a web
// framework — copied directly from the teacher's `otel.rs`.
//
// Metrics exposed:
//
//   sentryboard_requests_processed_total        Counter — total requests scored
//   sentryboard_risk_band_total{band}            Counter — verdicts by risk band
//   sentryboard_detector_mean_delta{detector}     Gauge   — per-detector mean contribution
//   sentryboard_aggregation_latency_ms            Histogram — time to produce a verdict
//   sentryboard_shed_total                        Counter — requests shed by the load shedder
//   sentryboard_learning_events_dropped_total     Counter — learning bus overflow drops
//
// Prometheus endpoint: GET /metrics (default port 9091)

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::info;

use crate::model::{AggregatedEvidence, DetectionContribution, RiskBand};

pub struct SentryboardMetrics {
    pub requests_processed: AtomicU64,
    pub risk_very_low: AtomicU64,
    pub risk_low: AtomicU64,
    pub risk_elevated: AtomicU64,
    pub risk_medium: AtomicU64,
    pub risk_high: AtomicU64,
    pub risk_very_high: AtomicU64,
    pub risk_unknown: AtomicU64,
    pub shed_total: AtomicU64,
    pub learning_events_dropped: AtomicU64,
    /// Per-detector delta sums + counts for mean-contribution export.
    pub detector_delta_sum: std::sync::Mutex<HashMap<String, (f64, u64)>>,
    /// Aggregation latency buckets, 10ms-wide up to 100ms.
    pub latency_buckets: [AtomicU64; 10],
}

impl SentryboardMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests_processed: AtomicU64::new(0),
            risk_very_low: AtomicU64::new(0),
            risk_low: AtomicU64::new(0),
            risk_elevated: AtomicU64::new(0),
            risk_medium: AtomicU64::new(0),
            risk_high: AtomicU64::new(0),
            risk_very_high: AtomicU64::new(0),
            risk_unknown: AtomicU64::new(0),
            shed_total: AtomicU64::new(0),
            learning_events_dropped: AtomicU64::new(0),
            detector_delta_sum: std::sync::Mutex::new(HashMap::new()),
            latency_buckets: Default::default(),
        })
    }

    pub fn record_verdict(&self, evidence: &AggregatedEvidence) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        match evidence.risk_band {
            RiskBand::VeryLow => &self.risk_very_low,
            RiskBand::Low => &self.risk_low,
            RiskBand::Elevated => &self.risk_elevated,
            RiskBand::Medium => &self.risk_medium,
            RiskBand::High => &self.risk_high,
            RiskBand::VeryHigh => &self.risk_very_high,
            RiskBand::Unknown => &self.risk_unknown,
        }
        .fetch_add(1, Ordering::Relaxed);

        for c in &evidence.ledger {
            self.record_contribution(c);
        }
    }

    fn record_contribution(&self, c: &DetectionContribution) {
        if let Ok(mut map) = self.detector_delta_sum.lock() {
            let entry = map.entry(c.detector_name.clone()).or_insert((0.0, 0));
            entry.0 += c.confidence_delta as f64;
            entry.1 += 1;
        }
    }

    pub fn record_latency_ms(&self, ms: f64) {
        let bucket = ((ms / 10.0) as usize).min(9);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shed(&self) {
        self.shed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_learning_drop(&self) {
        self.learning_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn prometheus_text(&self) -> String {
        let mut out = String::with_capacity(4096);

        macro_rules! counter {
            ($name:expr, $help:expr, $val:expr) => {
                out.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
                    $name, $help, $name, $name, $val
                ));
            };
        }

        counter!(
            "sentryboard_requests_processed_total",
            "Total requests scored",
            self.requests_processed.load(Ordering::Relaxed)
        );

        out.push_str("# HELP sentryboard_risk_band_total Verdicts by risk band\n");
        out.push_str("# TYPE sentryboard_risk_band_total counter\n");
        for (band, val) in [
            ("very_low", &self.risk_very_low),
            ("low", &self.risk_low),
            ("elevated", &self.risk_elevated),
            ("medium", &self.risk_medium),
            ("high", &self.risk_high),
            ("very_high", &self.risk_very_high),
            ("unknown", &self.risk_unknown),
        ] {
            out.push_str(&format!(
                "sentryboard_risk_band_total{{band=\"{}\"}} {}\n",
                band,
                val.load(Ordering::Relaxed)
            ));
        }

        counter!(
            "sentryboard_shed_total",
            "Requests dropped by load shedder",
            self.shed_total.load(Ordering::Relaxed)
        );
        counter!(
            "sentryboard_learning_events_dropped_total",
            "Learning bus events dropped on overflow",
            self.learning_events_dropped.load(Ordering::Relaxed)
        );

        out.push_str("# HELP sentryboard_detector_mean_delta Mean confidence delta per detector\n");
        out.push_str("# TYPE sentryboard_detector_mean_delta gauge\n");
        if let Ok(map) = self.detector_delta_sum.lock() {
            for (detector, (sum, count)) in map.iter() {
                let mean = if *count > 0 { sum / *count as f64 } else { 0.0 };
                out.push_str(&format!(
                    "sentryboard_detector_mean_delta{{detector=\"{}\"}} {:.4}\n",
                    detector, mean
                ));
            }
        }

        out.push_str("# HELP sentryboard_aggregation_latency_ms_bucket Aggregation latency distribution (10ms-wide buckets)\n");
        out.push_str("# TYPE sentryboard_aggregation_latency_ms_bucket counter\n");
        for (i, bucket) in self.latency_buckets.iter().enumerate() {
            out.push_str(&format!(
                "sentryboard_aggregation_latency_ms_bucket{{le=\"{:.0}\"}} {}\n",
                (i + 1) as f64 * 10.0,
                bucket.load(Ordering::Relaxed)
            ));
        }

        out
    }
}

pub struct MetricsServer {
    pub metrics: Arc<SentryboardMetrics>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<SentryboardMetrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("metrics endpoint listening on {}", self.addr);

        loop {
            let (mut stream, _) = listener.accept().await?;
            let metrics = Arc::clone(&self.metrics);

            tokio::spawn(async move {
                let body = metrics.prometheus_text();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(), body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    }
}
