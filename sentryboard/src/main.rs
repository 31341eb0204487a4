// src/main.rs
//
// sentryboard — inline HTTP bot-detection orchestrator
//
// Three operational modes, same split the teacher's CLI makes between live
// capture, tailing a log, and replaying one:
//   serve   — run the TCP query API + metrics endpoint, detecting in-process
//   tail    — tail a JSONL request-snapshot log file (staging/shadow mode)
//   replay  — replay a captured log at scaled speed (testing/research)
//   eval    — run the labeled-dataset evaluation harness

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sentryboard::action_sink::ActionSink;
use sentryboard::blackboard::Orchestrator;
use sentryboard::config::Config;
use sentryboard::detectors::default_registry;
use sentryboard::eval::{report, Evaluator};
use sentryboard::grpc_api::QueryServer;
use sentryboard::learning::LearningBus;
use sentryboard::load_shedder::LoadShedder;
use sentryboard::model::RequestSnapshot;
use sentryboard::otel::{MetricsServer, SentryboardMetrics};
use sentryboard::state::SharedState;

#[derive(Parser)]
#[command(
    name = "sentryboard",
    about = "Inline HTTP bot-detection orchestrator",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/sentryboard_feed.jsonl", help = "JSONL request-log path (tail/replay/eval modes)")]
    path: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, default_value = "/tmp/sentryboard_output", help = "Action-sink audit log directory")]
    output: PathBuf,

    #[arg(long, default_value = "7443", help = "Query API port (serve mode)")]
    query_port: u16,

    #[arg(long, default_value = "9091", help = "Metrics endpoint port (serve mode)")]
    metrics_port: u16,

    #[arg(long, default_value = "0.7", help = "Alert threshold for eval mode")]
    eval_threshold: f32,

    #[arg(long, help = "Path to a TOML/JSON config file; defaults if absent")]
    config: Option<PathBuf>,
}

#[derive(Clone, PartialEq, ValueEnum)]
enum Mode {
    Serve,
    Tail,
    Replay,
    Eval,
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let config = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)?;
            if p.extension().and_then(|e| e.to_str()) == Some("json") {
                serde_json::from_str(&text)?
            } else {
                toml::from_str(&text)?
            }
        }
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

struct Pipeline {
    orchestrator: Arc<Orchestrator>,
    sink: Arc<ActionSink>,
    shedder: Arc<LoadShedder>,
    metrics: Arc<SentryboardMetrics>,
}

impl Pipeline {
    fn new(config: Config, state: Arc<SharedState>, learning: Arc<LearningBus>, output: PathBuf) -> Result<Self> {
        spawn_cluster_sweeper(Arc::clone(&state), config.cluster.interval_seconds);

        let orchestrator = Arc::new(
            Orchestrator::new(default_registry(), config, (*state).clone()).with_learning_bus(learning),
        );
        Ok(Self {
            orchestrator,
            sink: Arc::new(ActionSink::new(output)?),
            shedder: LoadShedder::new(state),
            metrics: SentryboardMetrics::new(),
        })
    }

    async fn process(&self, request: RequestSnapshot, request_id: String, queue_depth: usize) {
        if !self.shedder.should_process(&request, queue_depth) {
            self.metrics.record_shed();
            return;
        }

        let started = std::time::Instant::now();
        let result = self.orchestrator.detect(&request, request_id.clone()).await;
        self.metrics.record_latency_ms(started.elapsed().as_secs_f64() * 1000.0);
        self.metrics.record_verdict(&result.evidence);

        self.sink
            .record(&request_id, &request.path, &request.method, &result.action, &result.evidence)
            .await;

        print_verdict(&request_id, &result);
    }
}

/// Background cluster recompute on `cluster.interval_seconds` (§3
/// Lifecycles: "clusters are recomputed on a cadence"). The teacher has no
/// equivalent standalone sweeper task — its `StateStore::update_clusters`
/// runs inline off the event-ingestion path — but the cluster engine here
/// is explicitly designed around a periodic background recompute, so it
/// gets its own task rather than piggybacking on request volume.
fn spawn_cluster_sweeper(state: Arc<SharedState>, interval_seconds: u64) {
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds.max(1)));
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            state.cluster.recompute();
        }
    });
}

fn print_verdict(request_id: &str, result: &sentryboard::blackboard::DetectResult) {
    let (color, icon) = match result.evidence.risk_band {
        sentryboard::model::RiskBand::VeryHigh | sentryboard::model::RiskBand::High => ("\x1b[91;1m", "\u{1f534}"),
        sentryboard::model::RiskBand::Medium | sentryboard::model::RiskBand::Elevated => ("\x1b[93;1m", "\u{1f7e1}"),
        _ => ("\x1b[92m", "\u{1f7e2}"),
    };
    let reset = "\x1b[0m";
    println!(
        "{}{} {} -> {:?}{}  prob={:.3} conf={:.3}  bot={}",
        color,
        icon,
        request_id,
        result.action,
        reset,
        result.evidence.bot_probability,
        result.evidence.confidence,
        result.evidence.primary_bot_name.as_deref().unwrap_or("-"),
    );
}

async fn tail_jsonl(path: PathBuf, tx: mpsc::Sender<RequestSnapshot>, seek_end: bool) -> Result<()> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    if seek_end {
        while lines.next_line().await?.is_some() {}
    }

    info!("tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RequestSnapshot>(&line) {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("parse error: {}", e),
                }
            }
            None => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
        }
    }
    Ok(())
}

async fn replay_jsonl(path: PathBuf, tx: mpsc::Sender<RequestSnapshot>, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await?;
    let mut snapshots: Vec<RequestSnapshot> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(snapshot) = serde_json::from_str::<RequestSnapshot>(line) {
            snapshots.push(snapshot);
        }
    }

    if snapshots.is_empty() {
        return Ok(());
    }

    let base_wall = std::time::Instant::now();
    let step = std::time::Duration::from_secs_f64((1.0 / speed.max(0.001)).min(1.0));

    for (i, snapshot) in snapshots.into_iter().enumerate() {
        let target = base_wall + step * i as u32;
        let now = std::time::Instant::now();
        if target > now {
            tokio::time::sleep(target - now).await;
        }
        if tx.send(snapshot).await.is_err() {
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sentryboard=info".parse()?))
        .compact()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if cli.mode == Mode::Eval {
        let state = Arc::new(SharedState::new(&config));
        let learning = Arc::new(LearningBus::spawn(config.learning.capacity, state.clone()));
        let orchestrator = Arc::new(
            Orchestrator::new(default_registry(), config.clone(), (*state).clone()).with_learning_bus(learning),
        );
        let evaluator = Evaluator::new(cli.eval_threshold);
        let result = evaluator.run_dataset(&cli.path, orchestrator).await?;
        report::print_markdown(&result);
        return Ok(());
    }

    let state = Arc::new(SharedState::new(&config));
    let learning = Arc::new(LearningBus::spawn(config.learning.capacity, state.clone()));
    let pipeline = Arc::new(Pipeline::new(config, state, learning, cli.output.clone())?);

    match cli.mode {
        Mode::Serve => {
            let query_addr: SocketAddr = ([127, 0, 0, 1], cli.query_port).into();
            let metrics_addr: SocketAddr = ([127, 0, 0, 1], cli.metrics_port).into();

            let query_server = Arc::new(QueryServer::new(Arc::clone(&pipeline.orchestrator), query_addr));
            tokio::spawn(query_server.serve());

            let metrics_server = Arc::new(MetricsServer::new(Arc::clone(&pipeline.metrics), metrics_addr));
            tokio::spawn(metrics_server.serve());

            info!("serving query API on {} and metrics on {}", query_addr, metrics_addr);
            println!("Press Ctrl+C to stop.");
            tokio::signal::ctrl_c().await?;
        }
        Mode::Tail | Mode::Replay => {
            let (tx, mut rx) = mpsc::channel::<RequestSnapshot>(16_384);
            let path = cli.path.clone();

            match cli.mode {
                Mode::Tail => {
                    tokio::spawn(async move { tail_jsonl(path, tx, true).await.ok(); });
                }
                Mode::Replay => {
                    let speed = cli.speed;
                    tokio::spawn(async move { replay_jsonl(path, tx, speed).await.ok(); });
                }
                Mode::Serve | Mode::Eval => unreachable!("handled above"),
            }

            println!("Press Ctrl+C to stop.\n");

            let mut seq: u64 = 0;
            while let Some(snapshot) = rx.recv().await {
                let p = Arc::clone(&pipeline);
                let request_id = format!("{}-{}", Utc::now().timestamp_millis(), seq);
                seq += 1;
                tokio::spawn(async move { p.process(snapshot, request_id, 0).await; });
            }
        }
        Mode::Eval => unreachable!("handled above"),
    }

    Ok(())
}
