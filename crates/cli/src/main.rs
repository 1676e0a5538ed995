use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tether_core::{AgentConfig, Command, Vocabulary, CRON_JOB_NAME_LIMIT};
use tether_cronjob::JobLifecycle;
use tether_engine::{consume_safe_mode, ActionReport, ActionStatus, ChannelReporter, Engine, LogReporter, Reporter};
use tether_kubehub::{ClusterClient, KubeCluster};
use tether_notify::{keepalive, notification_url, Connector, Router};
use tether_ops::WorkloadMutator;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tetherctl", version, about = "Tether in-cluster control agent")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace holding trigger templates and CronJobs
    #[arg(long = "ns", global = true, env = "TETHER_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent; notification payloads are read from stdin, one per line
    Serve {
        /// Worker pool size
        #[arg(long, env = "TETHER_WORKERS")]
        workers: Option<usize>,
        /// Seconds between keepalive pings
        #[arg(long = "keepalive-secs", env = "TETHER_KEEPALIVE_SECS", value_parser = clap::value_parser!(u64).range(1..))]
        keepalive_secs: Option<u64>,
        /// Notification server host, e.g. wss://notify.example.com
        #[arg(long, env = "TETHER_NOTIFICATION_SERVER", default_value = "")]
        server: String,
        /// Customer GUID sent to the notification server
        #[arg(long, env = "TETHER_CUSTOMER_GUID", default_value = "")]
        customer: String,
    },
    /// Execute one command read from a JSON file
    Exec {
        #[arg(long = "file", short = 'f')]
        file: PathBuf,
    },
    /// Print the Kubernetes-safe form of a name
    Name {
        raw: String,
        #[arg(long = "limit", default_value_t = CRON_JOB_NAME_LIMIT)]
        limit: usize,
    },
}

fn init_tracing() {
    let env = std::env::var("TETHER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries pings and command output.
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TETHER_METRICS_ADDR") {
        match addr.parse::<std::net::SocketAddr>() {
            Ok(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            },
            Err(_) => warn!(addr = %addr, "invalid TETHER_METRICS_ADDR; expected host:port"),
        }
    }
}

/// Pings over stdout; stands in for the websocket ping frame.
struct StdoutConnector {
    out: Mutex<tokio::io::Stdout>,
}

#[async_trait]
impl Connector for StdoutConnector {
    async fn write_ping(&self) -> anyhow::Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(b"{\"type\":\"ping\"}\n").await.context("write ping")?;
        out.flush().await.context("flush ping")?;
        Ok(())
    }
}

async fn build_engine(cfg: &AgentConfig, reporter: Arc<dyn Reporter>) -> Result<Arc<Engine>> {
    let cluster: Arc<dyn ClusterClient> =
        Arc::new(KubeCluster::try_default(cfg.call_timeout()).await.context("connect to kubernetes")?);
    let vocab = Arc::new(Vocabulary::default());
    let mutator = Arc::new(WorkloadMutator::from_config(cluster.clone(), vocab.clone(), cfg));
    let jobs = Arc::new(JobLifecycle::new(cluster, vocab, cfg));
    Ok(Arc::new(Engine::new(mutator, jobs, reporter, cfg)))
}

async fn serve(cfg: AgentConfig, server: String, customer: String) -> Result<()> {
    match notification_url(&server, &customer, &cfg.cluster_name)? {
        Some(url) => info!(url = %url, "notification endpoint"),
        None => info!("no notification server configured; reading payloads from stdin"),
    }
    let engine = build_engine(&cfg, Arc::new(LogReporter)).await?;
    let (router, commands, safe_mode) = Router::with_channels(&cfg);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(cfg.command_queue_cap.max(1));

    let engine_task = tokio::spawn(engine.clone().run(commands));
    let safe_task = tokio::spawn(consume_safe_mode(safe_mode));
    let router_task = tokio::spawn(router.run(inbound_rx));

    let mut reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if inbound_tx.send(line.into_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
        info!("inbound stream closed");
    });

    let conn = StdoutConnector { out: Mutex::new(tokio::io::stdout()) };
    tokio::select! {
        _ = signal::ctrl_c() => info!("interrupt received; shutting down"),
        res = keepalive(&conn, cfg.keepalive()) => {
            if let Err(e) = res {
                error!(error = %e, "keepalive stopped");
            }
        }
        _ = &mut reader => {}
    }
    reader.abort();

    // Closing the inbound side drains router, engine and safe-mode consumer in order.
    let stats = router_task.await.context("router task")?;
    engine_task.await.context("engine task")?;
    let seen = safe_task.await.context("safe-mode task")?;
    info!(received = stats.received, commands = stats.commands, safe_mode = seen, decode_errors = stats.decode_errors, "agent stopped");
    Ok(())
}

fn render_report(r: &ActionReport) -> String {
    let target = r.target.as_deref().unwrap_or("-");
    match &r.status {
        ActionStatus::Started => format!("{} #{} {} {} started", r.job_id, r.action_index, r.command, target),
        ActionStatus::Success => format!("{} #{} {} {} ok", r.job_id, r.action_index, r.command, target),
        ActionStatus::Failure { kind, reason } => {
            format!("{} #{} {} {} FAILED [{}] {}", r.job_id, r.action_index, r.command, target, kind, reason)
        }
    }
}

async fn exec(cfg: AgentConfig, file: PathBuf, output: Output) -> Result<()> {
    let raw = std::fs::read(&file).with_context(|| format!("read {}", file.display()))?;
    let cmd: Command = serde_json::from_slice(&raw).with_context(|| format!("parse command from {}", file.display()))?;
    let (reporter, mut reports) = ChannelReporter::channel(64);
    let collector = tokio::spawn(async move {
        let mut all = Vec::new();
        while let Some(r) = reports.recv().await {
            all.push(r);
        }
        all
    });
    let engine = build_engine(&cfg, Arc::new(reporter)).await?;
    let res = engine.execute(cmd).await;
    drop(engine);
    let all = collector.await.context("report collector")?;
    match output {
        Output::Human => all.iter().filter(|r| r.status.is_terminal()).for_each(|r| println!("{}", render_report(r))),
        Output::Json => println!("{}", serde_json::to_string_pretty(&all)?),
    }
    res.context("command failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let mut cfg = AgentConfig::from_env();
    if let Some(ns) = cli.namespace.clone() {
        cfg.namespace = ns;
    }

    match cli.command {
        Commands::Serve { workers, keepalive_secs, server, customer } => {
            if let Some(w) = workers {
                cfg.workers = w;
            }
            if let Some(k) = keepalive_secs {
                cfg.keepalive_secs = k.max(1);
            }
            info!(namespace = %cfg.namespace, workers = cfg.workers, "serve invoked");
            serve(cfg, server, customer).await?;
        }
        Commands::Exec { file } => {
            info!(file = %file.display(), "exec invoked");
            exec(cfg, file, cli.output).await?;
        }
        Commands::Name { raw, limit } => {
            let name = tether_core::normalize(&raw, limit);
            match cli.output {
                Output::Human => println!("{}", name),
                Output::Json => println!("{}", serde_json::json!({ "raw": raw, "limit": limit, "name": name })),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_keepalive_interval_is_rejected() {
        let res = Cli::try_parse_from(["tetherctl", "serve", "--keepalive-secs", "0"]);
        assert!(res.is_err());
    }

    #[test]
    fn keepalive_interval_is_parsed() {
        let cli = Cli::try_parse_from(["tetherctl", "serve", "--keepalive-secs", "7"]).unwrap();
        match cli.command {
            Commands::Serve { keepalive_secs, .. } => assert_eq!(keepalive_secs, Some(7)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn failure_report_renders_kind_and_reason() {
        let r = ActionReport {
            job_id: "j1".into(),
            parent_job_id: String::new(),
            action_index: 2,
            command: "sign".into(),
            target: None,
            status: ActionStatus::Failure { kind: "not_found".into(), reason: "gone".into() },
        };
        assert_eq!(render_report(&r), "j1 #2 sign - FAILED [not_found] gone");
    }
}
