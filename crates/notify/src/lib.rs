//! Tether Notify: routes inbound notifications to the command engine or the
//! safe-mode consumer, and keeps the connection alive.
//!
//! The transport itself is out of scope: it hands us byte payloads over a
//! channel and exposes a ping primitive through [`Connector`].

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tether_core::{AgentConfig, AgentError, AgentResult, Command, Designator, JobTracking, SafeMode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub mod envelope;
mod keepalive;

pub use envelope::{decode, Envelope, DEST_KUBESCAPE, DEST_SAFE_MODE};
pub use keepalive::{keepalive, notification_url, Connector, COMPONENT, NOTIFICATION_PATH};

/// Posture-scan request as sent to the `kubescape` destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyNotification {
    #[serde(rename = "notificationType")]
    pub notification_type: String,
    #[serde(default)]
    pub designators: Designator,
    #[serde(rename = "jobID", default)]
    pub job_id: String,
    #[serde(default)]
    pub rules: Json,
}

impl PolicyNotification {
    pub fn into_command(self) -> Command {
        Command {
            name: self.notification_type,
            designators: vec![self.designators],
            job_tracking: JobTracking { job_id: self.job_id, ..Default::default() },
            args: BTreeMap::from([("rules".to_string(), self.rules)]),
            ..Default::default()
        }
    }
}

/// Where a decoded envelope goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Command(Command),
    SafeMode(SafeMode),
    Ignored(String),
}

/// Classify a decoded envelope.
pub fn route(env: Envelope) -> AgentResult<Routed> {
    match env.dest.as_str() {
        DEST_KUBESCAPE => {
            let pn: PolicyNotification =
                serde_json::from_value(env.notification).map_err(|e| AgentError::Decode(format!("policy notification: {}", e)))?;
            if pn.notification_type.is_empty() {
                return Err(AgentError::Decode("policy notification without notificationType".into()));
            }
            Ok(Routed::Command(pn.into_command()))
        }
        "" | DEST_SAFE_MODE => {
            let mut sm: SafeMode =
                serde_json::from_value(env.notification).map_err(|e| AgentError::Decode(format!("safe mode: {}", e)))?;
            sm.fill_defaults();
            Ok(Routed::SafeMode(sm))
        }
        other => Ok(Routed::Ignored(other.to_string())),
    }
}

/// Counters for one routing session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub received: u64,
    pub commands: u64,
    pub safe_mode: u64,
    pub ignored: u64,
    pub decode_errors: u64,
}

pub struct Router {
    commands: mpsc::Sender<Command>,
    safe_mode: mpsc::Sender<SafeMode>,
}

impl Router {
    pub fn new(commands: mpsc::Sender<Command>, safe_mode: mpsc::Sender<SafeMode>) -> Self { Self { commands, safe_mode } }

    /// Router plus the receiving ends of both bounded queues.
    pub fn with_channels(cfg: &AgentConfig) -> (Self, mpsc::Receiver<Command>, mpsc::Receiver<SafeMode>) {
        let (ctx, crx) = mpsc::channel(cfg.command_queue_cap.max(1));
        let (stx, srx) = mpsc::channel(cfg.safe_mode_queue_cap.max(1));
        (Self::new(ctx, stx), crx, srx)
    }

    /// Decode, route and forward one payload. Waits for queue capacity.
    pub async fn handle(&self, payload: &[u8]) -> AgentResult<Routed> {
        let routed = route(decode(payload)?)?;
        match &routed {
            Routed::Command(cmd) => {
                info!(command = %cmd.name, job_id = %cmd.job_id(), "notification routed to command queue");
                self.commands.send(cmd.clone()).await.map_err(|_| AgentError::Transport("command queue closed".into()))?;
            }
            Routed::SafeMode(sm) => {
                info!(pod = %sm.pod_name, instance = %sm.instance_id, action = %sm.action, "notification routed to safe-mode queue");
                self.safe_mode.send(sm.clone()).await.map_err(|_| AgentError::Transport("safe-mode queue closed".into()))?;
            }
            Routed::Ignored(dest) => warn!(dest = %dest, "notification for unknown destination dropped"),
        }
        Ok(routed)
    }

    /// Route payloads until the inbound stream ends or a consumer goes away.
    pub async fn run(self, mut inbound: mpsc::Receiver<Vec<u8>>) -> RouterStats {
        let mut stats = RouterStats::default();
        while let Some(payload) = inbound.recv().await {
            stats.received += 1;
            counter!("notifications_received_total", 1u64);
            match self.handle(&payload).await {
                Ok(Routed::Command(_)) => stats.commands += 1,
                Ok(Routed::SafeMode(_)) => stats.safe_mode += 1,
                Ok(Routed::Ignored(_)) => stats.ignored += 1,
                Err(AgentError::Decode(why)) => {
                    stats.decode_errors += 1;
                    counter!("notification_decode_errors_total", 1u64);
                    warn!(error = %why, bytes = payload.len(), "dropping undecodable notification");
                }
                Err(e) => {
                    warn!(error = %e, "router stopping");
                    break;
                }
            }
        }
        debug!(?stats, "router finished");
        stats
    }
}
