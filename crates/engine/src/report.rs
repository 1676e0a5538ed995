//! Upstream outcome reporting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tether_core::{AgentError, Command};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ActionStatus {
    Started,
    Success,
    Failure { kind: String, reason: String },
}

impl ActionStatus {
    pub fn failure(e: &AgentError) -> Self { ActionStatus::Failure { kind: e.tag().to_string(), reason: e.to_string() } }

    pub fn is_terminal(&self) -> bool { !matches!(self, ActionStatus::Started) }
}

/// One step of a command as seen upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "parentJobID", default, skip_serializing_if = "String::is_empty")]
    pub parent_job_id: String,
    #[serde(rename = "actionIDN")]
    pub action_index: u32,
    #[serde(rename = "commandName")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(flatten)]
    pub status: ActionStatus,
}

impl ActionReport {
    pub fn new(cmd: &Command, action_index: u32, target: Option<String>, status: ActionStatus) -> Self {
        Self {
            job_id: cmd.job_id().to_string(),
            parent_job_id: cmd.job_tracking.parent_job_id.clone(),
            action_index,
            command: cmd.name.clone(),
            target,
            status,
        }
    }
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, report: ActionReport);
}

/// Writes reports to the tracing pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn report(&self, r: ActionReport) {
        let target = r.target.as_deref().unwrap_or("-");
        match &r.status {
            ActionStatus::Started => info!(job_id = %r.job_id, action = r.action_index, command = %r.command, target = %target, "action started"),
            ActionStatus::Success => info!(job_id = %r.job_id, action = r.action_index, command = %r.command, target = %target, "action succeeded"),
            ActionStatus::Failure { kind, reason } => {
                warn!(job_id = %r.job_id, action = r.action_index, command = %r.command, target = %target, kind = %kind, reason = %reason, "action failed")
            }
        }
    }
}

/// Forwards reports into a channel; a closed channel drops them.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<ActionReport>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::Sender<ActionReport>) -> Self { Self { tx } }

    pub fn channel(cap: usize) -> (Self, mpsc::Receiver<ActionReport>) {
        let (tx, rx) = mpsc::channel(cap.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Reporter for ChannelReporter {
    async fn report(&self, r: ActionReport) {
        if self.tx.send(r).await.is_err() {
            warn!("report channel closed; report dropped");
        }
    }
}
