//! Tether Ops: workload mutation (INJECT / SIGN / RESTART / REMOVE).
//!
//! Template-bearing kinds are updated in place with a fresh read per attempt;
//! bare Pods are deleted and recreated from the mutated copy.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tether_core::vocab::UPDATE_TIME_FORMAT;
use tether_core::{AgentConfig, AgentError, AgentResult, ClusterError, Vocabulary, Wlid, WorkloadKind};
use tether_kubehub::{retry_if, ClusterClient, RetryConfig, Workload};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub mod transform;

pub use transform::{check_supported, mutate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Inject,
    Sign,
    Restart,
    Remove,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Inject => "inject",
            Operation::Sign => "sign",
            Operation::Restart => "restart",
            Operation::Remove => "remove",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Operation {
    type Err = AgentError;

    /// Accepts the wire command names; `update` is the legacy spelling of `inject`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inject" | "update" => Ok(Operation::Inject),
            "sign" => Ok(Operation::Sign),
            "restart" => Ok(Operation::Restart),
            "remove" => Ok(Operation::Remove),
            other => Err(AgentError::UnsupportedOperation(format!("unknown workload operation {:?}", other))),
        }
    }
}

/// Current time in the update-annotation format.
pub fn update_timestamp() -> String { chrono::Utc::now().format(UPDATE_TIME_FORMAT).to_string() }

/// Workload operations as seen by the command engine.
#[async_trait]
pub trait WorkloadOps: Send + Sync {
    /// Apply `op` to the workload named by `wlid`; returns the object as written.
    async fn apply(&self, wlid: &Wlid, op: Operation) -> AgentResult<Workload>;
}

pub struct WorkloadMutator {
    cluster: Arc<dyn ClusterClient>,
    vocab: Arc<Vocabulary>,
    retry: RetryConfig,
    pod_poll: Duration,
    pod_timeout: Duration,
}

impl WorkloadMutator {
    pub fn new(cluster: Arc<dyn ClusterClient>, vocab: Arc<Vocabulary>) -> Self {
        Self::from_config(cluster, vocab, &AgentConfig::default())
    }

    pub fn from_config(cluster: Arc<dyn ClusterClient>, vocab: Arc<Vocabulary>, cfg: &AgentConfig) -> Self {
        Self {
            cluster,
            vocab,
            retry: RetryConfig::from_config(cfg),
            pod_poll: cfg.pod_delete_poll(),
            pod_timeout: cfg.pod_delete_timeout(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pod_polling(mut self, poll: Duration, timeout: Duration) -> Self {
        self.pod_poll = poll;
        self.pod_timeout = timeout;
        self
    }

    async fn fetch(&self, wlid: &Wlid, kind: WorkloadKind) -> AgentResult<Workload> {
        let found = retry_if(&self.retry, "get workload", ClusterError::is_transient, || {
            self.cluster.get_workload(kind, &wlid.namespace, &wlid.name)
        })
        .await?;
        found.ok_or_else(|| AgentError::NotFound(wlid.to_string()))
    }

    async fn update_in_place(&self, wlid: &Wlid, kind: WorkloadKind, op: Operation) -> AgentResult<Workload> {
        let wlid_str = wlid.to_string();
        let (this, wlid_ref, wlid_str) = (self, wlid, wlid_str.as_str());
        retry_if(&self.retry, "update workload", AgentError::is_transient, || async move {
            // Single read per attempt; the outer retry covers transient read failures.
            let mut w = this
                .cluster
                .get_workload(kind, &wlid_ref.namespace, &wlid_ref.name)
                .await?
                .ok_or_else(|| AgentError::NotFound(wlid_ref.to_string()))?;
            mutate(&mut w, op, wlid_str, &this.vocab, &update_timestamp())?;
            Ok::<Workload, AgentError>(this.cluster.replace_workload(&w).await?)
        })
        .await
    }

    async fn recreate_pod(&self, wlid: &Wlid, op: Operation) -> AgentResult<Workload> {
        let mut w = self.fetch(wlid, WorkloadKind::Pod).await?;
        mutate(&mut w, op, &wlid.to_string(), &self.vocab, &update_timestamp())?;
        let pod = format!("{}/{}", wlid.namespace, wlid.name);
        let recreate_err = |stage: &str, e: &dyn fmt::Display| AgentError::PodRecreate { pod: pod.clone(), reason: format!("{}: {}", stage, e) };

        self.cluster
            .delete_workload(WorkloadKind::Pod, &wlid.namespace, &wlid.name)
            .await
            .map_err(|e| recreate_err("delete", &e))?;

        let deadline = Instant::now() + self.pod_timeout;
        loop {
            match self.cluster.get_workload(WorkloadKind::Pod, &wlid.namespace, &wlid.name).await {
                Ok(None) => break,
                Err(e) if e.is_not_found() => break,
                Ok(Some(_)) => debug!(pod = %pod, "waiting for pod deletion"),
                Err(e) => warn!(pod = %pod, error = %e, "pod poll failed; will retry"),
            }
            if Instant::now() >= deadline {
                return Err(recreate_err("wait", &format!("pod still present after {:?}", self.pod_timeout)));
            }
            tokio::time::sleep(self.pod_poll).await;
        }

        if let Workload::Pod(p) = &mut w {
            p.status = None;
            p.metadata.resource_version = None;
            p.metadata.uid = None;
            p.metadata.creation_timestamp = None;
            p.metadata.deletion_timestamp = None;
            p.metadata.deletion_grace_period_seconds = None;
        }
        self.cluster.create_workload(&w).await.map_err(|e| recreate_err("create", &e))
    }
}

#[async_trait]
impl WorkloadOps for WorkloadMutator {
    async fn apply(&self, wlid: &Wlid, op: Operation) -> AgentResult<Workload> {
        let kind = wlid.workload_kind(op.as_str())?;
        check_supported(op, kind)?;
        let t0 = Instant::now();
        let res = match kind {
            WorkloadKind::Pod => self.recreate_pod(wlid, op).await,
            _ => self.update_in_place(wlid, kind, op).await,
        };
        histogram!("workload_mutation_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(_) => {
                counter!("workload_mutations_total", 1u64);
                info!(wlid = %wlid, op = %op, took_ms = %t0.elapsed().as_millis(), "workload mutated");
            }
            Err(e) => {
                counter!("workload_mutation_errors_total", 1u64);
                warn!(wlid = %wlid, op = %op, error = %e, "workload mutation failed");
            }
        }
        res
    }
}
