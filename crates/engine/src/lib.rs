//! Tether Engine: executes routed commands on a bounded worker pool.
//!
//! Each command is dispatched by name to the workload mutator or the trigger
//! lifecycle manager. Targets are resolved when the command runs, never when it
//! is queued. Every action produces a started report and exactly one terminal
//! report; the engine is the only place failures turn into reports.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tether_core::{AgentConfig, AgentError, AgentResult, Command};
use tether_cronjob::{parse_trigger_command, JobAction, JobLifecycle, TriggerKind};
use tether_ops::{Operation, WorkloadOps};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

mod locks;
pub mod report;
mod safe_mode;
pub mod tracker;

pub use locks::{TargetGuard, TargetLocks};
pub use report::{ActionReport, ActionStatus, ChannelReporter, LogReporter, Reporter};
pub use safe_mode::consume_safe_mode;
pub use tracker::{JobRecord, JobStatus, JobTracker};

/// What a command name asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Workload(Operation),
    Trigger(JobAction, TriggerKind),
}

pub fn dispatch(name: &str) -> AgentResult<Action> {
    if let Ok(op) = name.parse::<Operation>() {
        return Ok(Action::Workload(op));
    }
    parse_trigger_command(name)
        .map(|(a, k)| Action::Trigger(a, k))
        .ok_or_else(|| AgentError::UnsupportedOperation(format!("unsupported command {:?}", name)))
}

pub struct Engine {
    workloads: Arc<dyn WorkloadOps>,
    jobs: Arc<JobLifecycle>,
    reporter: Arc<dyn Reporter>,
    tracker: Arc<JobTracker>,
    locks: Option<TargetLocks>,
    workers: usize,
}

impl Engine {
    pub fn new(workloads: Arc<dyn WorkloadOps>, jobs: Arc<JobLifecycle>, reporter: Arc<dyn Reporter>, cfg: &AgentConfig) -> Self {
        Self {
            workloads,
            jobs,
            reporter,
            tracker: Arc::new(JobTracker::new()),
            locks: cfg.serialize_per_target.then(TargetLocks::new),
            workers: cfg.workers.max(1),
        }
    }

    pub fn tracker(&self) -> Arc<JobTracker> { self.tracker.clone() }

    /// Run `workers` tasks over one shared queue until it closes and drains.
    pub async fn run(self: Arc<Self>, rx: mpsc::Receiver<Command>) {
        let rx = Arc::new(Mutex::new(rx));
        let mut set = JoinSet::new();
        for id in 0..self.workers {
            let (engine, rx) = (self.clone(), rx.clone());
            set.spawn(async move { engine.worker(id, rx).await });
        }
        info!(workers = self.workers, "command engine started");
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "engine worker ended abnormally");
            }
        }
        info!("command engine stopped");
    }

    async fn worker(&self, id: usize, rx: Arc<Mutex<mpsc::Receiver<Command>>>) {
        loop {
            // Lock released before executing so other workers can take the next command.
            let next = rx.lock().await.recv().await;
            let Some(cmd) = next else { break };
            debug!(worker = id, command = %cmd.name, "command dequeued");
            // Failures are already reported.
            let _ = self.execute(cmd).await;
        }
        debug!(worker = id, "engine worker exiting");
    }

    /// Execute one command end to end.
    pub async fn execute(&self, mut cmd: Command) -> AgentResult<()> {
        if cmd.job_id().is_empty() {
            cmd.job_tracking.job_id = uuid::Uuid::new_v4().to_string();
        }
        let started = Instant::now();
        let job_id = cmd.job_id().to_string();
        self.tracker.start(&job_id, &cmd.name);
        counter!("commands_total", 1u64);
        info!(job_id = %job_id, command = %cmd.name, "executing command");

        let res = match dispatch(&cmd.name) {
            Ok(Action::Workload(op)) => self.run_workload(&cmd, op).await,
            Ok(Action::Trigger(action, kind)) => self.run_trigger(&cmd, action, kind).await,
            Err(e) => {
                self.report(&cmd, 0, None, ActionStatus::Started).await;
                self.finish_action(&cmd, 0, None, Err(&e)).await;
                Err(e)
            }
        };

        histogram!("command_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(()) => {
                self.tracker.finish(&job_id, Ok(()));
                info!(job_id = %job_id, command = %cmd.name, "command succeeded");
            }
            Err(e) => {
                counter!("command_failures_total", 1u64);
                self.tracker.finish(&job_id, Err(e.to_string()));
                warn!(job_id = %job_id, command = %cmd.name, error = %e, "command failed");
            }
        }
        res
    }

    /// One action per target, in order. Every target is attempted; the first error is returned.
    async fn run_workload(&self, cmd: &Command, op: Operation) -> AgentResult<()> {
        let targets = match cmd.targets() {
            Ok(t) if t.is_empty() => Err(AgentError::InvalidCommand(format!("{} names no target", cmd.name))),
            other => other,
        };
        let targets = match targets {
            Ok(t) => t,
            Err(e) => {
                self.report(cmd, 0, None, ActionStatus::Started).await;
                self.finish_action(cmd, 0, None, Err(&e)).await;
                return Err(e);
            }
        };

        let mut first_err = None;
        for (i, wlid) in targets.iter().enumerate() {
            let idx = cmd.job_tracking.action_index.saturating_add(i as u32);
            let target = wlid.to_string();
            self.report(cmd, idx, Some(target.clone()), ActionStatus::Started).await;
            let res = {
                let _guard = self.serialize(&target).await;
                self.workloads.apply(wlid, op).await.map(|_| ())
            };
            self.finish_action(cmd, idx, Some(target), res.as_ref().map(|_| ())).await;
            if let Err(e) = res {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn run_trigger(&self, cmd: &Command, action: JobAction, kind: TriggerKind) -> AgentResult<()> {
        let idx = cmd.job_tracking.action_index;
        let named = cmd.cron_job_params().map(|p| p.job_name).filter(|n| !n.is_empty());
        self.report(cmd, idx, named.clone(), ActionStatus::Started).await;
        let res = match action {
            JobAction::Set => self.jobs.create(kind, cmd).await.map(|cj| cj.metadata.name),
            JobAction::Update => {
                let _guard = self.serialize_trigger(named.as_deref()).await;
                self.jobs.update(cmd).await.map(|cj| cj.metadata.name)
            }
            JobAction::Delete => {
                let _guard = self.serialize_trigger(named.as_deref()).await;
                self.jobs.delete(cmd).await.map(|existed| {
                    if !existed {
                        debug!(job_id = %cmd.job_id(), "cronjob already gone");
                    }
                    named.clone()
                })
            }
        };
        match res {
            Ok(name) => {
                self.finish_action(cmd, idx, name.or(named), Ok(())).await;
                Ok(())
            }
            Err(e) => {
                self.finish_action(cmd, idx, named, Err(&e)).await;
                Err(e)
            }
        }
    }

    async fn serialize(&self, key: &str) -> Option<TargetGuard<'_>> {
        match &self.locks {
            Some(locks) => Some(locks.acquire(key).await),
            None => None,
        }
    }

    async fn serialize_trigger(&self, name: Option<&str>) -> Option<TargetGuard<'_>> {
        match name {
            Some(n) => self.serialize(&format!("cronjob/{}/{}", self.jobs.namespace(), n)).await,
            None => None,
        }
    }

    async fn finish_action(&self, cmd: &Command, idx: u32, target: Option<String>, res: Result<(), &AgentError>) {
        let status = match res {
            Ok(()) => ActionStatus::Success,
            Err(e) => ActionStatus::failure(e),
        };
        self.tracker.action_done(cmd.job_id(), res.is_ok());
        self.report(cmd, idx, target, status).await;
    }

    async fn report(&self, cmd: &Command, idx: u32, target: Option<String>, status: ActionStatus) {
        self.reporter.report(ActionReport::new(cmd, idx, target, status)).await;
    }
}
