//! Tether CronJob: lifecycle of scheduled triggers.
//!
//! A trigger is a (ConfigMap, CronJob) pair sharing one generated name. The
//! ConfigMap holds the trigger request; the CronJob, rendered from a template
//! ConfigMap, mounts it through the request volume.

#![forbid(unsafe_code)]

use std::sync::Arc;

use k8s_openapi::api::batch::v1::CronJob;
use metrics::counter;
use tether_core::{AgentConfig, AgentError, AgentResult, ClusterError, Command, TriggerRequest, Vocabulary};
use tether_kubehub::{retry_if, ClusterClient, RetryConfig};
use tracing::{debug, error, info, warn};

pub mod template;

pub use template::{
    bound_config_map, generate_name, parse_template, parse_trigger_command, render, set_job_id, trigger_config_map, JobAction,
    TriggerKind, APP_LABEL, PAYLOAD_KEY, REQUEST_VOLUME, TEMPLATE_KEY,
};

pub struct JobLifecycle {
    cluster: Arc<dyn ClusterClient>,
    vocab: Arc<Vocabulary>,
    cfg: AgentConfig,
    retry: RetryConfig,
}

impl JobLifecycle {
    pub fn new(cluster: Arc<dyn ClusterClient>, vocab: Arc<Vocabulary>, cfg: &AgentConfig) -> Self {
        Self { cluster, vocab, retry: RetryConfig::from_config(cfg), cfg: cfg.clone() }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn namespace(&self) -> &str { &self.cfg.namespace }

    /// Fetch and parse the template for `kind`.
    pub async fn load_template(&self, kind: TriggerKind) -> AgentResult<CronJob> {
        let name = kind.template_name(&self.cfg);
        let cm = retry_if(&self.retry, "get template", ClusterError::is_transient, || {
            self.cluster.get_config_map(&self.cfg.namespace, name)
        })
        .await?
        .ok_or_else(|| AgentError::TemplateNotFound(format!("configmap {}/{}", self.cfg.namespace, name)))?;
        parse_template(&cm)
    }

    /// Create a trigger pair for `command`; returns the CronJob as created.
    pub async fn create(&self, kind: TriggerKind, command: &Command) -> AgentResult<CronJob> {
        let target_name = match kind {
            TriggerKind::RegistryScan => command.registry_name()?,
            _ => String::new(),
        };
        let tpl = self.load_template(kind).await?;
        let name = generate_name(kind)?;
        let ns = self.cfg.namespace.as_str();
        let schedule = command.cron_tab_schedule();
        let cron_job = render(tpl, &name, ns, schedule.as_deref(), command.job_id(), &self.vocab)?;
        let req = TriggerRequest { name: name.clone(), target_name, command: command.clone() };
        let cm = trigger_config_map(ns, &req)?;

        let cm_created = retry_if(&self.retry, "create trigger configmap", ClusterError::is_transient, || {
            self.cluster.create_config_map(ns, &cm)
        })
        .await;
        if let Err(e) = cm_created {
            // A retried create can collide with its own earlier, committed attempt.
            let ours = matches!(e, ClusterError::AlreadyExists(_))
                && matches!(self.cluster.get_config_map(ns, &name).await, Ok(Some(ref found)) if found.data == cm.data);
            if !ours {
                return Err(e.into());
            }
            debug!(name = %name, "trigger configmap already committed by an earlier attempt");
        }

        let created = match retry_if(&self.retry, "create cronjob", ClusterError::is_transient, || {
            self.cluster.create_cron_job(ns, &cron_job)
        })
        .await
        {
            Err(ClusterError::AlreadyExists(m)) => match self.cluster.get_cron_job(ns, &name).await {
                Ok(Some(found)) if bound_config_map(&found) == Some(name.as_str()) => {
                    debug!(name = %name, "cronjob already committed by an earlier attempt");
                    Ok(found)
                }
                _ => Err(ClusterError::AlreadyExists(m)),
            },
            other => other,
        };
        match created {
            Ok(cj) => {
                counter!("triggers_created_total", 1u64);
                info!(name = %name, kind = %kind, job_id = %command.job_id(), schedule = ?schedule, "trigger created");
                Ok(cj)
            }
            Err(source) => {
                counter!("triggers_partial_create_total", 1u64);
                error!(name = %name, kind = %kind, error = %source, "partial create: configmap exists but cronjob creation failed");
                match self.cluster.delete_config_map(ns, &name).await {
                    Ok(_) => info!(name = %name, "orphaned trigger configmap removed"),
                    Err(e) => warn!(name = %name, error = %e, "orphaned trigger configmap left behind"),
                }
                Err(AgentError::PartialCreate { config_map: name, source })
            }
        }
    }

    /// Point an existing trigger at a new schedule and job id.
    pub async fn update(&self, command: &Command) -> AgentResult<CronJob> {
        let name = job_name(command)?;
        let schedule = command.cron_tab_schedule();
        let job_id = command.job_id();
        let ns = self.cfg.namespace.as_str();
        let (this, name_ref, schedule_ref) = (self, name.as_str(), schedule.as_deref());
        let updated = retry_if(&self.retry, "update cronjob", AgentError::is_transient, || async move {
            let mut cj = this
                .cluster
                .get_cron_job(ns, name_ref)
                .await?
                .ok_or_else(|| AgentError::NotFound(format!("cronjob {}/{}", ns, name_ref)))?;
            if let (Some(s), Some(spec)) = (schedule_ref, cj.spec.as_mut()) {
                spec.schedule = s.to_string();
            }
            if !job_id.is_empty() {
                set_job_id(&mut cj, job_id, &this.vocab);
            }
            Ok::<CronJob, AgentError>(this.cluster.replace_cron_job(ns, &cj).await?)
        })
        .await?;
        info!(name = %name, job_id = %job_id, schedule = ?schedule, "trigger updated");
        Ok(updated)
    }

    /// Delete the trigger named in the command's job params.
    pub async fn delete(&self, command: &Command) -> AgentResult<bool> { self.delete_by_name(&job_name(command)?).await }

    /// Remove the CronJob and its ConfigMap; absent objects are not an error.
    pub async fn delete_by_name(&self, name: &str) -> AgentResult<bool> {
        let ns = self.cfg.namespace.as_str();
        let existed = retry_if(&self.retry, "delete cronjob", ClusterError::is_transient, || self.cluster.delete_cron_job(ns, name)).await?;
        let cm_existed =
            retry_if(&self.retry, "delete trigger configmap", ClusterError::is_transient, || self.cluster.delete_config_map(ns, name)).await?;
        info!(name = %name, cronjob = existed, configmap = cm_existed, "trigger deleted");
        Ok(existed)
    }
}

fn job_name(command: &Command) -> AgentResult<String> {
    command
        .cron_job_params()
        .map(|p| p.job_name)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AgentError::InvalidCommand(format!("{}: jobParams.name is missing", command.name)))
}
