//! CronJob template handling and trigger naming. Pure; no cluster access.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, ConfigMapVolumeSource, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tether_core::{cron_job_name, AgentConfig, AgentError, AgentResult, TriggerRequest, Vocabulary};

/// ConfigMap data key holding the serialized CronJob.
pub const TEMPLATE_KEY: &str = "cronjobTemplate";
/// ConfigMap data key holding the trigger request JSON.
pub const PAYLOAD_KEY: &str = "request-body.json";
/// Template volume rebound to the per-trigger ConfigMap.
pub const REQUEST_VOLUME: &str = "request-body-volume";
pub const APP_LABEL: &str = "app";

/// Scheduled trigger families; each has its own template and name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    RegistryScan,
    KubescapeScan,
    VulnScan,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 3] = [TriggerKind::RegistryScan, TriggerKind::KubescapeScan, TriggerKind::VulnScan];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::RegistryScan => "registry-scan",
            TriggerKind::KubescapeScan => "kubescape-scan",
            TriggerKind::VulnScan => "vuln-scan",
        }
    }

    pub fn name_suffix(&self) -> &'static str {
        match self {
            TriggerKind::RegistryScan => "registry-scan",
            TriggerKind::KubescapeScan => "ks-scheduled-scan",
            TriggerKind::VulnScan => "kubevuln-schedule",
        }
    }

    pub fn template_name<'a>(&self, cfg: &'a AgentConfig) -> &'a str {
        match self {
            TriggerKind::RegistryScan => &cfg.registry_scan_template,
            TriggerKind::KubescapeScan => &cfg.kubescape_template,
            TriggerKind::VulnScan => &cfg.vuln_scan_template,
        }
    }

    fn command_stem(&self) -> &'static str {
        match self {
            TriggerKind::RegistryScan => "RegistryScan",
            TriggerKind::KubescapeScan => "Kubescape",
            TriggerKind::VulnScan => "VulnScan",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobAction {
    Set,
    Update,
    Delete,
}

/// Split `setRegistryScanCronJob`-style command names.
pub fn parse_trigger_command(name: &str) -> Option<(JobAction, TriggerKind)> {
    let (action, rest) = if let Some(r) = name.strip_prefix("set") {
        (JobAction::Set, r)
    } else if let Some(r) = name.strip_prefix("update") {
        (JobAction::Update, r)
    } else if let Some(r) = name.strip_prefix("delete") {
        (JobAction::Delete, r)
    } else {
        return None;
    };
    let stem = rest.strip_suffix("CronJob")?;
    TriggerKind::ALL.into_iter().find(|k| k.command_stem() == stem).map(|k| (action, k))
}

/// `<random>-<suffix>`, normalized to a CronJob-safe name.
pub fn generate_name(kind: TriggerKind) -> AgentResult<String> {
    let seed: i64 = rand::thread_rng().gen_range(0..i64::MAX);
    cron_job_name(&format!("{}-{}", seed, kind.name_suffix()))
}

/// Deserialize the CronJob held under [`TEMPLATE_KEY`].
pub fn parse_template(cm: &ConfigMap) -> AgentResult<CronJob> {
    let cm_name = cm.metadata.name.as_deref().unwrap_or_default();
    let raw = cm
        .data
        .as_ref()
        .and_then(|d| d.get(TEMPLATE_KEY))
        .ok_or_else(|| AgentError::TemplateNotFound(format!("configmap {} has no {} key", cm_name, TEMPLATE_KEY)))?;
    let cj: CronJob = serde_yaml::from_str(raw).map_err(|e| AgentError::TemplateInvalid(format!("{}: {}", cm_name, e)))?;
    if cj.spec.as_ref().and_then(|s| s.job_template.spec.as_ref()).is_none() {
        return Err(AgentError::TemplateInvalid(format!("{}: template has no job spec", cm_name)));
    }
    Ok(cj)
}

fn pod_template_mut(cj: &mut CronJob) -> Option<&mut PodTemplateSpec> {
    cj.spec.as_mut().and_then(|s| s.job_template.spec.as_mut()).map(|j| &mut j.template)
}

/// Write both job-id annotations on the CronJob's pod template.
pub fn set_job_id(cj: &mut CronJob, job_id: &str, vocab: &Vocabulary) {
    if let Some(t) = pod_template_mut(cj) {
        let ann = t.metadata.get_or_insert_with(ObjectMeta::default).annotations.get_or_insert_with(BTreeMap::new);
        for key in vocab.job_id_annotations() {
            ann.insert(key.to_string(), job_id.to_string());
        }
    }
}

/// Turn a parsed template into the CronJob for trigger `name`.
pub fn render(mut cj: CronJob, name: &str, namespace: &str, schedule: Option<&str>, job_id: &str, vocab: &Vocabulary) -> AgentResult<CronJob> {
    cj.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: {
            let mut l = cj.metadata.labels.take().unwrap_or_default();
            l.insert(APP_LABEL.to_string(), name.to_string());
            Some(l)
        },
        annotations: cj.metadata.annotations.take(),
        ..Default::default()
    };
    cj.status = None;
    if let (Some(s), Some(spec)) = (schedule.filter(|s| !s.is_empty()), cj.spec.as_mut()) {
        spec.schedule = s.to_string();
    }

    let volume = pod_template_mut(&mut cj)
        .and_then(|t| t.spec.as_mut())
        .and_then(|s| s.volumes.as_mut())
        .and_then(|vols| vols.iter_mut().find(|v| v.name == REQUEST_VOLUME))
        .ok_or_else(|| AgentError::TemplateInvalid(format!("template has no {} volume", REQUEST_VOLUME)))?;
    volume.config_map.get_or_insert_with(ConfigMapVolumeSource::default).name = Some(name.to_string());

    set_job_id(&mut cj, job_id, vocab);
    Ok(cj)
}

/// Companion ConfigMap carrying the trigger request.
pub fn trigger_config_map(namespace: &str, req: &TriggerRequest) -> AgentResult<ConfigMap> {
    let body = serde_json::to_string(req).map_err(|e| AgentError::InvalidCommand(format!("encoding trigger request: {}", e)))?;
    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(req.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(APP_LABEL.to_string(), req.name.clone())])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(PAYLOAD_KEY.to_string(), body)])),
        ..Default::default()
    })
}

/// Name of the ConfigMap a CronJob's request volume is bound to.
pub fn bound_config_map(cj: &CronJob) -> Option<&str> {
    cj.spec
        .as_ref()?
        .job_template
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .volumes
        .as_ref()?
        .iter()
        .find(|v| v.name == REQUEST_VOLUME)?
        .config_map
        .as_ref()?
        .name
        .as_deref()
}
