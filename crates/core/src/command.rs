//! Wire types exchanged with the platform backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::AgentError;
use crate::wlid::Wlid;

pub const DESIGNATOR_WLID: &str = "Wlid";
pub const DESIGNATOR_ATTRIBUTES: &str = "Attributes";

/// Correlates a command with the objects and reports it produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTracking {
    #[serde(rename = "jobID", default)]
    pub job_id: String,
    #[serde(rename = "parentJobID", default, skip_serializing_if = "String::is_empty")]
    pub parent_job_id: String,
    #[serde(rename = "actionIDN", default)]
    pub action_index: u32,
}

/// Names a workload either directly by wlid or by its attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Designator {
    #[serde(rename = "designatorType", default)]
    pub designator_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub wlid: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Designator {
    pub fn from_wlid(wlid: &Wlid) -> Self {
        Self { designator_type: DESIGNATOR_WLID.to_string(), wlid: wlid.to_string(), attributes: BTreeMap::new() }
    }

    /// Resolve to a single workload identifier.
    pub fn resolve(&self) -> Result<Wlid, AgentError> {
        if !self.wlid.is_empty() {
            return Wlid::parse(&self.wlid);
        }
        let attr = |k: &str| self.attributes.get(k).filter(|v| !v.is_empty()).cloned();
        match (attr("namespace"), attr("kind"), attr("name")) {
            (Some(ns), Some(kind), Some(name)) => Ok(Wlid::new(attr("cluster").unwrap_or_default(), ns, kind, name)),
            (Some(ns), None, None) => Ok(Wlid::new(attr("cluster").unwrap_or_default(), ns.clone(), "namespace", ns)),
            _ => Err(AgentError::InvalidCommand(format!(
                "designator {:?} does not name a single workload",
                self.designator_type
            ))),
        }
    }
}

/// A remote instruction. Immutable once dispatched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "commandName")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub wlid: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub designators: Vec<Designator>,
    #[serde(rename = "jobTracking", default)]
    pub job_tracking: JobTracking,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, Json>,
}

/// `args.jobParams` of the cron job commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronJobParams {
    #[serde(rename = "name", default)]
    pub job_name: String,
    #[serde(rename = "cronTabSchedule", default)]
    pub cron_tab_schedule: String,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into(), ..Default::default() } }

    pub fn for_wlid(name: impl Into<String>, wlid: &Wlid) -> Self {
        Self { designators: vec![Designator::from_wlid(wlid)], ..Self::new(name) }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_tracking.job_id = job_id.into();
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Json) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn job_id(&self) -> &str { &self.job_tracking.job_id }

    /// All targets named by the command: the top-level wlid first, then designators.
    pub fn targets(&self) -> Result<Vec<Wlid>, AgentError> {
        let mut out = Vec::with_capacity(self.designators.len() + 1);
        if !self.wlid.is_empty() {
            out.push(Wlid::parse(&self.wlid)?);
        }
        for d in &self.designators {
            let w = d.resolve()?;
            if !out.contains(&w) {
                out.push(w);
            }
        }
        Ok(out)
    }

    pub fn cron_job_params(&self) -> Option<CronJobParams> {
        self.args.get("jobParams").and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Schedule from `jobParams.cronTabSchedule`, else `args.cronTabSchedule`.
    pub fn cron_tab_schedule(&self) -> Option<String> {
        self.cron_job_params()
            .map(|p| p.cron_tab_schedule)
            .filter(|s| !s.is_empty())
            .or_else(|| self.args.get("cronTabSchedule").and_then(|v| v.as_str()).map(str::to_string))
            .filter(|s| !s.is_empty())
    }

    pub fn registry_name(&self) -> Result<String, AgentError> {
        self.args
            .get("registryName")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AgentError::InvalidCommand("registryName argument is missing".into()))
    }
}

/// Payload mounted into a scheduled trigger's pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub name: String,
    #[serde(rename = "targetName", default)]
    pub target_name: String,
    pub command: Command,
}

/// Degraded-operation signal reported by a managed workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeMode {
    pub reporter: String,
    pub action: String,
    pub wlid: String,
    #[serde(rename = "podName")]
    pub pod_name: String,
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    #[serde(rename = "containerName")]
    pub container_name: String,
    #[serde(rename = "processName")]
    pub process_name: String,
    #[serde(rename = "processID")]
    pub process_id: i64,
    #[serde(rename = "processCMD")]
    pub process_cmd: String,
    #[serde(rename = "componentGUID")]
    pub component_guid: String,
    #[serde(rename = "statusCode")]
    pub status_code: i64,
    #[serde(rename = "processExitCode")]
    pub process_exit_code: i64,
    pub timestamp: Json,
    pub message: String,
    #[serde(rename = "jobID")]
    pub job_id: String,
}

impl SafeMode {
    pub fn fill_defaults(&mut self) {
        if self.instance_id.is_empty() {
            self.instance_id = self.pod_name.clone();
        }
    }
}
