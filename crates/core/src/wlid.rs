//! Workload identifiers: `wlid://cluster-<c>/namespace-<ns>/<kind>-<name>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

const WLID_SCHEME: &str = "wlid://";
const CLUSTER_PREFIX: &str = "cluster-";
const NAMESPACE_PREFIX: &str = "namespace-";

/// Workload kinds a designator can name. `Job` is recognized only so it can be rejected explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Namespace,
    Deployment,
    ReplicaSet,
    DaemonSet,
    StatefulSet,
    PodTemplate,
    CronJob,
    Pod,
    Job,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 9] = [
        WorkloadKind::Namespace,
        WorkloadKind::Deployment,
        WorkloadKind::ReplicaSet,
        WorkloadKind::DaemonSet,
        WorkloadKind::StatefulSet,
        WorkloadKind::PodTemplate,
        WorkloadKind::CronJob,
        WorkloadKind::Pod,
        WorkloadKind::Job,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Namespace => "Namespace",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::ReplicaSet => "ReplicaSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::PodTemplate => "PodTemplate",
            WorkloadKind::CronJob => "CronJob",
            WorkloadKind::Pod => "Pod",
            WorkloadKind::Job => "Job",
        }
    }

    /// Kinds whose spec embeds a pod template.
    pub fn has_pod_template(&self) -> bool {
        matches!(
            self,
            WorkloadKind::Deployment
                | WorkloadKind::ReplicaSet
                | WorkloadKind::DaemonSet
                | WorkloadKind::StatefulSet
                | WorkloadKind::PodTemplate
                | WorkloadKind::CronJob
        )
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for WorkloadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkloadKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_string())
    }
}

/// Parsed workload identifier. `kind` keeps the raw text so an unknown kind
/// can still be reported by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Wlid {
    pub cluster: String,
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

impl Wlid {
    pub fn new(cluster: impl Into<String>, namespace: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self { cluster: cluster.into(), namespace: namespace.into(), kind: kind.into(), name: name.into() }
    }

    pub fn parse(raw: &str) -> Result<Self, AgentError> {
        let bad = |why: &str| AgentError::InvalidCommand(format!("malformed wlid {:?}: {}", raw, why));
        let rest = raw.strip_prefix(WLID_SCHEME).ok_or_else(|| bad("missing wlid:// scheme"))?;
        let parts: Vec<&str> = rest.split('/').collect();
        let (cluster, namespace, workload) = match parts.as_slice() {
            [c, n, w] => (*c, *n, Some(*w)),
            [c, n] => (*c, *n, None),
            _ => return Err(bad("expected cluster/namespace[/kind-name]")),
        };
        let cluster = cluster.strip_prefix(CLUSTER_PREFIX).ok_or_else(|| bad("missing cluster- segment"))?;
        let namespace = namespace.strip_prefix(NAMESPACE_PREFIX).ok_or_else(|| bad("missing namespace- segment"))?;
        if namespace.is_empty() {
            return Err(bad("empty namespace"));
        }
        let (kind, name) = match workload {
            Some(w) => w.split_once('-').ok_or_else(|| bad("workload segment must be <kind>-<name>"))?,
            // A bare namespace wlid addresses the namespace object itself.
            None => ("namespace", namespace),
        };
        if kind.is_empty() || name.is_empty() {
            return Err(bad("empty kind or name"));
        }
        Ok(Self::new(cluster, namespace, kind, name))
    }

    /// Resolve the textual kind; unknown kinds fail as unsupported for `op`.
    pub fn workload_kind(&self, op: &str) -> Result<WorkloadKind, AgentError> {
        self.kind.parse().map_err(|k: String| AgentError::unsupported_kind(op, &k))
    }
}

impl fmt::Display for Wlid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}/{}{}/{}-{}",
            WLID_SCHEME,
            CLUSTER_PREFIX,
            self.cluster,
            NAMESPACE_PREFIX,
            self.namespace,
            self.kind.to_ascii_lowercase(),
            self.name
        )
    }
}

impl FromStr for Wlid {
    type Err = AgentError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Wlid::parse(s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deployment() {
        let w = Wlid::parse("wlid://cluster-prod/namespace-ns1/deployment-app1").expect("ok");
        assert_eq!(w.cluster, "prod");
        assert_eq!(w.namespace, "ns1");
        assert_eq!(w.kind, "deployment");
        assert_eq!(w.name, "app1");
        assert_eq!(w.workload_kind("inject").expect("kind"), WorkloadKind::Deployment);
    }

    #[test]
    fn name_may_contain_hyphens() {
        let w = Wlid::parse("wlid://cluster-c/namespace-kube-system/daemonset-kube-proxy").expect("ok");
        assert_eq!(w.namespace, "kube-system");
        assert_eq!(w.name, "kube-proxy");
        assert_eq!(w.workload_kind("sign").expect("kind"), WorkloadKind::DaemonSet);
    }

    #[test]
    fn bare_namespace_wlid_targets_namespace() {
        let w = Wlid::parse("wlid://cluster-c/namespace-team-a").expect("ok");
        assert_eq!(w.workload_kind("inject").expect("kind"), WorkloadKind::Namespace);
        assert_eq!(w.name, "team-a");
    }

    #[test]
    fn display_round_trips() {
        let w = Wlid::new("c1", "ns1", "Deployment", "app1");
        let s = w.to_string();
        assert_eq!(s, "wlid://cluster-c1/namespace-ns1/deployment-app1");
        let back = Wlid::parse(&s).expect("ok");
        assert_eq!(back.name, "app1");
        assert_eq!(back.workload_kind("x").expect("kind"), WorkloadKind::Deployment);
    }

    #[test]
    fn malformed_wlids_rejected() {
        for raw in ["", "cluster-c/namespace-n/pod-p", "wlid://c/namespace-n/pod-p", "wlid://cluster-c/ns/pod-p", "wlid://cluster-c/namespace-n/pod", "wlid://cluster-c/namespace-n/a/b"] {
            assert!(matches!(Wlid::parse(raw), Err(AgentError::InvalidCommand(_))), "{}", raw);
        }
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let w = Wlid::parse("wlid://cluster-c/namespace-n/rollout-web").expect("ok");
        let err = w.workload_kind("inject").unwrap_err();
        assert_eq!(err.to_string(), "command inject not supported for kind rollout");
    }
}
