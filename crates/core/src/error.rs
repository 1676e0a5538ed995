//! Error taxonomy shared by every tether crate.

use serde::{Deserialize, Serialize};

/// Cluster API failures, classified so call sites can decide whether to retry.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("client: {0}")]
    Other(String),
}

impl ClusterError {
    /// Conflicts, timeouts, throttling and server-side errors are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Conflict(_) | ClusterError::Timeout(_) => true,
            ClusterError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, ClusterError::NotFound(_)) }
}

/// Failures surfaced by the mutator, the job lifecycle manager, the router and the engine.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cronjob template not found: {0}")]
    TemplateNotFound(String),
    #[error("cronjob template invalid: {0}")]
    TemplateInvalid(String),
    #[error("{0}")]
    UnsupportedOperation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("configmap {config_map} created but cronjob creation failed: {source}")]
    PartialCreate { config_map: String, source: ClusterError },
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("pod {pod} recreate failed: {reason}")]
    PodRecreate { pod: String, reason: String },
    #[error("timed out: {0}")]
    Timeout(String),
    #[error(transparent)]
    Cluster(ClusterError),
}

impl AgentError {
    pub fn unsupported_kind(op: &str, kind: &str) -> Self {
        AgentError::UnsupportedOperation(format!("command {} not supported for kind {}", op, kind))
    }

    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Conflict(_) | AgentError::Timeout(_) => true,
            AgentError::Cluster(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Short stable tag used in reports and metric labels.
    pub fn tag(&self) -> &'static str {
        match self {
            AgentError::NotFound(_) => "not_found",
            AgentError::TemplateNotFound(_) => "template_not_found",
            AgentError::TemplateInvalid(_) => "template_invalid",
            AgentError::UnsupportedOperation(_) => "unsupported",
            AgentError::Conflict(_) => "conflict",
            AgentError::Transport(_) => "transport",
            AgentError::Decode(_) => "decode",
            AgentError::PartialCreate { .. } => "partial_create",
            AgentError::InvalidName(_) => "invalid_name",
            AgentError::InvalidCommand(_) => "invalid_command",
            AgentError::PodRecreate { .. } => "pod_recreate",
            AgentError::Timeout(_) => "timeout",
            AgentError::Cluster(_) => "cluster",
        }
    }
}

impl From<ClusterError> for AgentError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::NotFound(m) => AgentError::NotFound(m),
            ClusterError::Conflict(m) => AgentError::Conflict(m),
            ClusterError::Timeout(m) => AgentError::Timeout(m),
            other => AgentError::Cluster(other),
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ClusterError::Conflict("rv".into()).is_transient());
        assert!(ClusterError::Timeout("get".into()).is_transient());
        assert!(ClusterError::Api { code: 503, reason: "ServiceUnavailable".into(), message: String::new() }.is_transient());
        assert!(ClusterError::Api { code: 429, reason: "TooManyRequests".into(), message: String::new() }.is_transient());
        assert!(!ClusterError::Api { code: 422, reason: "Invalid".into(), message: String::new() }.is_transient());
        assert!(!ClusterError::NotFound("x".into()).is_transient());
        assert!(!ClusterError::AlreadyExists("x".into()).is_transient());
    }

    #[test]
    fn cluster_errors_map_onto_taxonomy() {
        assert!(matches!(AgentError::from(ClusterError::NotFound("d".into())), AgentError::NotFound(_)));
        assert!(matches!(AgentError::from(ClusterError::Conflict("d".into())), AgentError::Conflict(_)));
        assert!(matches!(AgentError::from(ClusterError::Timeout("d".into())), AgentError::Timeout(_)));
        assert!(matches!(AgentError::from(ClusterError::Other("d".into())), AgentError::Cluster(_)));
        assert!(AgentError::from(ClusterError::Conflict("d".into())).is_transient());
        assert!(!AgentError::TemplateInvalid("yaml".into()).is_transient());
    }

    #[test]
    fn unsupported_kind_message() {
        let e = AgentError::unsupported_kind("inject", "Job");
        assert_eq!(e.to_string(), "command inject not supported for kind Job");
        assert_eq!(e.tag(), "unsupported");
    }
}
