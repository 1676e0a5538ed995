use async_trait::async_trait;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::ConfigMap;
use tether_core::{ClusterError, WorkloadKind};

use crate::Workload;

/// Typed CRUD over the resource kinds the agent touches.
///
/// Implementations must be safe to share across workers. Every call is
/// expected to be bounded in time; a call that exceeds its budget fails with
/// [`ClusterError::Timeout`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a workload; `None` when it does not exist.
    async fn get_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<Option<Workload>, ClusterError>;

    /// Write back a workload. The object's resourceVersion is the concurrency token.
    async fn replace_workload(&self, workload: &Workload) -> Result<Workload, ClusterError>;

    async fn create_workload(&self, workload: &Workload) -> Result<Workload, ClusterError>;

    /// Returns `false` when the object was already gone.
    async fn delete_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError>;

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<Option<CronJob>, ClusterError>;

    async fn create_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, ClusterError>;

    async fn replace_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, ClusterError>;

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;
}
