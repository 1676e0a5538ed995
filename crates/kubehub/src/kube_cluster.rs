use std::fmt::Debug;
use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, PodTemplate};
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Resource};
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tether_core::{ClusterError, WorkloadKind};
use tracing::debug;

use crate::{ClusterClient, Workload};

/// Build a client from the in-cluster service account or the local kubeconfig.
pub async fn get_kube_client() -> anyhow::Result<Client> {
    Client::try_default().await.context("creating kube client (in-cluster env or kubeconfig)")
}

/// Map a kube-rs error onto the retry-relevant classes.
pub fn classify(e: kube::Error, what: &str) -> ClusterError {
    match e {
        kube::Error::Api(ae) => match (ae.code, ae.reason.as_str()) {
            (404, _) => ClusterError::NotFound(format!("{}: {}", what, ae.message)),
            (409, "AlreadyExists") => ClusterError::AlreadyExists(format!("{}: {}", what, ae.message)),
            (409, _) => ClusterError::Conflict(format!("{}: {}", what, ae.message)),
            (code, _) => ClusterError::Api { code, reason: ae.reason, message: format!("{}: {}", what, ae.message) },
        },
        other => ClusterError::Other(format!("{}: {}", what, other)),
    }
}

/// [`ClusterClient`] over the real API server. Each call is bounded by `call_timeout`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    call_timeout: Duration,
}

impl KubeCluster {
    pub fn new(client: Client, call_timeout: Duration) -> Self { Self { client, call_timeout } }

    pub async fn try_default(call_timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self::new(get_kube_client().await?, call_timeout))
    }

    async fn bounded<T, F>(&self, what: String, fut: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, kube::Error>> + Send,
    {
        let t0 = Instant::now();
        let res = match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(r) => r.map_err(|e| classify(e, &what)),
            Err(_) => Err(ClusterError::Timeout(format!("{} after {:?}", what, self.call_timeout))),
        };
        histogram!("cluster_call_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(_) => debug!(call = %what, took_ms = %t0.elapsed().as_millis(), "cluster call ok"),
            Err(e) => {
                counter!("cluster_call_errors", 1u64);
                debug!(call = %what, error = %e, "cluster call failed");
            }
        }
        res
    }

    async fn get_opt<K>(&self, api: Api<K>, name: &str) -> Result<Option<K>, ClusterError>
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync,
        K::DynamicType: Default,
    {
        self.bounded(format!("get {} {}", K::kind(&Default::default()), name), api.get_opt(name)).await
    }

    async fn replace<K>(&self, api: Api<K>, obj: &K) -> Result<K, ClusterError>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync,
        K::DynamicType: Default,
    {
        let name = obj.meta().name.clone().ok_or_else(|| ClusterError::Other("replace: object has no name".into()))?;
        let what = format!("replace {} {}", K::kind(&Default::default()), name);
        self.bounded(what, api.replace(&name, &PostParams::default(), obj)).await
    }

    async fn create<K>(&self, api: Api<K>, obj: &K) -> Result<K, ClusterError>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync,
        K::DynamicType: Default,
    {
        let what = format!("create {} {}", K::kind(&Default::default()), obj.meta().name.as_deref().unwrap_or("-"));
        self.bounded(what, api.create(&PostParams::default(), obj)).await
    }

    async fn delete<K>(&self, api: Api<K>, name: &str) -> Result<bool, ClusterError>
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync,
        K::DynamicType: Default,
    {
        let what = format!("delete {} {}", K::kind(&Default::default()), name);
        match self.bounded(what, api.delete(name, &DeleteParams::default())).await {
            Ok(_) => Ok(true),
            Err(ClusterError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<Option<Workload>, ClusterError> {
        let c = self.client.clone();
        let found = match kind {
            WorkloadKind::Namespace => self.get_opt(Api::<Namespace>::all(c), name).await?.map(Workload::Namespace),
            WorkloadKind::Deployment => self.get_opt(Api::<Deployment>::namespaced(c, namespace), name).await?.map(Workload::Deployment),
            WorkloadKind::ReplicaSet => self.get_opt(Api::<ReplicaSet>::namespaced(c, namespace), name).await?.map(Workload::ReplicaSet),
            WorkloadKind::DaemonSet => self.get_opt(Api::<DaemonSet>::namespaced(c, namespace), name).await?.map(Workload::DaemonSet),
            WorkloadKind::StatefulSet => self.get_opt(Api::<StatefulSet>::namespaced(c, namespace), name).await?.map(Workload::StatefulSet),
            WorkloadKind::PodTemplate => self.get_opt(Api::<PodTemplate>::namespaced(c, namespace), name).await?.map(Workload::PodTemplate),
            WorkloadKind::CronJob => self.get_opt(Api::<CronJob>::namespaced(c, namespace), name).await?.map(Workload::CronJob),
            WorkloadKind::Pod => self.get_opt(Api::<Pod>::namespaced(c, namespace), name).await?.map(Workload::Pod),
            WorkloadKind::Job => return Err(ClusterError::Other(format!("kind {} is not served", kind))),
        };
        Ok(found)
    }

    async fn replace_workload(&self, workload: &Workload) -> Result<Workload, ClusterError> {
        let c = self.client.clone();
        let ns = workload.namespace();
        match workload {
            Workload::Namespace(o) => self.replace(Api::<Namespace>::all(c), o).await.map(Workload::Namespace),
            Workload::Deployment(o) => self.replace(Api::<Deployment>::namespaced(c, ns), o).await.map(Workload::Deployment),
            Workload::ReplicaSet(o) => self.replace(Api::<ReplicaSet>::namespaced(c, ns), o).await.map(Workload::ReplicaSet),
            Workload::DaemonSet(o) => self.replace(Api::<DaemonSet>::namespaced(c, ns), o).await.map(Workload::DaemonSet),
            Workload::StatefulSet(o) => self.replace(Api::<StatefulSet>::namespaced(c, ns), o).await.map(Workload::StatefulSet),
            Workload::PodTemplate(o) => self.replace(Api::<PodTemplate>::namespaced(c, ns), o).await.map(Workload::PodTemplate),
            Workload::CronJob(o) => self.replace(Api::<CronJob>::namespaced(c, ns), o).await.map(Workload::CronJob),
            Workload::Pod(o) => self.replace(Api::<Pod>::namespaced(c, ns), o).await.map(Workload::Pod),
        }
    }

    async fn create_workload(&self, workload: &Workload) -> Result<Workload, ClusterError> {
        let c = self.client.clone();
        let ns = workload.namespace();
        match workload {
            Workload::Namespace(o) => self.create(Api::<Namespace>::all(c), o).await.map(Workload::Namespace),
            Workload::Deployment(o) => self.create(Api::<Deployment>::namespaced(c, ns), o).await.map(Workload::Deployment),
            Workload::ReplicaSet(o) => self.create(Api::<ReplicaSet>::namespaced(c, ns), o).await.map(Workload::ReplicaSet),
            Workload::DaemonSet(o) => self.create(Api::<DaemonSet>::namespaced(c, ns), o).await.map(Workload::DaemonSet),
            Workload::StatefulSet(o) => self.create(Api::<StatefulSet>::namespaced(c, ns), o).await.map(Workload::StatefulSet),
            Workload::PodTemplate(o) => self.create(Api::<PodTemplate>::namespaced(c, ns), o).await.map(Workload::PodTemplate),
            Workload::CronJob(o) => self.create(Api::<CronJob>::namespaced(c, ns), o).await.map(Workload::CronJob),
            Workload::Pod(o) => self.create(Api::<Pod>::namespaced(c, ns), o).await.map(Workload::Pod),
        }
    }

    async fn delete_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let c = self.client.clone();
        match kind {
            WorkloadKind::Namespace => self.delete(Api::<Namespace>::all(c), name).await,
            WorkloadKind::Deployment => self.delete(Api::<Deployment>::namespaced(c, namespace), name).await,
            WorkloadKind::ReplicaSet => self.delete(Api::<ReplicaSet>::namespaced(c, namespace), name).await,
            WorkloadKind::DaemonSet => self.delete(Api::<DaemonSet>::namespaced(c, namespace), name).await,
            WorkloadKind::StatefulSet => self.delete(Api::<StatefulSet>::namespaced(c, namespace), name).await,
            WorkloadKind::PodTemplate => self.delete(Api::<PodTemplate>::namespaced(c, namespace), name).await,
            WorkloadKind::CronJob => self.delete(Api::<CronJob>::namespaced(c, namespace), name).await,
            WorkloadKind::Pod => self.delete(Api::<Pod>::namespaced(c, namespace), name).await,
            WorkloadKind::Job => Err(ClusterError::Other(format!("kind {} is not served", kind))),
        }
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        self.get_opt(Api::<ConfigMap>::namespaced(self.client.clone(), namespace), name).await
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError> {
        self.create(Api::<ConfigMap>::namespaced(self.client.clone(), namespace), config_map).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        self.delete(Api::<ConfigMap>::namespaced(self.client.clone(), namespace), name).await
    }

    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<Option<CronJob>, ClusterError> {
        self.get_opt(Api::<CronJob>::namespaced(self.client.clone(), namespace), name).await
    }

    async fn create_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, ClusterError> {
        self.create(Api::<CronJob>::namespaced(self.client.clone(), namespace), cron_job).await
    }

    async fn replace_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, ClusterError> {
        self.replace(Api::<CronJob>::namespaced(self.client.clone(), namespace), cron_job).await
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        self.delete(Api::<CronJob>::namespaced(self.client.clone(), namespace), name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: "boom".into(), reason: reason.into(), code })
    }

    #[test]
    fn classify_maps_status_codes() {
        assert!(matches!(classify(api_err(404, "NotFound"), "get"), ClusterError::NotFound(_)));
        assert!(matches!(classify(api_err(409, "Conflict"), "replace"), ClusterError::Conflict(_)));
        assert!(matches!(classify(api_err(409, "AlreadyExists"), "create"), ClusterError::AlreadyExists(_)));
        match classify(api_err(422, "Invalid"), "create") {
            ClusterError::Api { code, reason, .. } => {
                assert_eq!(code, 422);
                assert_eq!(reason, "Invalid");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
