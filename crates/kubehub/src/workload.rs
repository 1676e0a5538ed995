use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{Namespace, Pod, PodTemplate, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tether_core::WorkloadKind;

/// A live workload object, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Namespace(Namespace),
    Deployment(Deployment),
    ReplicaSet(ReplicaSet),
    DaemonSet(DaemonSet),
    StatefulSet(StatefulSet),
    PodTemplate(PodTemplate),
    CronJob(CronJob),
    Pod(Pod),
}

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Workload::Namespace(_) => WorkloadKind::Namespace,
            Workload::Deployment(_) => WorkloadKind::Deployment,
            Workload::ReplicaSet(_) => WorkloadKind::ReplicaSet,
            Workload::DaemonSet(_) => WorkloadKind::DaemonSet,
            Workload::StatefulSet(_) => WorkloadKind::StatefulSet,
            Workload::PodTemplate(_) => WorkloadKind::PodTemplate,
            Workload::CronJob(_) => WorkloadKind::CronJob,
            Workload::Pod(_) => WorkloadKind::Pod,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Workload::Namespace(w) => &w.metadata,
            Workload::Deployment(w) => &w.metadata,
            Workload::ReplicaSet(w) => &w.metadata,
            Workload::DaemonSet(w) => &w.metadata,
            Workload::StatefulSet(w) => &w.metadata,
            Workload::PodTemplate(w) => &w.metadata,
            Workload::CronJob(w) => &w.metadata,
            Workload::Pod(w) => &w.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Workload::Namespace(w) => &mut w.metadata,
            Workload::Deployment(w) => &mut w.metadata,
            Workload::ReplicaSet(w) => &mut w.metadata,
            Workload::DaemonSet(w) => &mut w.metadata,
            Workload::StatefulSet(w) => &mut w.metadata,
            Workload::PodTemplate(w) => &mut w.metadata,
            Workload::CronJob(w) => &mut w.metadata,
            Workload::Pod(w) => &mut w.metadata,
        }
    }

    pub fn name(&self) -> &str { self.meta().name.as_deref().unwrap_or_default() }

    pub fn namespace(&self) -> &str { self.meta().namespace.as_deref().unwrap_or_default() }

    /// Embedded pod template, for the kinds that carry one.
    pub fn pod_template(&self) -> Option<&PodTemplateSpec> {
        match self {
            Workload::Deployment(w) => w.spec.as_ref().map(|s| &s.template),
            Workload::ReplicaSet(w) => w.spec.as_ref().and_then(|s| s.template.as_ref()),
            Workload::DaemonSet(w) => w.spec.as_ref().map(|s| &s.template),
            Workload::StatefulSet(w) => w.spec.as_ref().map(|s| &s.template),
            Workload::PodTemplate(w) => w.template.as_ref(),
            Workload::CronJob(w) => w.spec.as_ref().and_then(|s| s.job_template.spec.as_ref()).map(|j| &j.template),
            Workload::Namespace(_) | Workload::Pod(_) => None,
        }
    }

    pub fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        match self {
            Workload::Deployment(w) => w.spec.as_mut().map(|s| &mut s.template),
            Workload::ReplicaSet(w) => w.spec.as_mut().and_then(|s| s.template.as_mut()),
            Workload::DaemonSet(w) => w.spec.as_mut().map(|s| &mut s.template),
            Workload::StatefulSet(w) => w.spec.as_mut().map(|s| &mut s.template),
            Workload::PodTemplate(w) => w.template.as_mut(),
            Workload::CronJob(w) => w.spec.as_mut().and_then(|s| s.job_template.spec.as_mut()).map(|j| &mut j.template),
            Workload::Namespace(_) | Workload::Pod(_) => None,
        }
    }
}
