use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tether_core::{ClusterError, WorkloadKind};

use crate::{ClusterClient, Workload};

/// Call sites of [`MemCluster`], for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemOp {
    GetWorkload,
    ReplaceWorkload,
    CreateWorkload,
    DeleteWorkload,
    GetConfigMap,
    CreateConfigMap,
    DeleteConfigMap,
    GetCronJob,
    CreateCronJob,
    ReplaceCronJob,
    DeleteCronJob,
}

type Key = (WorkloadKind, String, String);

#[derive(Default)]
struct State {
    workloads: HashMap<Key, Workload>,
    config_maps: HashMap<(String, String), ConfigMap>,
    /// Deleted pods still visible to reads for the given number of gets.
    terminating: HashMap<(String, String), (Workload, u32)>,
    pod_delete_lag: u32,
    next_rv: u64,
    faults: HashMap<MemOp, VecDeque<ClusterError>>,
    lost_replies: HashMap<MemOp, VecDeque<ClusterError>>,
    calls: HashMap<MemOp, u32>,
}

impl State {
    fn enter(&mut self, op: MemOp) -> Result<(), ClusterError> {
        *self.calls.entry(op).or_default() += 1;
        match self.faults.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Applied writes can still be reported as failed to the caller.
    fn leave<T>(&mut self, op: MemOp, res: Result<T, ClusterError>) -> Result<T, ClusterError> {
        let res = res?;
        match self.lost_replies.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(e) => Err(e),
            None => Ok(res),
        }
    }

    fn stamp(&mut self, meta: &mut ObjectMeta) {
        self.next_rv += 1;
        meta.resource_version = Some(self.next_rv.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
    }
}

/// Namespaces are cluster scoped: their key ignores the namespace argument.
fn store_key(kind: WorkloadKind, namespace: &str, name: &str) -> Key {
    let ns = if kind == WorkloadKind::Namespace { "" } else { namespace };
    (kind, ns.to_string(), name.to_string())
}

fn key_of(w: &Workload) -> Key { store_key(w.kind(), w.namespace(), w.name()) }

fn describe(kind: WorkloadKind, ns: &str, name: &str) -> String { format!("{} {}/{}", kind, ns, name) }

/// In-memory cluster with optimistic concurrency, fault injection and
/// delayed pod deletion. Shared by the tests of every tether crate.
#[derive(Default)]
pub struct MemCluster {
    state: Mutex<State>,
}

impl MemCluster {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(|p| p.into_inner()) }

    /// Seed a workload (CronJobs included); a resourceVersion and uid are assigned.
    pub fn insert(&self, mut workload: Workload) -> Workload {
        let mut st = self.lock();
        st.stamp(workload.meta_mut());
        st.workloads.insert(key_of(&workload), workload.clone());
        workload
    }

    pub fn insert_config_map(&self, namespace: &str, mut cm: ConfigMap) -> ConfigMap {
        let mut st = self.lock();
        cm.metadata.namespace = Some(namespace.to_string());
        st.stamp(&mut cm.metadata);
        let name = cm.metadata.name.clone().unwrap_or_default();
        st.config_maps.insert((namespace.to_string(), name), cm.clone());
        cm
    }

    pub fn workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Option<Workload> {
        self.lock().workloads.get(&store_key(kind, namespace, name)).cloned()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.lock().config_maps.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn cron_job(&self, namespace: &str, name: &str) -> Option<CronJob> {
        match self.workload(WorkloadKind::CronJob, namespace, name) {
            Some(Workload::CronJob(cj)) => Some(cj),
            _ => None,
        }
    }

    pub fn config_maps(&self, namespace: &str) -> Vec<ConfigMap> {
        let st = self.lock();
        let mut v: Vec<ConfigMap> = st.config_maps.iter().filter(|((ns, _), _)| ns == namespace).map(|(_, cm)| cm.clone()).collect();
        v.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        v
    }

    pub fn cron_jobs(&self, namespace: &str) -> Vec<CronJob> {
        let st = self.lock();
        let mut v: Vec<CronJob> = st
            .workloads
            .values()
            .filter_map(|w| match w {
                Workload::CronJob(cj) if w.namespace() == namespace => Some(cj.clone()),
                _ => None,
            })
            .collect();
        v.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        v
    }

    /// Queue an error returned by the next call to `op` (FIFO per op).
    pub fn fail_next(&self, op: MemOp, err: ClusterError) { self.lock().faults.entry(op).or_default().push_back(err); }

    /// Let the next successful call to `op` take effect, then report `err` anyway,
    /// as when a reply is lost after the server committed the write.
    pub fn lose_reply(&self, op: MemOp, err: ClusterError) { self.lock().lost_replies.entry(op).or_default().push_back(err); }

    pub fn calls(&self, op: MemOp) -> u32 { self.lock().calls.get(&op).copied().unwrap_or(0) }

    /// Deleted pods stay readable for `gets` further reads before they disappear.
    pub fn set_pod_delete_lag(&self, gets: u32) { self.lock().pod_delete_lag = gets; }

    /// Simulate a write by another client: bumps the stored resourceVersion.
    pub fn touch(&self, kind: WorkloadKind, namespace: &str, name: &str) -> bool {
        let mut st = self.lock();
        let key = store_key(kind, namespace, name);
        let Some(mut w) = st.workloads.remove(&key) else { return false };
        st.stamp(w.meta_mut());
        st.workloads.insert(key, w);
        true
    }

    fn replace_locked(st: &mut State, mut incoming: Workload) -> Result<Workload, ClusterError> {
        let key = key_of(&incoming);
        let Some(current) = st.workloads.get(&key) else {
            return Err(ClusterError::NotFound(describe(key.0, &key.1, &key.2)));
        };
        if let Some(rv) = incoming.meta().resource_version.as_deref() {
            if current.meta().resource_version.as_deref() != Some(rv) {
                return Err(ClusterError::Conflict(format!(
                    "{}: the object has been modified",
                    describe(key.0, &key.1, &key.2)
                )));
            }
        }
        incoming.meta_mut().uid = current.meta().uid.clone();
        st.stamp(incoming.meta_mut());
        st.workloads.insert(key, incoming.clone());
        Ok(incoming)
    }

    fn create_locked(st: &mut State, mut incoming: Workload) -> Result<Workload, ClusterError> {
        let key = key_of(&incoming);
        let pod_key = (key.1.clone(), key.2.clone());
        if st.workloads.contains_key(&key) || (key.0 == WorkloadKind::Pod && st.terminating.contains_key(&pod_key)) {
            return Err(ClusterError::AlreadyExists(describe(key.0, &key.1, &key.2)));
        }
        incoming.meta_mut().resource_version = None;
        incoming.meta_mut().uid = None;
        st.stamp(incoming.meta_mut());
        st.workloads.insert(key, incoming.clone());
        Ok(incoming)
    }

    fn delete_locked(st: &mut State, kind: WorkloadKind, namespace: &str, name: &str) -> bool {
        let key = store_key(kind, namespace, name);
        match st.workloads.remove(&key) {
            Some(w) if kind == WorkloadKind::Pod && st.pod_delete_lag > 0 => {
                let lag = st.pod_delete_lag;
                st.terminating.insert((key.1, key.2), (w, lag));
                true
            }
            Some(_) => true,
            None => false,
        }
    }
}

#[async_trait]
impl ClusterClient for MemCluster {
    async fn get_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<Option<Workload>, ClusterError> {
        if kind == WorkloadKind::Job {
            return Err(ClusterError::Other(format!("kind {} is not served", kind)));
        }
        let mut st = self.lock();
        st.enter(MemOp::GetWorkload)?;
        if let Some(w) = st.workloads.get(&store_key(kind, namespace, name)) {
            return Ok(Some(w.clone()));
        }
        if kind == WorkloadKind::Pod {
            let pod_key = (namespace.to_string(), name.to_string());
            if let Some((w, left)) = st.terminating.get_mut(&pod_key) {
                let seen = w.clone();
                *left -= 1;
                if *left == 0 {
                    st.terminating.remove(&pod_key);
                }
                return Ok(Some(seen));
            }
        }
        Ok(None)
    }

    async fn replace_workload(&self, workload: &Workload) -> Result<Workload, ClusterError> {
        let mut st = self.lock();
        st.enter(MemOp::ReplaceWorkload)?;
        let res = Self::replace_locked(&mut st, workload.clone());
        st.leave(MemOp::ReplaceWorkload, res)
    }

    async fn create_workload(&self, workload: &Workload) -> Result<Workload, ClusterError> {
        let mut st = self.lock();
        st.enter(MemOp::CreateWorkload)?;
        let res = Self::create_locked(&mut st, workload.clone());
        st.leave(MemOp::CreateWorkload, res)
    }

    async fn delete_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let mut st = self.lock();
        st.enter(MemOp::DeleteWorkload)?;
        Ok(Self::delete_locked(&mut st, kind, namespace, name))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        let mut st = self.lock();
        st.enter(MemOp::GetConfigMap)?;
        Ok(st.config_maps.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError> {
        let mut st = self.lock();
        st.enter(MemOp::CreateConfigMap)?;
        let name = config_map.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        if st.config_maps.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("ConfigMap {}/{}", namespace, name)));
        }
        let mut cm = config_map.clone();
        cm.metadata.namespace = Some(namespace.to_string());
        cm.metadata.resource_version = None;
        st.stamp(&mut cm.metadata);
        st.config_maps.insert(key, cm.clone());
        st.leave(MemOp::CreateConfigMap, Ok(cm))
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let mut st = self.lock();
        st.enter(MemOp::DeleteConfigMap)?;
        Ok(st.config_maps.remove(&(namespace.to_string(), name.to_string())).is_some())
    }

    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<Option<CronJob>, ClusterError> {
        let mut st = self.lock();
        st.enter(MemOp::GetCronJob)?;
        Ok(match st.workloads.get(&(WorkloadKind::CronJob, namespace.to_string(), name.to_string())) {
            Some(Workload::CronJob(cj)) => Some(cj.clone()),
            _ => None,
        })
    }

    async fn create_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, ClusterError> {
        let mut st = self.lock();
        st.enter(MemOp::CreateCronJob)?;
        let mut cj = cron_job.clone();
        cj.metadata.namespace = Some(namespace.to_string());
        let res = match Self::create_locked(&mut st, Workload::CronJob(cj))? {
            Workload::CronJob(cj) => Ok(cj),
            other => Err(ClusterError::Other(format!("unexpected kind {}", other.kind()))),
        };
        st.leave(MemOp::CreateCronJob, res)
    }

    async fn replace_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, ClusterError> {
        let mut st = self.lock();
        st.enter(MemOp::ReplaceCronJob)?;
        let mut cj = cron_job.clone();
        cj.metadata.namespace = Some(namespace.to_string());
        let res = match Self::replace_locked(&mut st, Workload::CronJob(cj))? {
            Workload::CronJob(cj) => Ok(cj),
            other => Err(ClusterError::Other(format!("unexpected kind {}", other.kind()))),
        };
        st.leave(MemOp::ReplaceCronJob, res)
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let mut st = self.lock();
        st.enter(MemOp::DeleteCronJob)?;
        Ok(Self::delete_locked(&mut st, WorkloadKind::CronJob, namespace, name))
    }
}
