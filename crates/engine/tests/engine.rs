use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Container, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;
use tether_core::{AgentConfig, AgentResult, Command, Vocabulary, Wlid, WorkloadKind};
use tether_cronjob::{JobLifecycle, TEMPLATE_KEY};
use tether_engine::{ActionReport, ActionStatus, ChannelReporter, Engine, JobStatus};
use tether_kubehub::{MemCluster, RetryConfig, Workload};
use tether_ops::{Operation, WorkloadMutator, WorkloadOps};
use tokio::sync::mpsc;

const TEMPLATE: &str = r#"
apiVersion: batch/v1
kind: CronJob
metadata:
  name: registry-scheduler
spec:
  schedule: "0 0 * * *"
  jobTemplate:
    spec:
      template:
        spec:
          restartPolicy: Never
          containers:
            - name: registry-scheduler
              image: curlimages/curl
          volumes:
            - name: request-body-volume
              configMap:
                name: placeholder
"#;

fn app1() -> Workload {
    let meta = ObjectMeta {
        name: Some("app1".into()),
        namespace: Some("ns1".into()),
        labels: Some(BTreeMap::from([("app".to_string(), "app1".to_string())])),
        ..Default::default()
    };
    Workload::Deployment(Deployment {
        metadata: meta.clone(),
        spec: Some(DeploymentSpec {
            template: PodTemplateSpec {
                metadata: Some(meta),
                spec: Some(PodSpec { containers: vec![Container { name: "web".into(), ..Default::default() }], ..Default::default() }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn wlid() -> Wlid { Wlid::parse("wlid://cluster-c1/namespace-ns1/deployment-app1").unwrap() }

struct Harness {
    mem: Arc<MemCluster>,
    engine: Arc<Engine>,
    reports: mpsc::Receiver<ActionReport>,
}

fn harness(cfg: AgentConfig, workloads: Option<Arc<dyn WorkloadOps>>) -> Harness {
    let mem = Arc::new(MemCluster::new());
    mem.insert(app1());
    mem.insert_config_map(
        &cfg.namespace,
        ConfigMap {
            metadata: ObjectMeta { name: Some(cfg.registry_scan_template.clone()), ..Default::default() },
            data: Some(BTreeMap::from([(TEMPLATE_KEY.to_string(), TEMPLATE.to_string())])),
            ..Default::default()
        },
    );
    let vocab = Arc::new(Vocabulary::default());
    let workloads = workloads.unwrap_or_else(|| {
        Arc::new(
            WorkloadMutator::new(mem.clone(), vocab.clone())
                .with_retry(RetryConfig::immediate(3))
                .with_pod_polling(Duration::from_millis(5), Duration::from_secs(1)),
        )
    });
    let jobs = Arc::new(JobLifecycle::new(mem.clone(), vocab, &cfg).with_retry(RetryConfig::immediate(3)));
    let (reporter, reports) = ChannelReporter::channel(64);
    let engine = Arc::new(Engine::new(workloads, jobs, Arc::new(reporter), &cfg));
    Harness { mem, engine, reports }
}

fn drain(rx: &mut mpsc::Receiver<ActionReport>) -> Vec<ActionReport> {
    let mut out = Vec::new();
    while let Ok(r) = rx.try_recv() {
        out.push(r);
    }
    out
}

#[tokio::test]
async fn inject_then_remove_through_the_worker_pool() {
    let mut h = harness(AgentConfig::default(), None);
    let (tx, rx) = mpsc::channel(8);
    let run = tokio::spawn(h.engine.clone().run(rx));

    tx.send(Command::for_wlid("inject", &wlid()).with_job_id("j-inject")).await.unwrap();
    // Wait for the inject to land before queueing the remove.
    let mut seen = Vec::new();
    while seen.len() < 2 {
        seen.push(h.reports.recv().await.unwrap());
    }
    assert_eq!(seen[0].status, ActionStatus::Started);
    assert_eq!(seen[1].status, ActionStatus::Success);
    let injected = h.mem.workload(WorkloadKind::Deployment, "ns1", "app1").unwrap();
    let labels = injected.pod_template().and_then(|t| t.metadata.as_ref()).and_then(|m| m.labels.clone()).unwrap();
    assert_eq!(labels["armo.inject"], "add");

    tx.send(Command::for_wlid("remove", &wlid()).with_job_id("j-remove")).await.unwrap();
    drop(tx);
    run.await.unwrap();

    let stored = h.mem.workload(WorkloadKind::Deployment, "ns1", "app1").unwrap();
    assert_eq!(stored.pod_template(), app1().pod_template());
    let tracker = h.engine.tracker();
    assert_eq!(tracker.status("j-inject"), Some(JobStatus::Succeeded));
    assert_eq!(tracker.status("j-remove"), Some(JobStatus::Succeeded));
    let rest = drain(&mut h.reports);
    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|r| r.target.as_deref() == Some(wlid().to_string().as_str())));
}

#[tokio::test]
async fn registry_scan_trigger_is_created_with_schedule() {
    let cfg = AgentConfig::default();
    let mut h = harness(cfg.clone(), None);
    let cmd = Command::new("setRegistryScanCronJob")
        .with_job_id("j-reg")
        .with_arg("registryName", json!("quay.io/acme"))
        .with_arg("jobParams", json!({"cronTabSchedule": "0 * * * *"}));
    h.engine.execute(cmd).await.unwrap();

    let cjs = h.mem.cron_jobs(&cfg.namespace);
    assert_eq!(cjs.len(), 1);
    let name = cjs[0].metadata.name.clone().unwrap();
    assert_eq!(cjs[0].spec.as_ref().unwrap().schedule, "0 * * * *");
    assert!(h.mem.config_map(&cfg.namespace, &name).is_some());

    let reports = drain(&mut h.reports);
    assert_eq!(reports.last().unwrap().status, ActionStatus::Success);
    assert_eq!(reports.last().unwrap().target.as_deref(), Some(name.as_str()));
}

#[tokio::test]
async fn unknown_command_reports_failure_and_touches_nothing() {
    let mut h = harness(AgentConfig::default(), None);
    let err = h.engine.execute(Command::for_wlid("explode", &wlid())).await.unwrap_err();
    assert_eq!(err.tag(), "unsupported");

    let reports = drain(&mut h.reports);
    assert_eq!(reports.len(), 2);
    assert!(!reports[0].job_id.is_empty(), "a job id is assigned when none was sent");
    match &reports[1].status {
        ActionStatus::Failure { kind, reason } => {
            assert_eq!(kind, "unsupported");
            assert!(reason.contains("explode"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.engine.tracker().status(&reports[0].job_id), Some(JobStatus::Failed(err.to_string())));
    assert_eq!(h.mem.workload(WorkloadKind::Deployment, "ns1", "app1").unwrap().pod_template(), app1().pod_template());
}

#[tokio::test]
async fn failing_target_does_not_stop_the_others() {
    let mut h = harness(AgentConfig::default(), None);
    let mut cmd = Command::for_wlid("sign", &Wlid::parse("wlid://cluster-c1/namespace-ns1/deployment-ghost").unwrap()).with_job_id("j");
    cmd.designators.push(tether_core::Designator::from_wlid(&wlid()));
    let err = h.engine.execute(cmd).await.unwrap_err();
    assert_eq!(err.tag(), "not_found");

    let terminal: Vec<_> = drain(&mut h.reports).into_iter().filter(|r| r.status.is_terminal()).collect();
    assert_eq!(terminal.len(), 2);
    assert!(matches!(terminal[0].status, ActionStatus::Failure { .. }));
    assert_eq!(terminal[1].status, ActionStatus::Success);
    assert_eq!(terminal[1].action_index, 1);
    let rec = h.engine.tracker().record("j").unwrap();
    assert_eq!((rec.actions, rec.failures), (2, 1));
}

/// Records how many applies overlap on the same target.
#[derive(Default)]
struct SlowOps {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl WorkloadOps for SlowOps {
    async fn apply(&self, _wlid: &Wlid, _op: Operation) -> AgentResult<Workload> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Workload::Pod(Pod::default()))
    }
}

async fn peak_overlap(serialize: bool) -> usize {
    let ops = Arc::new(SlowOps::default());
    let cfg = AgentConfig { workers: 4, serialize_per_target: serialize, ..AgentConfig::default() };
    let h = harness(cfg, Some(ops.clone()));
    let (tx, rx) = mpsc::channel(8);
    let run = tokio::spawn(h.engine.clone().run(rx));
    for i in 0..4 {
        tx.send(Command::for_wlid("sign", &wlid()).with_job_id(format!("j{}", i))).await.unwrap();
    }
    drop(tx);
    run.await.unwrap();
    ops.peak.load(Ordering::SeqCst)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_target_is_serialized_when_enabled() {
    assert_eq!(peak_overlap(true).await, 1);
    assert!(peak_overlap(false).await > 1);
}

#[tokio::test]
async fn action_index_saturates_at_the_top_of_the_range() {
    let mut h = harness(AgentConfig::default(), None);
    let mut cmd = Command::for_wlid("sign", &wlid()).with_job_id("j-max");
    cmd.job_tracking.action_index = u32::MAX - 1;
    for name in ["app2", "app3"] {
        let Workload::Deployment(mut d) = app1() else { unreachable!() };
        d.metadata.name = Some(name.into());
        h.mem.insert(Workload::Deployment(d));
        cmd.designators.push(tether_core::Designator::from_wlid(&Wlid::new("c1", "ns1", "deployment", name)));
    }
    h.engine.execute(cmd).await.unwrap();

    let indices: Vec<u32> =
        drain(&mut h.reports).into_iter().filter(|r| r.status.is_terminal()).map(|r| r.action_index).collect();
    assert_eq!(indices, vec![u32::MAX - 1, u32::MAX, u32::MAX]);
}
