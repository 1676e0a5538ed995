use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;
use tether_core::{AgentConfig, AgentError, ClusterError, Command, TriggerRequest, Vocabulary};
use tether_cronjob::{bound_config_map, JobLifecycle, TriggerKind, PAYLOAD_KEY, TEMPLATE_KEY};
use tether_kubehub::{MemCluster, MemOp, RetryConfig};

const NS: &str = "kubescape";

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

fn setup(with_template: bool) -> (Arc<MemCluster>, JobLifecycle) {
    let mem = Arc::new(MemCluster::new());
    let cfg = AgentConfig::default();
    if with_template {
        mem.insert_config_map(
            NS,
            ConfigMap {
                metadata: ObjectMeta { name: Some(cfg.registry_scan_template.clone()), ..Default::default() },
                data: Some(BTreeMap::from([(TEMPLATE_KEY.to_string(), TEMPLATE.to_string())])),
                ..Default::default()
            },
        );
    }
    let jobs = JobLifecycle::new(mem.clone(), Arc::new(Vocabulary::default()), &cfg).with_retry(RetryConfig::immediate(3));
    (mem, jobs)
}

fn set_command() -> Command {
    Command::new("setRegistryScanCronJob")
        .with_job_id("job-1")
        .with_arg("registryName", json!("quay.io/acme"))
        .with_arg("jobParams", json!({"cronTabSchedule": "0 * * * *"}))
}

fn job_ids(cj: &CronJob) -> (String, String) {
    let ann = cj.spec.as_ref().unwrap().job_template.spec.as_ref().unwrap().template.metadata.as_ref().unwrap().annotations.clone().unwrap();
    (ann["armo.jobid"].clone(), ann["armo.cloud/jobid"].clone())
}

fn update_command(name: &str, schedule: &str, job_id: &str) -> Command {
    Command::new("updateRegistryScanCronJob").with_job_id(job_id).with_arg("jobParams", json!({"name": name, "cronTabSchedule": schedule}))
}

#[tokio::test]
async fn create_update_delete_round_trip() {
    let (mem, jobs) = setup(true);
    let cmd = set_command();
    let created = jobs.create(TriggerKind::RegistryScan, &cmd).await.unwrap();
    let name = created.metadata.name.clone().unwrap();
    assert!(name.len() <= 52);
    assert_eq!(name, name.to_lowercase());
    assert!(name.ends_with("-registry-scan"));

    let stored = mem.cron_job(NS, &name).unwrap();
    assert_eq!(stored.spec.as_ref().unwrap().schedule, "0 * * * *");
    assert_eq!(job_ids(&stored), ("job-1".to_string(), "job-1".to_string()));
    assert_eq!(bound_config_map(&stored), Some(name.as_str()));
    assert_eq!(stored.metadata.labels.as_ref().unwrap()["app"], name);

    let cm = mem.config_map(NS, &name).unwrap();
    let req: TriggerRequest = serde_json::from_str(&cm.data.as_ref().unwrap()[PAYLOAD_KEY]).unwrap();
    assert_eq!(req.command, cmd);
    assert_eq!(req.name, name);
    assert_eq!(req.target_name, "quay.io/acme");

    // New schedule, no job id: the job id annotations survive.
    jobs.update(&update_command(&name, "*/5 * * * *", "")).await.unwrap();
    let stored = mem.cron_job(NS, &name).unwrap();
    assert_eq!(stored.spec.as_ref().unwrap().schedule, "*/5 * * * *");
    assert_eq!(job_ids(&stored).0, "job-1");

    jobs.update(&update_command(&name, "*/5 * * * *", "job-2")).await.unwrap();
    assert_eq!(job_ids(&mem.cron_job(NS, &name).unwrap()), ("job-2".to_string(), "job-2".to_string()));

    let del = Command::new("deleteRegistryScanCronJob").with_arg("jobParams", json!({"name": name}));
    assert!(jobs.delete(&del).await.unwrap());
    assert!(mem.cron_job(NS, &name).is_none());
    assert!(mem.config_map(NS, &name).is_none());
    assert!(!jobs.delete(&del).await.unwrap());
}

#[tokio::test]
async fn missing_template_creates_nothing() {
    let (mem, jobs) = setup(false);
    let err = jobs.create(TriggerKind::RegistryScan, &set_command()).await.unwrap_err();
    assert!(matches!(err, AgentError::TemplateNotFound(_)), "{:?}", err);
    assert!(mem.config_maps(NS).is_empty());
    assert!(mem.cron_jobs(NS).is_empty());
}

#[tokio::test]
async fn registry_scan_requires_registry_name() {
    let (mem, jobs) = setup(true);
    let cmd = Command::new("setRegistryScanCronJob").with_job_id("j");
    assert!(matches!(jobs.create(TriggerKind::RegistryScan, &cmd).await, Err(AgentError::InvalidCommand(_))));
    assert_eq!(mem.calls(MemOp::GetConfigMap), 0);
}

#[tokio::test]
async fn cronjob_failure_after_configmap_is_partial_create() {
    let (mem, jobs) = setup(true);
    mem.fail_next(MemOp::CreateCronJob, ClusterError::Api { code: 422, reason: "Invalid".into(), message: "schedule".into() });
    let err = jobs.create(TriggerKind::RegistryScan, &set_command()).await.unwrap_err();
    match err {
        AgentError::PartialCreate { config_map, source } => {
            assert!(config_map.ends_with("-registry-scan"));
            assert!(matches!(source, ClusterError::Api { code: 422, .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(mem.calls(MemOp::CreateConfigMap), 1);
    assert_eq!(mem.calls(MemOp::DeleteConfigMap), 1);
    // Only the template is left.
    assert_eq!(mem.config_maps(NS).len(), 1);
}

#[tokio::test]
async fn update_retries_conflict_then_gives_up() {
    let (mem, jobs) = setup(true);
    let name = jobs.create(TriggerKind::RegistryScan, &set_command()).await.unwrap().metadata.name.unwrap();

    mem.fail_next(MemOp::ReplaceCronJob, ClusterError::Conflict("rv".into()));
    jobs.update(&update_command(&name, "1 * * * *", "job-3")).await.unwrap();
    assert_eq!(mem.calls(MemOp::GetCronJob), 2);

    for _ in 0..3 {
        mem.fail_next(MemOp::ReplaceCronJob, ClusterError::Conflict("rv".into()));
    }
    let err = jobs.update(&update_command(&name, "2 * * * *", "job-4")).await.unwrap_err();
    assert!(matches!(err, AgentError::Conflict(_)));
    assert_eq!(mem.cron_job(NS, &name).unwrap().spec.unwrap().schedule, "1 * * * *");
}

#[tokio::test]
async fn update_of_missing_cronjob_is_not_found() {
    let (_mem, jobs) = setup(true);
    let err = jobs.update(&update_command("ghost", "* * * * *", "j")).await.unwrap_err();
    assert!(matches!(err, AgentError::NotFound(_)));
}

#[tokio::test]
async fn other_families_use_their_own_template() {
    let (_mem, jobs) = setup(true);
    let cmd = Command::new("setKubescapeCronJob").with_job_id("j");
    let err = jobs.create(TriggerKind::KubescapeScan, &cmd).await.unwrap_err();
    assert!(matches!(err, AgentError::TemplateNotFound(m) if m.contains("kubescape-cronjob-template")));
}

#[tokio::test]
async fn committed_cronjob_behind_a_lost_reply_is_kept() {
    let (mem, jobs) = setup(true);
    mem.lose_reply(MemOp::CreateCronJob, ClusterError::Timeout("create cronjob".into()));
    let cj = jobs.create(TriggerKind::RegistryScan, &set_command()).await.unwrap();
    let name = cj.metadata.name.clone().unwrap();

    assert_eq!(mem.calls(MemOp::CreateCronJob), 2);
    assert_eq!(mem.calls(MemOp::DeleteConfigMap), 0);
    assert_eq!(bound_config_map(&mem.cron_job(NS, &name).unwrap()), Some(name.as_str()));
    assert!(mem.config_map(NS, &name).is_some());
}

#[tokio::test]
async fn committed_configmap_behind_a_lost_reply_is_kept() {
    let (mem, jobs) = setup(true);
    mem.lose_reply(MemOp::CreateConfigMap, ClusterError::Timeout("create configmap".into()));
    let cj = jobs.create(TriggerKind::RegistryScan, &set_command()).await.unwrap();
    let name = cj.metadata.name.unwrap();

    assert_eq!(mem.calls(MemOp::CreateConfigMap), 2);
    assert!(mem.config_map(NS, &name).is_some());
    assert!(mem.cron_job(NS, &name).is_some());
}

#[tokio::test]
async fn foreign_configmap_with_same_name_is_not_adopted() {
    let (mem, jobs) = setup(true);
    // The collision is not backed by a configmap carrying this trigger's payload.
    mem.fail_next(MemOp::CreateConfigMap, ClusterError::AlreadyExists("taken".into()));
    let err = jobs.create(TriggerKind::RegistryScan, &set_command()).await.unwrap_err();
    assert!(matches!(err, AgentError::Cluster(ClusterError::AlreadyExists(_))), "{:?}", err);
    assert_eq!(mem.calls(MemOp::CreateCronJob), 0);
}
