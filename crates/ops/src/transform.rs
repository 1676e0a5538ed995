//! Pure metadata/spec transforms. No I/O; the caller supplies the timestamp.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tether_core::vocab::{INJECT_VALUE, NIL_OVERRIDE, SIGNED_VALUE};
use tether_core::{AgentError, AgentResult, Vocabulary, WorkloadKind};
use tether_kubehub::Workload;
use tracing::warn;

use crate::Operation;

fn labels(meta: &mut ObjectMeta) -> &mut BTreeMap<String, String> { meta.labels.get_or_insert_with(BTreeMap::new) }

fn annotations(meta: &mut ObjectMeta) -> &mut BTreeMap<String, String> {
    meta.annotations.get_or_insert_with(BTreeMap::new)
}

/// WLID annotations (when given), update timestamp, inject labels.
pub fn inject_meta(meta: &mut ObjectMeta, wlid: Option<&str>, vocab: &Vocabulary, now: &str) {
    let a = annotations(meta);
    if let Some(w) = wlid {
        a.insert(vocab.wlid_annotation_deprecated.clone(), w.to_string());
        a.insert(vocab.wlid_annotation.clone(), w.to_string());
    }
    a.insert(vocab.update_annotation.clone(), now.to_string());
    let l = labels(meta);
    l.insert(vocab.inject_label.clone(), INJECT_VALUE.to_string());
    l.insert(vocab.inject_label_deprecated.clone(), INJECT_VALUE.to_string());
}

pub fn sign_meta(meta: &mut ObjectMeta, vocab: &Vocabulary, now: &str) {
    labels(meta).insert(vocab.signed_label.clone(), SIGNED_VALUE.to_string());
    touch_meta(meta, vocab, now);
}

pub fn touch_meta(meta: &mut ObjectMeta, vocab: &Vocabulary, now: &str) {
    annotations(meta).insert(vocab.update_annotation.clone(), now.to_string());
}

/// Drop every vocabulary label/annotation. Maps left empty are cleared.
pub fn remove_meta(meta: &mut ObjectMeta, vocab: &Vocabulary) {
    if let Some(l) = meta.labels.as_mut() {
        for k in vocab.removable_labels() {
            l.remove(k);
        }
    }
    if let Some(a) = meta.annotations.as_mut() {
        for k in vocab.removable_annotations() {
            a.remove(k);
        }
    }
    clear_empty(meta);
}

pub fn strip_controller_label(meta: &mut ObjectMeta, vocab: &Vocabulary) {
    if let Some(l) = meta.labels.as_mut() {
        l.remove(&vocab.controller_label);
    }
    clear_empty(meta);
}

fn clear_empty(meta: &mut ObjectMeta) {
    if meta.labels.as_ref().is_some_and(|l| l.is_empty()) {
        meta.labels = None;
    }
    if meta.annotations.as_ref().is_some_and(|a| a.is_empty()) {
        meta.annotations = None;
    }
}

fn parse_override(container: &str, env: &str, raw: &str) -> Option<Vec<String>> {
    if raw == NIL_OVERRIDE {
        warn!(container = %container, env = %env, "override is nil; leaving container untouched");
        return None;
    }
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(container = %container, env = %env, value = %raw, error = %e, "override is not a JSON string array; skipping");
            None
        }
    }
}

fn restore_container(c: &mut Container, vocab: &Vocabulary) {
    let Some(envs) = c.env.as_ref() else { return };
    let mut command = None;
    let mut args = None;
    for e in envs {
        let Some(value) = e.value.as_deref() else { continue };
        if e.name == vocab.overridden_cmd_env {
            command = parse_override(&c.name, &e.name, value);
        } else if e.name == vocab.overridden_args_env {
            args = parse_override(&c.name, &e.name, value);
        }
    }
    if let Some(cmd) = command {
        c.command = Some(cmd);
    }
    if let Some(a) = args {
        c.args = Some(a);
    }
}

/// Put back the command/args recorded in the override env vars.
pub fn restore_container_command(spec: &mut PodSpec, vocab: &Vocabulary) {
    for c in spec.containers.iter_mut() {
        restore_container(c, vocab);
    }
}

/// Remove the injected init container, volumes, env vars and volume mounts. Order is preserved.
pub fn remove_injected_spec(spec: &mut PodSpec, vocab: &Vocabulary) {
    if let Some(init) = spec.init_containers.as_mut() {
        init.retain(|c| c.name != vocab.init_container);
    }
    if let Some(vols) = spec.volumes.as_mut() {
        vols.retain(|v| !vocab.injected_volumes.contains(&v.name));
    }
    for c in spec.containers.iter_mut() {
        if let Some(env) = c.env.as_mut() {
            env.retain(|e| !vocab.injected_env.contains(&e.name));
        }
        if let Some(mounts) = c.volume_mounts.as_mut() {
            mounts.retain(|m| !vocab.injected_volume_mounts.contains(&m.name));
        }
    }
}

fn remove_pod(meta: &mut ObjectMeta, spec: Option<&mut PodSpec>, vocab: &Vocabulary) {
    if let Some(spec) = spec {
        restore_container_command(spec, vocab);
        remove_injected_spec(spec, vocab);
    }
    remove_meta(meta, vocab);
}

fn apply_template(t: &mut PodTemplateSpec, op: Operation, wlid: &str, vocab: &Vocabulary, now: &str) {
    let meta = t.metadata.get_or_insert_with(ObjectMeta::default);
    match op {
        Operation::Inject => inject_meta(meta, Some(wlid), vocab, now),
        Operation::Sign => sign_meta(meta, vocab, now),
        Operation::Restart => {}
        Operation::Remove => {
            if let Some(spec) = t.spec.as_mut() {
                restore_container_command(spec, vocab);
                remove_injected_spec(spec, vocab);
            }
            remove_meta(meta, vocab);
        }
    }
    strip_controller_label(meta, vocab);
}

/// Reject op/kind pairs the mutator never handles. Checked before any cluster read.
pub fn check_supported(op: Operation, kind: WorkloadKind) -> AgentResult<()> {
    let ok = match kind {
        WorkloadKind::Job => false,
        WorkloadKind::Namespace => matches!(op, Operation::Inject | Operation::Remove),
        WorkloadKind::Pod => true,
        _ => op != Operation::Restart,
    };
    if ok { Ok(()) } else { Err(AgentError::unsupported_kind(op.as_str(), kind.as_str())) }
}

/// Apply `op` to a fetched workload in place.
pub fn mutate(workload: &mut Workload, op: Operation, wlid: &str, vocab: &Vocabulary, now: &str) -> AgentResult<()> {
    let kind = workload.kind();
    check_supported(op, kind)?;
    match workload {
        Workload::Namespace(ns) => {
            let meta = &mut ns.metadata;
            match op {
                Operation::Inject => inject_meta(meta, None, vocab, now),
                _ => remove_meta(meta, vocab),
            }
            strip_controller_label(meta, vocab);
        }
        Workload::Pod(pod) => {
            let spec = pod.spec.as_mut();
            let meta = &mut pod.metadata;
            match op {
                Operation::Inject => inject_meta(meta, Some(wlid), vocab, now),
                Operation::Sign => sign_meta(meta, vocab, now),
                Operation::Restart => touch_meta(meta, vocab, now),
                Operation::Remove => remove_pod(meta, spec, vocab),
            }
            strip_controller_label(meta, vocab);
        }
        _ => {
            if op == Operation::Remove {
                remove_meta(workload.meta_mut(), vocab);
            }
            let name = workload.name().to_string();
            let template = workload
                .pod_template_mut()
                .ok_or_else(|| AgentError::InvalidCommand(format!("{} {} has no pod template", kind, name)))?;
            apply_template(template, op, wlid, vocab, now);
        }
    }
    Ok(())
}
