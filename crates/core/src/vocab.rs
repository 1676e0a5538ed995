//! Injected-metadata vocabulary shared with the other platform components.
//!
//! Keys must match byte for byte; agents and scanners read them back.

use serde::{Deserialize, Serialize};

/// Value written to the inject labels on INJECT.
pub const INJECT_VALUE: &str = "add";
/// Value written to the signed label on SIGN.
pub const SIGNED_VALUE: &str = "signed";
/// Override env var value meaning "no original command/args were recorded".
pub const NIL_OVERRIDE: &str = "nil";
/// chrono format of the update-timestamp annotation (UTC).
pub const UPDATE_TIME_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Read-only table of label/annotation keys and injected object names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub inject_label: String,
    pub inject_label_deprecated: String,
    pub signed_label: String,
    pub update_annotation: String,
    pub wlid_annotation: String,
    pub wlid_annotation_deprecated: String,
    pub status_annotation: String,
    pub signed_annotation: String,
    pub attached_annotation: String,
    pub controller_label: String,
    pub job_id_annotation: String,
    pub job_id_annotation_deprecated: String,
    pub init_container: String,
    pub injected_volumes: Vec<String>,
    pub injected_volume_mounts: Vec<String>,
    pub injected_env: Vec<String>,
    pub overridden_cmd_env: String,
    pub overridden_args_env: String,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let s = |v: &str| v.to_string();
        Self {
            inject_label: s("armo.inject"),
            inject_label_deprecated: s("cyberarmor.inject"),
            signed_label: s("cyberarmor"),
            update_annotation: s("cyberarmor.last-update"),
            wlid_annotation: s("armo.wlid"),
            wlid_annotation_deprecated: s("wlid"),
            status_annotation: s("cyberarmor.status"),
            signed_annotation: s("cyberarmor.signed"),
            attached_annotation: s("cyberarmor.attached"),
            controller_label: s("controller-uid"),
            job_id_annotation: s("armo.jobid"),
            job_id_annotation_deprecated: s("armo.cloud/jobid"),
            init_container: s("ca-init-container"),
            injected_volumes: vec![s("ca-shared-volume"), s("ca-dynamic-config")],
            injected_volume_mounts: vec![s("ca-shared-volume"), s("ca-dynamic-config")],
            injected_env: vec![
                s("CAA_HOME"),
                s("LD_PRELOAD"),
                s("CAA_ENABLE_CRASH_REPORTER"),
                s("CAA_GUID"),
                s("CAA_POD_NAME"),
                s("CAA_POD_NAMESPACE"),
                s("CAA_CONTAINER_NAME"),
                s("CAA_CONTAINER_IMAGE_NAME"),
                s("CAA_LOADNAMES"),
                s("CAA_NOTIFICATION_SERVER"),
                s("CAA_ORACLE_SERVER"),
                s("CAA_OVERRIDDEN_CMD"),
                s("CAA_OVERRIDDEN_ARGS"),
            ],
            overridden_cmd_env: s("CAA_OVERRIDDEN_CMD"),
            overridden_args_env: s("CAA_OVERRIDDEN_ARGS"),
        }
    }
}

impl Vocabulary {
    /// Labels REMOVE strips (current + deprecated).
    pub fn removable_labels(&self) -> [&str; 3] {
        [self.inject_label.as_str(), self.inject_label_deprecated.as_str(), self.signed_label.as_str()]
    }

    /// Annotations REMOVE strips (current + deprecated).
    pub fn removable_annotations(&self) -> [&str; 6] {
        [
            self.wlid_annotation.as_str(),
            self.wlid_annotation_deprecated.as_str(),
            self.status_annotation.as_str(),
            self.signed_annotation.as_str(),
            self.attached_annotation.as_str(),
            self.update_annotation.as_str(),
        ]
    }

    pub fn job_id_annotations(&self) -> [&str; 2] { [self.job_id_annotation.as_str(), self.job_id_annotation_deprecated.as_str()] }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_envs_are_part_of_injected_env() {
        let v = Vocabulary::default();
        assert!(v.injected_env.contains(&v.overridden_cmd_env));
        assert!(v.injected_env.contains(&v.overridden_args_env));
    }

    #[test]
    fn controller_label_is_not_removable_vocabulary() {
        let v = Vocabulary::default();
        assert!(!v.removable_labels().contains(&v.controller_label.as_str()));
    }
}
