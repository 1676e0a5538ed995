//! Runtime configuration read from `TETHER_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Namespace holding templates, trigger ConfigMaps and CronJobs.
    pub namespace: String,
    pub cluster_name: String,
    pub workers: usize,
    pub command_queue_cap: usize,
    pub safe_mode_queue_cap: usize,
    pub keepalive_secs: u64,
    /// Upper bound for a single cluster API call.
    pub call_timeout_secs: u64,
    pub pod_delete_poll_millis: u64,
    pub pod_delete_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_initial_millis: u64,
    /// Serialize commands that resolve to the same workload.
    pub serialize_per_target: bool,
    pub registry_scan_template: String,
    pub kubescape_template: String,
    pub vuln_scan_template: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            namespace: "kubescape".to_string(),
            cluster_name: String::new(),
            workers: 3,
            command_queue_cap: 128,
            safe_mode_queue_cap: 128,
            keepalive_secs: 30,
            call_timeout_secs: 30,
            pod_delete_poll_millis: 1000,
            pod_delete_timeout_secs: 120,
            retry_attempts: 5,
            retry_initial_millis: 200,
            serialize_per_target: true,
            registry_scan_template: "registry-scan-cronjob-template".to_string(),
            kubescape_template: "kubescape-cronjob-template".to_string(),
            vuln_scan_template: "kubevuln-cronjob-template".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            namespace: std::env::var("TETHER_NAMESPACE").unwrap_or(d.namespace),
            cluster_name: std::env::var("TETHER_CLUSTER_NAME").unwrap_or(d.cluster_name),
            workers: env_or("TETHER_WORKERS", d.workers).max(1),
            command_queue_cap: env_or("TETHER_COMMAND_QUEUE_CAP", d.command_queue_cap).max(1),
            safe_mode_queue_cap: env_or("TETHER_SAFE_MODE_QUEUE_CAP", d.safe_mode_queue_cap).max(1),
            keepalive_secs: env_or("TETHER_KEEPALIVE_SECS", d.keepalive_secs).max(1),
            call_timeout_secs: env_or("TETHER_CALL_TIMEOUT_SECS", d.call_timeout_secs).max(1),
            pod_delete_poll_millis: env_or("TETHER_POD_DELETE_POLL_MILLIS", d.pod_delete_poll_millis).max(1),
            pod_delete_timeout_secs: env_or("TETHER_POD_DELETE_TIMEOUT_SECS", d.pod_delete_timeout_secs),
            retry_attempts: env_or("TETHER_RETRY_ATTEMPTS", d.retry_attempts).max(1),
            retry_initial_millis: env_or("TETHER_RETRY_INITIAL_MILLIS", d.retry_initial_millis),
            serialize_per_target: env_flag("TETHER_SERIALIZE_PER_TARGET", d.serialize_per_target),
            registry_scan_template: std::env::var("TETHER_REGISTRY_SCAN_TEMPLATE").unwrap_or(d.registry_scan_template),
            kubescape_template: std::env::var("TETHER_KUBESCAPE_TEMPLATE").unwrap_or(d.kubescape_template),
            vuln_scan_template: std::env::var("TETHER_VULN_SCAN_TEMPLATE").unwrap_or(d.vuln_scan_template),
        }
    }

    pub fn keepalive(&self) -> Duration { Duration::from_secs(self.keepalive_secs) }
    pub fn call_timeout(&self) -> Duration { Duration::from_secs(self.call_timeout_secs) }
    pub fn pod_delete_poll(&self) -> Duration { Duration::from_millis(self.pod_delete_poll_millis) }
    pub fn pod_delete_timeout(&self) -> Duration { Duration::from_secs(self.pod_delete_timeout_secs) }
    pub fn retry_initial(&self) -> Duration { Duration::from_millis(self.retry_initial_millis) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_platform_chart() {
        let c = AgentConfig::default();
        assert_eq!(c.namespace, "kubescape");
        assert_eq!(c.workers, 3);
        assert_eq!(c.keepalive(), Duration::from_secs(30));
        assert!(c.serialize_per_target);
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("TETHER_WORKERS", "7");
        std::env::set_var("TETHER_SERIALIZE_PER_TARGET", "false");
        std::env::set_var("TETHER_KEEPALIVE_SECS", "not-a-number");
        let c = AgentConfig::from_env();
        assert_eq!(c.workers, 7);
        assert!(!c.serialize_per_target);
        assert_eq!(c.keepalive_secs, 30);
        std::env::remove_var("TETHER_WORKERS");
        std::env::remove_var("TETHER_SERIALIZE_PER_TARGET");
        std::env::remove_var("TETHER_KEEPALIVE_SECS");
    }
}
