use metrics::counter;
use tether_core::SafeMode;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Log every safe-mode record until the queue closes. Returns how many were seen.
pub async fn consume_safe_mode(mut rx: mpsc::Receiver<SafeMode>) -> u64 {
    let mut seen = 0u64;
    while let Some(sm) = rx.recv().await {
        seen += 1;
        counter!("safe_mode_reports_total", 1u64);
        if sm.status_code != 0 || sm.process_exit_code != 0 {
            warn!(
                reporter = %sm.reporter,
                action = %sm.action,
                wlid = %sm.wlid,
                pod = %sm.pod_name,
                instance = %sm.instance_id,
                container = %sm.container_name,
                status = sm.status_code,
                exit_code = sm.process_exit_code,
                message = %sm.message,
                "workload entered safe mode"
            );
        } else {
            info!(reporter = %sm.reporter, action = %sm.action, wlid = %sm.wlid, pod = %sm.pod_name, instance = %sm.instance_id, "safe mode report");
        }
    }
    seen
}
