use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tether_core::{AgentError, AgentResult};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error};
use url::Url;

/// Path the notification server serves its websocket on.
pub const NOTIFICATION_PATH: &str = "/v1/waitfornotification";
pub const COMPONENT: &str = "TriggerHandler";

/// The piece of the websocket transport the agent needs directly.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn write_ping(&self) -> anyhow::Result<()>;
}

/// Ping every `every` until a send fails. Only ever returns an error.
pub async fn keepalive<C: Connector + ?Sized>(conn: &C, every: Duration) -> AgentResult<()> {
    let mut tick = interval_at(Instant::now() + every, every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        if let Err(e) = conn.write_ping().await {
            counter!("keepalive_failures_total", 1u64);
            error!(error = %e, "keepalive ping failed; connection must be re-established");
            return Err(AgentError::Transport(format!("ping: {:#}", e)));
        }
        debug!("keepalive ping sent");
    }
}

/// Websocket URL of the notification server; `None` when no server is configured.
pub fn notification_url(server: &str, customer: &str, cluster: &str) -> AgentResult<Option<Url>> {
    let server = server.trim();
    if server.is_empty() {
        return Ok(None);
    }
    let (scheme, host) = if let Some(h) = server.strip_prefix("wss://") {
        ("wss", h)
    } else if let Some(h) = server.strip_prefix("ws://") {
        ("ws", h)
    } else {
        ("ws", server)
    };
    let host = host.trim_end_matches('/');
    let mut url = Url::parse(&format!("{}://{}", scheme, host))
        .map_err(|e| AgentError::Transport(format!("bad notification server {:?}: {}", server, e)))?;
    url.set_path(NOTIFICATION_PATH);
    url.query_pairs_mut()
        .append_pair("customerGUID", customer)
        .append_pair("clusterName", cluster)
        .append_pair("clusterComponent", COMPONENT);
    Ok(Some(url))
}
