//! Bounded exponential backoff with jitter for cluster calls.
//!
//! Callers pass a predicate that decides which errors are worth another
//! attempt; everything else is returned immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use tether_core::AgentConfig;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self { Self { max_attempts: attempts.max(1), ..Default::default() } }

    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self { max_attempts: cfg.retry_attempts.max(1), initial_delay: cfg.retry_initial(), ..Default::default() }
    }

    /// No sleeping between attempts; used by tests and dry runs.
    pub fn immediate(attempts: u32) -> Self {
        Self { max_attempts: attempts.max(1), initial_delay: Duration::ZERO, max_delay: Duration::ZERO, backoff_multiplier: 1.0 }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the attempt budget is spent.
pub async fn retry_if<T, E, F, Fut, P>(config: &RetryConfig, op_name: &str, is_retryable: P, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max = config.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => {
                if attempt > 1 {
                    debug!(op = %op_name, attempt, "succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) if attempt < max && is_retryable(&e) => {
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let sleep_for = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
                warn!(op = %op_name, attempt, error = %e, delay_ms = %sleep_for.as_millis(), "retrying");
                counter!("cluster_retries", 1u64);
                if !sleep_for.is_zero() {
                    tokio::time::sleep(sleep_for).await;
                }
                delay = Duration::from_secs_f64((delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()));
            }
            Err(e) => return Err(e),
        }
    }
}
