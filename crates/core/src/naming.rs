//! Kubernetes object name normalization (DNS label rules).
//!
//! <https://kubernetes.io/docs/concepts/overview/working-with-objects/names/#dns-label-names>

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AgentError;

/// CronJob names are capped below the 63-char DNS label limit because the
/// controller appends an 11-char suffix to spawned Job names.
pub const CRON_JOB_NAME_LIMIT: usize = 52;

/// Returned by [`normalize`] when nothing usable survives.
pub const INVALID_NAME: &str = "invalid name was given";

static NOT_DNS_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9-]").expect("static regex"));

/// Convert `raw` into a lower-case DNS-label-safe name of at most `limit` characters
/// without a trailing hyphen. Yields [`INVALID_NAME`] when the result would be empty.
pub fn normalize(raw: &str, limit: usize) -> String {
    let truncated: String = raw.chars().take(limit).collect();
    let replaced = NOT_DNS_LABEL.replace_all(&truncated, "-").to_ascii_lowercase();
    let trimmed = replaced.trim_end_matches('-');
    if trimmed.is_empty() {
        return INVALID_NAME.to_string();
    }
    trimmed.to_string()
}

/// Checked form of [`normalize`]: the sentinel becomes an error.
pub fn try_normalize(raw: &str, limit: usize) -> Result<String, AgentError> {
    let name = normalize(raw, limit);
    if name == INVALID_NAME {
        return Err(AgentError::InvalidName(raw.to_string()));
    }
    Ok(name)
}

pub fn cron_job_name(raw: &str) -> Result<String, AgentError> { try_normalize(raw, CRON_JOB_NAME_LIMIT) }
