use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub command: String,
    pub status: JobStatus,
    pub actions: u32,
    pub failures: u32,
    started: Instant,
    finished: Option<Instant>,
}

impl JobRecord {
    pub fn elapsed(&self) -> Duration { self.finished.unwrap_or_else(Instant::now).duration_since(self.started) }
}

/// Status of every job seen since startup, keyed by job id.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: DashMap<String, JobRecord>,
}

impl JobTracker {
    pub fn new() -> Self { Self::default() }

    /// A job id seen again (e.g. re-sent by the backend) starts over.
    pub fn start(&self, job_id: &str, command: &str) {
        self.jobs.insert(
            job_id.to_string(),
            JobRecord {
                command: command.to_string(),
                status: JobStatus::Running,
                actions: 0,
                failures: 0,
                started: Instant::now(),
                finished: None,
            },
        );
    }

    pub fn action_done(&self, job_id: &str, ok: bool) {
        if let Some(mut rec) = self.jobs.get_mut(job_id) {
            rec.actions += 1;
            if !ok {
                rec.failures += 1;
            }
        }
    }

    pub fn finish(&self, job_id: &str, outcome: Result<(), String>) {
        if let Some(mut rec) = self.jobs.get_mut(job_id) {
            rec.status = match outcome {
                Ok(()) => JobStatus::Succeeded,
                Err(reason) => JobStatus::Failed(reason),
            };
            rec.finished = Some(Instant::now());
        }
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> { self.jobs.get(job_id).map(|r| r.status.clone()) }

    pub fn record(&self, job_id: &str) -> Option<JobRecord> { self.jobs.get(job_id).map(|r| r.clone()) }

    pub fn running(&self) -> usize { self.jobs.iter().filter(|r| r.status == JobStatus::Running).count() }

    pub fn len(&self) -> usize { self.jobs.len() }

    pub fn is_empty(&self) -> bool { self.jobs.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_of_a_job() {
        let t = JobTracker::new();
        t.start("j1", "inject");
        assert_eq!(t.status("j1"), Some(JobStatus::Running));
        assert_eq!(t.running(), 1);
        t.action_done("j1", true);
        t.action_done("j1", false);
        t.finish("j1", Err("not found: x".into()));
        let rec = t.record("j1").unwrap();
        assert_eq!((rec.actions, rec.failures), (2, 1));
        assert_eq!(rec.status, JobStatus::Failed("not found: x".into()));
        assert_eq!(t.running(), 0);
    }

    #[test]
    fn unknown_job_is_ignored() {
        let t = JobTracker::new();
        t.action_done("nope", true);
        t.finish("nope", Ok(()));
        assert!(t.is_empty());
        assert!(t.status("nope").is_none());
    }
}
