//! Tether core types: commands, workload identifiers, injected-metadata
//! vocabulary, naming rules, configuration and the shared error taxonomy.

#![forbid(unsafe_code)]

pub mod command;
pub mod config;
pub mod error;
pub mod naming;
pub mod vocab;
pub mod wlid;

pub use command::{
    Command, CronJobParams, Designator, JobTracking, SafeMode, TriggerRequest, DESIGNATOR_ATTRIBUTES,
    DESIGNATOR_WLID,
};
pub use config::AgentConfig;
pub use error::{AgentError, AgentResult, ClusterError};
pub use naming::{cron_job_name, normalize, try_normalize, CRON_JOB_NAME_LIMIT, INVALID_NAME};
pub use vocab::Vocabulary;
pub use wlid::{Wlid, WorkloadKind};

pub mod prelude {
    pub use super::{
        AgentConfig, AgentError, AgentResult, ClusterError, Command, Designator, JobTracking, Vocabulary, Wlid,
        WorkloadKind,
    };
}
