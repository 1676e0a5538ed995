//! Tether kubehub – typed cluster access for the agent.
//!
//! [`ClusterClient`] is the capability seam every other crate talks to.
//! [`KubeCluster`] backs it with kube-rs; [`MemCluster`] is an in-memory
//! stand-in for tests and dry runs.

#![forbid(unsafe_code)]

mod client;
mod kube_cluster;
mod mem;
pub mod retry;
mod workload;

pub use client::ClusterClient;
pub use kube_cluster::{classify, get_kube_client, KubeCluster};
pub use mem::{MemCluster, MemOp};
pub use retry::{retry_if, RetryConfig};
pub use workload::Workload;
