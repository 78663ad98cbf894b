//! Placement routing
//!
//! Two tiers decide where a chunk lands: the global router picks the cluster
//! with the most free capacity, and that cluster's router picks the node
//! with the best score. Every selection re-probes its candidates; nothing is
//! cached between calls.

pub mod cluster;
pub mod global;

pub use cluster::ClusterRouter;
pub use global::GlobalRouter;

use crate::storage::NodeStatus;
use crate::{Error, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Score penalty per stored chunk: 50 MiB
pub const DEFAULT_CHUNK_PENALTY: u64 = 50 * 1024 * 1024;

/// Scores closer than this to the maximum count as tied
pub const SCORE_EPSILON: f64 = 1e-3;

/// Per-call timeout for probes and transfers
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for one call into a cluster router given the node-level `timeout`.
///
/// A cluster answers a status call after one round of concurrent node probes
/// and an upload after a probe round plus one store.
pub fn cluster_deadline(timeout: Duration) -> Duration {
    timeout * 3
}

/// Deadline for one upload through the global router: a round of cluster
/// probes followed by one cluster upload.
pub fn placement_deadline(timeout: Duration) -> Duration {
    cluster_deadline(timeout) * 2 + timeout
}

/// Immutable routing parameters injected at construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingConfig {
    /// Bytes subtracted from a node's score per stored chunk
    pub chunk_penalty: u64,
    /// Tie window around the maximum score
    pub epsilon: f64,
    /// Deadline for each probe or transfer
    pub timeout: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            chunk_penalty: DEFAULT_CHUNK_PENALTY,
            epsilon: SCORE_EPSILON,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Node score: free capacity minus a penalty per stored chunk
pub fn score(status: &NodeStatus, chunk_penalty: u64) -> f64 {
    status.free_capacity as f64 - status.chunk_count as f64 * chunk_penalty as f64
}

/// Pick the highest-scoring candidate, breaking ties uniformly at random.
///
/// Every candidate whose score lies within `epsilon` of the maximum is part
/// of the tie; `rng` chooses among them. Returns `None` for an empty slice.
pub fn select_best<'a, T, F, R>(
    candidates: &'a [T],
    score_of: F,
    epsilon: f64,
    rng: &mut R,
) -> Option<&'a T>
where
    F: Fn(&T) -> f64,
    R: Rng + ?Sized,
{
    let max = candidates
        .iter()
        .map(&score_of)
        .fold(f64::NEG_INFINITY, f64::max);

    let top: Vec<&T> = candidates
        .iter()
        .filter(|c| (score_of(*c) - max).abs() < epsilon)
        .collect();

    top.choose(rng).copied()
}

/// Aggregate capacity of a cluster's reachable nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub cluster_free: u64,
    pub cluster_chunk_count: u64,
    pub active_nodes: usize,
}

/// Aggregate capacity across reachable clusters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FleetStatus {
    pub free_capacity: u64,
    pub chunk_count: u64,
    pub active_clusters: usize,
}

/// Reply of a cluster router after storing a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterReceipt {
    pub status: String,
    pub node: String,
    pub chunk_id: String,
}

/// Reply of the global router after storing a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementReceipt {
    pub status: String,
    pub cluster: String,
    pub node: String,
    pub chunk_id: String,
}

/// A cluster as seen by the global tier
#[async_trait]
pub trait ClusterApi: Send + Sync {
    fn address(&self) -> &str;

    /// Route a chunk to one of the cluster's nodes and store it there
    async fn upload_chunk(&self, chunk_id: &str, data: Vec<u8>) -> Result<ClusterReceipt>;

    async fn status(&self) -> Result<ClusterStatus>;
}

/// Entry point used by uploads to place a chunk somewhere in the fleet
#[async_trait]
pub trait PlacementApi: Send + Sync {
    async fn upload_chunk(&self, chunk_id: &str, data: Vec<u8>) -> Result<PlacementReceipt>;
}

/// Reject a store request lacking a chunk id or payload before routing it
pub(crate) fn check_upload(chunk_id: &str, data: &[u8]) -> Result<()> {
    if chunk_id.is_empty() {
        return Err(Error::MissingInput("chunk_id".into()));
    }
    if data.is_empty() {
        return Err(Error::MissingInput("chunk".into()));
    }
    Ok(())
}

/// Run `call` against `target`, reporting it unreachable past `timeout`
pub(crate) async fn within<T, F>(timeout: Duration, target: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::unreachable(
            target,
            format!("no response within {timeout:?}"),
        )),
    }
}
