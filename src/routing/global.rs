//! Global routing across named clusters

use crate::routing::{
    check_upload, cluster_deadline, within, ClusterApi, ClusterStatus, FleetStatus, PlacementApi,
    PlacementReceipt,
};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A cluster that answered the current probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedCluster {
    pub name: String,
    pub address: String,
    pub status: ClusterStatus,
}

/// Routes chunks to the cluster with the most free capacity.
///
/// Cluster load is not penalised here; the node tier already accounts for it.
pub struct GlobalRouter {
    /// Clusters in name order
    clusters: Vec<(String, Arc<dyn ClusterApi>)>,
    /// Deadline for each call into a cluster, above the node-level timeout
    deadline: Duration,
}

impl GlobalRouter {
    /// `timeout` is the per-call timeout the clusters apply to their nodes
    pub fn new(clusters: BTreeMap<String, Arc<dyn ClusterApi>>, timeout: Duration) -> Self {
        if clusters.is_empty() {
            tracing::warn!("global router created without clusters");
        }
        tracing::info!(
            clusters = ?clusters.keys().collect::<Vec<_>>(),
            "clusters configured"
        );
        Self {
            clusters: clusters.into_iter().collect(),
            deadline: cluster_deadline(timeout),
        }
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.clusters.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Probe every cluster concurrently; unreachable clusters are left out.
    ///
    /// Results keep name order.
    pub async fn probe(&self) -> Vec<ProbedCluster> {
        let results = join_all(
            self.clusters
                .iter()
                .map(|(_, cluster)| within(self.deadline, cluster.address(), cluster.status())),
        )
        .await;

        let mut probed = Vec::with_capacity(self.clusters.len());
        for ((name, cluster), result) in self.clusters.iter().zip(results) {
            match result {
                Ok(status) => probed.push(ProbedCluster {
                    name: name.clone(),
                    address: cluster.address().to_string(),
                    status,
                }),
                Err(e) => {
                    tracing::warn!(cluster = %name, "cluster unreachable: {}", e);
                }
            }
        }
        probed
    }

    /// Choose the cluster with the most free capacity; the first name wins ties
    pub async fn select(&self) -> Result<ProbedCluster> {
        let mut best: Option<ProbedCluster> = None;
        for candidate in self.probe().await {
            let better = best
                .as_ref()
                .map_or(true, |b| candidate.status.cluster_free > b.status.cluster_free);
            if better {
                best = Some(candidate);
            }
        }

        let best = best.ok_or_else(|| Error::ServiceUnavailable("no available clusters".into()))?;
        tracing::info!(
            cluster = %best.name,
            free = best.status.cluster_free,
            "selected cluster"
        );
        Ok(best)
    }

    /// Hand a chunk to the selected cluster; a failure there is not retried elsewhere
    pub async fn forward(&self, chunk_id: &str, data: Vec<u8>) -> Result<PlacementReceipt> {
        check_upload(chunk_id, &data)?;
        let selected = self.select().await?;
        let cluster = self
            .clusters
            .iter()
            .find(|(name, _)| *name == selected.name)
            .map(|(_, cluster)| cluster)
            .ok_or_else(|| Error::ServiceUnavailable(selected.name.clone()))?;

        match within(self.deadline, cluster.address(), cluster.upload_chunk(chunk_id, data)).await {
            Ok(receipt) => {
                tracing::info!(chunk_id, cluster = %selected.name, node = %receipt.node, "forwarded chunk");
                Ok(PlacementReceipt {
                    status: "stored".into(),
                    cluster: selected.name,
                    node: receipt.node,
                    chunk_id: chunk_id.to_string(),
                })
            }
            Err(e) => {
                tracing::error!(chunk_id, cluster = %selected.name, "upload to cluster failed: {}", e);
                Err(Error::upstream(selected.name, e))
            }
        }
    }

    /// Capacity summed over the clusters reachable right now
    pub async fn status(&self) -> FleetStatus {
        self.probe()
            .await
            .iter()
            .fold(FleetStatus::default(), |mut acc, cluster| {
                acc.free_capacity += cluster.status.cluster_free;
                acc.chunk_count += cluster.status.cluster_chunk_count;
                acc.active_clusters += 1;
                acc
            })
    }
}

#[async_trait]
impl PlacementApi for GlobalRouter {
    async fn upload_chunk(&self, chunk_id: &str, data: Vec<u8>) -> Result<PlacementReceipt> {
        self.forward(chunk_id, data).await
    }
}
